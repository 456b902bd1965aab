//! Shared streaming helpers: range parsing, content-type guessing, and
//! chunked body construction for local and remote files.

use std::io::Read;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use vs_storage::StorageNode;

const CHUNK_SIZE: usize = 64 * 1024;

/// Parse a `Range: bytes=START-END` header value.
///
/// Returns `(start, Option<end>)` where `end` is `None` for open-ended ranges
/// like `bytes=500-`. Suffix ranges (`bytes=-500`) are not supported.
pub fn parse_range_header(value: &str) -> Option<(u64, Option<u64>)> {
    let bytes_prefix = value.strip_prefix("bytes=")?;
    let mut parts = bytes_prefix.splitn(2, '-');
    let start_str = parts.next()?.trim();
    let end_str = parts.next()?.trim();

    let start: u64 = start_str.parse().ok()?;
    let end: Option<u64> = if end_str.is_empty() {
        None
    } else {
        Some(end_str.parse().ok()?)
    };

    Some((start, end))
}

/// A byte window resolved against a known file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    Full,
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

fn window(range_header: Option<&str>, file_size: u64) -> Window {
    match range_header.and_then(parse_range_header) {
        None => Window::Full,
        Some((start, end_opt)) => {
            if file_size == 0 || start >= file_size {
                return Window::Unsatisfiable;
            }
            let end = end_opt.unwrap_or(file_size - 1).min(file_size - 1);
            if start > end {
                Window::Unsatisfiable
            } else {
                Window::Partial { start, end }
            }
        }
    }
}

/// Guess the MIME type from a file name's extension.
pub fn guess_content_type(file_name: &str) -> &'static str {
    let ext = file_name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();

    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "m4s" => "video/iso.segment",
        "m4a" => "audio/mp4",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "webm" => "video/webm",
        "ts" => "video/mp2t",
        "mov" => "video/quicktime",
        "vtt" => "text/vtt",
        "srt" => "application/x-subrip",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

fn unsatisfiable(file_size: u64) -> Response {
    (
        StatusCode::RANGE_NOT_SATISFIABLE,
        [(header::CONTENT_RANGE.as_str(), format!("bytes */{file_size}"))],
        Body::empty(),
    )
        .into_response()
}

fn respond(content_type: &str, file_size: u64, window: Window, body: Body) -> Response {
    match window {
        Window::Partial { start, end } => (
            StatusCode::PARTIAL_CONTENT,
            [
                (header::CONTENT_TYPE.as_str(), content_type.to_string()),
                (
                    header::CONTENT_RANGE.as_str(),
                    format!("bytes {start}-{end}/{file_size}"),
                ),
                (header::CONTENT_LENGTH.as_str(), (end - start + 1).to_string()),
                (header::ACCEPT_RANGES.as_str(), "bytes".to_string()),
            ],
            body,
        )
            .into_response(),
        _ => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE.as_str(), content_type.to_string()),
                (header::CONTENT_LENGTH.as_str(), file_size.to_string()),
                (header::ACCEPT_RANGES.as_str(), "bytes".to_string()),
            ],
            body,
        )
            .into_response(),
    }
}

/// Serve a local file using chunked streaming via `ReaderStream`.
///
/// Reads are done in 64KB chunks so memory stays bounded regardless of file
/// size. Supports Range requests.
pub async fn serve_file_streaming(
    file_path: &std::path::Path,
    range_header: Option<&str>,
) -> vs_core::Result<Response> {
    let metadata = tokio::fs::metadata(file_path)
        .await
        .map_err(|_| vs_core::Error::not_found("file", file_path.display()))?;

    let file_size = metadata.len();
    let file_name = file_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let content_type = guess_content_type(&file_name);

    let window = window(range_header, file_size);
    let mut file = tokio::fs::File::open(file_path)
        .await
        .map_err(|_| vs_core::Error::not_found("file", file_path.display()))?;

    let body = match window {
        Window::Unsatisfiable => return Ok(unsatisfiable(file_size)),
        Window::Full => Body::from_stream(ReaderStream::with_capacity(file, CHUNK_SIZE)),
        Window::Partial { start, end } => {
            file.seek(std::io::SeekFrom::Start(start)).await?;
            // Wrap in a Take to limit reads to exactly the window.
            let limited = file.take(end - start + 1);
            Body::from_stream(ReaderStream::with_capacity(limited, CHUNK_SIZE))
        }
    };

    Ok(respond(content_type, file_size, window, body))
}

/// Serve a file from any storage node, with Range support.
///
/// Local nodes stream through `tokio::fs`. Remote nodes are read on the
/// blocking pool and forwarded chunk by chunk; the reader is dropped (and
/// its transfer stopped) as soon as the client goes away.
pub async fn serve_node_streaming(
    node: StorageNode,
    range_header: Option<&str>,
) -> vs_core::Result<Response> {
    if node.is_dir() {
        return Err(vs_core::Error::Validation(format!(
            "{} is a directory",
            node.locator()
        )));
    }
    if let Some(path) = node.local_path() {
        let path = path.to_path_buf();
        return serve_file_streaming(&path, range_header).await;
    }

    let file_size = node.size();
    let content_type = guess_content_type(&node.name());
    let window = window(range_header, file_size);
    let (offset, length) = match window {
        Window::Unsatisfiable => return Ok(unsatisfiable(file_size)),
        Window::Full => (0, None),
        Window::Partial { start, end } => (start, Some(end - start + 1)),
    };

    let reader = tokio::task::spawn_blocking(move || node.open(offset, length))
        .await
        .map_err(|e| vs_core::Error::Internal(format!("open task failed: {e}")))??;

    Ok(respond(content_type, file_size, window, Body::from_stream(blocking_stream(reader))))
}

/// Pump a blocking reader through a bounded channel into a byte stream.
fn blocking_stream(
    mut reader: Box<dyn Read + Send>,
) -> impl futures::Stream<Item = std::io::Result<Bytes>> {
    let (tx, rx) = tokio::sync::mpsc::channel::<std::io::Result<Bytes>>(4);

    tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let item = match reader.read(&mut buf) {
                Ok(0) => return,
                Ok(n) => Ok(Bytes::copy_from_slice(&buf[..n])),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => Err(e),
            };
            let failed = item.is_err();
            if tx.blocking_send(item).is_err() || failed {
                return;
            }
        }
    });

    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
}
