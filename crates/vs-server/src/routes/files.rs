//! `/files/{*path}`: manifests, playlists, segments, stream metadata, and
//! raw source files.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use vs_core::{Error, SegmentIndex};
use vs_media::{patch_sequence_number, MediaPlaylist};

use crate::context::AppContext;
use crate::error::AppError;
use crate::media::{self, ClientCapabilities};
use crate::middleware::request_id::RequestId;
use crate::request::{ManifestKind, MediaRequest, RepresentationFile};
use crate::routes::streaming_helpers::{serve_file_streaming, serve_node_streaming};

/// Query parameters understood by the manifest endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ManifestQuery {
    /// Comma-separated RFC 6381 codec strings the client can decode.
    #[serde(rename = "playableCodecs")]
    pub playable_codecs: Option<String>,
}

impl ManifestQuery {
    fn capabilities(&self) -> ClientCapabilities {
        self.playable_codecs
            .as_deref()
            .map(ClientCapabilities::from_list)
            .unwrap_or_default()
    }
}

/// GET /files/{*path}
pub async fn files(
    State(ctx): State<AppContext>,
    Path(tail): Path<String>,
    Query(query): Query<ManifestQuery>,
    request_id: Option<Extension<RequestId>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let result = dispatch(&ctx, &tail, &query, &headers).await;
    result.map_err(|e| match request_id {
        Some(Extension(RequestId(id))) => AppError::new(e).with_request_id(id),
        None => AppError::new(e),
    })
}

async fn dispatch(
    ctx: &AppContext,
    tail: &str,
    query: &ManifestQuery,
    headers: &HeaderMap,
) -> vs_core::Result<Response> {
    match MediaRequest::parse(tail)? {
        MediaRequest::Manifest { locator, kind } => {
            manifest(ctx, &locator, kind, &query.capabilities()).await
        }
        MediaRequest::Streams { locator } => {
            let source = media::open_source(ctx, &locator).await?;
            Ok(Json(source.streams.as_ref()).into_response())
        }
        MediaRequest::CheckCodecs { locator } => {
            let source = media::open_source(ctx, &locator).await?;
            let codecs = media::candidate_codecs(&source);
            Ok(Json(serde_json::json!({ "check_codecs": codecs })).into_response())
        }
        MediaRequest::Representation {
            locator,
            stream_index,
            representation_id,
            file,
        } => match file {
            RepresentationFile::MediaPlaylist => {
                media_playlist(ctx, &locator, stream_index, &representation_id).await
            }
            RepresentationFile::Segment(segment) => {
                media_segment(ctx, &locator, stream_index, &representation_id, segment).await
            }
            RepresentationFile::Subtitle(n) => {
                subtitle(ctx, &locator, stream_index, &representation_id, n).await
            }
        },
        MediaRequest::Raw { locator } => {
            let node = media::resolve_node(ctx, &locator).await?;
            let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
            serve_node_streaming(node, range).await
        }
    }
}

async fn manifest(
    ctx: &AppContext,
    locator: &str,
    kind: ManifestKind,
    capabilities: &ClientCapabilities,
) -> vs_core::Result<Response> {
    let body = media::render_manifest(ctx, locator, kind, capabilities).await?;
    Ok(text(kind.content_type(), body))
}

async fn media_playlist(
    ctx: &AppContext,
    locator: &str,
    stream_index: u32,
    representation_id: &str,
) -> vs_core::Result<Response> {
    let source = media::open_source(ctx, locator).await?;
    let request = media::session_request(ctx, &source, stream_index, representation_id).await?;

    let playlist = if request.representation.is_single_file() {
        MediaPlaylist::subtitle(request.timeline.total())
    } else {
        MediaPlaylist::fmp4(&request.timeline.durations())
    };
    Ok(text(ManifestKind::HlsTranscoding.content_type(), playlist.render()))
}

async fn media_segment(
    ctx: &AppContext,
    locator: &str,
    stream_index: u32,
    representation_id: &str,
    segment: SegmentIndex,
) -> vs_core::Result<Response> {
    let source = media::open_source(ctx, locator).await?;
    let request = media::session_request(ctx, &source, stream_index, representation_id).await?;
    if request.representation.is_single_file() {
        return Err(Error::Validation(format!(
            "representation '{representation_id}' serves .vtt files"
        )));
    }
    if let SegmentIndex::Media(n) = segment {
        if n >= request.timeline.len() {
            return Err(Error::not_found("segment", format!("{}/{n}", request.key)));
        }
    }

    let (_session, path) = ctx.sessions.segment(&request, segment, &ctx.shutdown).await?;

    match segment {
        SegmentIndex::Init => serve_file_streaming(&path, None).await,
        SegmentIndex::Media(n) => {
            let mut data = read_segment(&path).await?;
            patch_sequence_number(&mut data, n + 1)?;
            Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, "video/iso.segment")],
                data,
            )
                .into_response())
        }
    }
}

async fn subtitle(
    ctx: &AppContext,
    locator: &str,
    stream_index: u32,
    representation_id: &str,
    index: u32,
) -> vs_core::Result<Response> {
    let source = media::open_source(ctx, locator).await?;
    let request = media::session_request(ctx, &source, stream_index, representation_id).await?;
    if !request.representation.is_single_file() {
        return Err(Error::Validation(format!(
            "representation '{representation_id}' serves .m4s segments"
        )));
    }
    if index != 0 {
        return Err(Error::not_found("segment", format!("{}/{index}", request.key)));
    }

    let segment = SegmentIndex::Media(0);
    let (_session, path) = ctx.sessions.segment(&request, segment, &ctx.shutdown).await?;
    let data = read_segment(&path).await?;
    Ok(([(header::CONTENT_TYPE, "text/vtt; charset=utf-8")], data).into_response())
}

/// Read a finished segment. A file that vanished between the readiness
/// check and the read belongs to a session that was just replaced.
async fn read_segment(path: &std::path::Path) -> vs_core::Result<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(data),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::Unavailable(format!(
            "segment {} was removed; retry",
            path.display()
        ))),
        Err(e) => Err(e.into()),
    }
}

fn text(content_type: &'static str, body: String) -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body).into_response()
}
