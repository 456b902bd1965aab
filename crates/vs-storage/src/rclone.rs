//! Remote mounts backed by the `rclone` CLI.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;

use crate::error::StorageError;
use crate::remote::{MountFactory, RemoteEntry, RemoteMount};

const BACKEND: &str = "rclone";

/// rclone exit codes for "directory not found" and "file not found".
const EXIT_DIR_NOT_FOUND: i32 = 3;
const EXIT_FILE_NOT_FOUND: i32 = 4;

/// Creates [`RcloneMount`]s after confirming the remote is configured.
#[derive(Debug, Clone)]
pub struct RcloneFactory {
    rclone_path: Option<PathBuf>,
    config_path: Option<PathBuf>,
}

impl RcloneFactory {
    /// Use an explicit rclone binary, or find one on `PATH`.
    pub fn new(rclone_path: Option<PathBuf>, config_path: Option<PathBuf>) -> Self {
        let rclone_path = rclone_path
            .filter(|p| p.exists())
            .or_else(|| which::which("rclone").ok());
        Self {
            rclone_path,
            config_path,
        }
    }
}

impl MountFactory for RcloneFactory {
    fn create(&self, remote: &str) -> Result<Arc<dyn RemoteMount>, StorageError> {
        let rclone = self.rclone_path.clone().ok_or_else(|| StorageError::Backend {
            backend: BACKEND.into(),
            message: "rclone not found; is it installed and in PATH?".into(),
        })?;

        let mount = RcloneMount {
            rclone,
            config_path: self.config_path.clone(),
            remote: remote.to_string(),
        };

        let listed = mount.run(&["listremotes"])?;
        if !has_remote(&listed, remote) {
            return Err(StorageError::Backend {
                backend: BACKEND.into(),
                message: format!("remote '{remote}' is not configured"),
            });
        }

        Ok(Arc::new(mount))
    }
}

/// A configured rclone remote.
#[derive(Debug, Clone)]
pub struct RcloneMount {
    rclone: PathBuf,
    config_path: Option<PathBuf>,
    remote: String,
}

impl RcloneMount {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.rclone);
        if let Some(ref cfg) = self.config_path {
            cmd.arg("--config").arg(cfg);
        }
        cmd
    }

    fn target(&self, path: &str) -> String {
        format!("{}:{}", self.remote, path)
    }

    /// Run rclone to completion and return stdout.
    fn run(&self, args: &[&str]) -> Result<String, StorageError> {
        let output = self
            .command()
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| StorageError::Backend {
                backend: BACKEND.into(),
                message: format!("failed to spawn rclone: {e}"),
            })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(EXIT_DIR_NOT_FOUND) | Some(EXIT_FILE_NOT_FOUND) => Err(StorageError::NotFound {
                backend: BACKEND.into(),
                path: args.last().map(|s| s.to_string()).unwrap_or_default(),
            }),
            _ => Err(StorageError::Backend {
                backend: BACKEND.into(),
                message: format!("rclone {} exited with {}: {stderr}", args.join(" "), output.status),
            }),
        }
    }
}

impl RemoteMount for RcloneMount {
    fn remote(&self) -> &str {
        &self.remote
    }

    fn stat(&self, path: &str) -> Result<RemoteEntry, StorageError> {
        if path.is_empty() {
            return Ok(RemoteEntry {
                path: String::new(),
                name: self.remote.clone(),
                size: -1,
                is_dir: true,
            });
        }
        let target = self.target(path);
        let stdout = self.run(&["lsjson", "--stat", &target])?;
        parse_stat(&stdout, path)
    }

    fn list(&self, path: &str) -> Result<Vec<RemoteEntry>, StorageError> {
        let target = self.target(path);
        let stdout = self.run(&["lsjson", &target])?;
        parse_listing(&stdout, path)
    }

    fn open(
        &self,
        path: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<Box<dyn Read + Send>, StorageError> {
        let mut cmd = self.command();
        cmd.arg("cat").arg("--offset").arg(offset.to_string());
        if let Some(count) = length {
            cmd.arg("--count").arg(count.to_string());
        }
        cmd.arg(self.target(path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(|e| StorageError::Backend {
            backend: BACKEND.into(),
            message: format!("failed to spawn rclone cat: {e}"),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| StorageError::Backend {
            backend: BACKEND.into(),
            message: "rclone cat has no stdout".into(),
        })?;

        Ok(Box::new(CatReader { child, stdout }))
    }
}

/// Streams `rclone cat` output; the process is reaped when dropped.
struct CatReader {
    child: Child,
    stdout: ChildStdout,
}

impl Read for CatReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stdout.read(buf)
    }
}

impl Drop for CatReader {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn has_remote(listremotes: &str, remote: &str) -> bool {
    listremotes
        .lines()
        .filter_map(|l| l.trim().strip_suffix(':'))
        .any(|name| name == remote)
}

fn parse_stat(stdout: &str, path: &str) -> Result<RemoteEntry, StorageError> {
    let mut entry: RemoteEntry = serde_json::from_str(stdout).map_err(|e| StorageError::Backend {
        backend: BACKEND.into(),
        message: format!("unparseable lsjson --stat output for {path}: {e}"),
    })?;
    entry.path = path.to_string();
    Ok(entry)
}

/// Listing entries carry paths relative to the listed directory; rebase them
/// onto the remote root.
fn parse_listing(stdout: &str, dir: &str) -> Result<Vec<RemoteEntry>, StorageError> {
    let entries: Vec<RemoteEntry> =
        serde_json::from_str(stdout).map_err(|e| StorageError::Backend {
            backend: BACKEND.into(),
            message: format!("unparseable lsjson output for {dir}: {e}"),
        })?;

    Ok(entries
        .into_iter()
        .map(|mut e| {
            if !dir.is_empty() {
                e.path = format!("{dir}/{}", e.path);
            }
            e
        })
        .collect())
}
