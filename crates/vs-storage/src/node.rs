//! Storage nodes: files and directories on any backend.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use crate::error::StorageError;
use crate::locator::Locator;
use crate::remote::{RemoteEntry, RemoteMount};

/// A file or directory on local disk or inside a remote.
#[derive(Debug, Clone)]
pub enum StorageNode {
    Local(LocalNode),
    Remote(RemoteNode),
}

/// A stat'ed local path.
#[derive(Debug, Clone)]
pub struct LocalNode {
    path: PathBuf,
    size: u64,
    is_dir: bool,
}

impl LocalNode {
    /// Stat `path`, following symlinks.
    pub fn stat(path: &Path) -> Result<Self, StorageError> {
        let meta = std::fs::metadata(path).map_err(|e| StorageError::local_io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            size: meta.len(),
            is_dir: meta.is_dir(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// An entry inside a remote, together with the mount that produced it.
#[derive(Debug, Clone)]
pub struct RemoteNode {
    mount: Arc<dyn RemoteMount>,
    entry: RemoteEntry,
}

impl RemoteNode {
    pub fn new(mount: Arc<dyn RemoteMount>, entry: RemoteEntry) -> Self {
        Self { mount, entry }
    }

    pub fn remote(&self) -> &str {
        self.mount.remote()
    }

    /// Path relative to the remote root.
    pub fn path(&self) -> &str {
        &self.entry.path
    }
}

impl StorageNode {
    /// Last path component.
    pub fn name(&self) -> String {
        self.locator().name()
    }

    /// Size in bytes; 0 for directories and unknown sizes.
    pub fn size(&self) -> u64 {
        match self {
            StorageNode::Local(n) if n.is_dir => 0,
            StorageNode::Local(n) => n.size,
            StorageNode::Remote(n) if n.entry.is_dir => 0,
            StorageNode::Remote(n) => n.entry.len(),
        }
    }

    pub fn is_dir(&self) -> bool {
        match self {
            StorageNode::Local(n) => n.is_dir,
            StorageNode::Remote(n) => n.entry.is_dir,
        }
    }

    /// The locator that resolves back to this node.
    pub fn locator(&self) -> Locator {
        match self {
            StorageNode::Local(n) => Locator::local(&n.path),
            StorageNode::Remote(n) => Locator::Rclone {
                remote: n.remote().to_string(),
                path: n.entry.path.clone(),
            },
        }
    }

    /// Filesystem path, when the node lives on local disk.
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            StorageNode::Local(n) => Some(&n.path),
            StorageNode::Remote(_) => None,
        }
    }

    /// Direct children of a directory, sorted by name. Children that cannot
    /// be stat'ed are left out, as [`walk`](Self::walk) callers usually do.
    pub fn list(&self) -> Result<Vec<StorageNode>, StorageError> {
        if !self.is_dir() {
            return Err(StorageError::NotADirectory(self.locator().to_string()));
        }

        match self {
            StorageNode::Local(n) => {
                let read_dir =
                    std::fs::read_dir(&n.path).map_err(|e| StorageError::local_io(&n.path, e))?;
                let mut children = Vec::new();
                for entry in read_dir {
                    let entry = entry.map_err(|e| StorageError::local_io(&n.path, e))?;
                    match LocalNode::stat(&entry.path()) {
                        Ok(child) => children.push(StorageNode::Local(child)),
                        // Dangling symlinks and entries removed mid-listing.
                        Err(e) => {
                            tracing::debug!(path = %entry.path().display(), error = %e, "Skipping unreadable entry");
                        }
                    }
                }
                children.sort_by_key(|c| c.name());
                Ok(children)
            }
            StorageNode::Remote(n) => {
                let mut children: Vec<StorageNode> = n
                    .mount
                    .list(&n.entry.path)?
                    .into_iter()
                    .map(|entry| StorageNode::Remote(RemoteNode::new(Arc::clone(&n.mount), entry)))
                    .collect();
                children.sort_by_key(|c| c.name());
                Ok(children)
            }
        }
    }

    /// Depth-first traversal that calls `visitor` once per file.
    ///
    /// Directories are descended into, not visited. Errors met along the way
    /// (unreadable directories, dangling symlinks, backend failures) are
    /// handed to the visitor as `Err`; returning `Ok(())` skips the entry and
    /// continues, returning an error aborts the walk with that error.
    pub fn walk<F>(&self, mut visitor: F) -> Result<(), StorageError>
    where
        F: FnMut(Result<StorageNode, StorageError>) -> Result<(), StorageError>,
    {
        match self {
            StorageNode::Local(n) => walk_local(&n.path, &mut visitor),
            StorageNode::Remote(n) => walk_remote(&n.mount, n.entry.clone(), &mut visitor),
        }
    }

    /// Open `length` bytes (or the rest of the file) starting at `offset`.
    pub fn open(&self, offset: u64, length: Option<u64>) -> Result<Box<dyn Read + Send>, StorageError> {
        if self.is_dir() {
            return Err(StorageError::invalid(
                &self.locator().to_string(),
                "cannot read a directory",
            ));
        }

        match self {
            StorageNode::Local(n) => {
                let mut file =
                    std::fs::File::open(&n.path).map_err(|e| StorageError::local_io(&n.path, e))?;
                file.seek(SeekFrom::Start(offset))
                    .map_err(|e| StorageError::local_io(&n.path, e))?;
                match length {
                    Some(len) => Ok(Box::new(file.take(len))),
                    None => Ok(Box::new(file)),
                }
            }
            StorageNode::Remote(n) => n.mount.open(&n.entry.path, offset, length),
        }
    }
}

fn walk_local<F>(root: &Path, visitor: &mut F) -> Result<(), StorageError>
where
    F: FnMut(Result<StorageNode, StorageError>) -> Result<(), StorageError>,
{
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let item = match entry {
            Ok(e) if e.file_type().is_dir() => continue,
            Ok(e) => e
                .metadata()
                .map(|meta| {
                    StorageNode::Local(LocalNode {
                        path: e.path().to_path_buf(),
                        size: meta.len(),
                        is_dir: false,
                    })
                })
                .map_err(walk_error),
            Err(err) => Err(walk_error(err)),
        };
        visitor(item)?;
    }
    Ok(())
}

fn walk_remote<F>(
    mount: &Arc<dyn RemoteMount>,
    entry: RemoteEntry,
    visitor: &mut F,
) -> Result<(), StorageError>
where
    F: FnMut(Result<StorageNode, StorageError>) -> Result<(), StorageError>,
{
    if !entry.is_dir {
        return visitor(Ok(StorageNode::Remote(RemoteNode::new(
            Arc::clone(mount),
            entry,
        ))));
    }

    let mut children = match mount.list(&entry.path) {
        Ok(children) => children,
        Err(e) => return visitor(Err(e)),
    };
    children.sort_by(|a, b| a.name.cmp(&b.name));
    for child in children {
        walk_remote(mount, child, visitor)?;
    }
    Ok(())
}

fn walk_error(err: walkdir::Error) -> StorageError {
    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
    let io = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
    StorageError::local_io(path, io)
}
