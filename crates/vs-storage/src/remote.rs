//! Remote backends and the per-remote mount cache.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;

use crate::error::StorageError;

/// One entry as reported by a remote backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteEntry {
    /// Path relative to the remote root, without a leading slash.
    #[serde(rename = "Path")]
    pub path: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Size", default)]
    pub size: i64,
    #[serde(rename = "IsDir", default)]
    pub is_dir: bool,
}

impl RemoteEntry {
    /// Size in bytes; backends report `-1` when unknown.
    pub fn len(&self) -> u64 {
        self.size.max(0) as u64
    }
}

/// A connected handle to one named remote.
///
/// Creating one is expensive (it validates the remote and may warm a
/// directory cache), so handles are created once per remote name and shared
/// through a [`MountRegistry`].
pub trait RemoteMount: Send + Sync + fmt::Debug {
    /// Name of the remote this handle serves.
    fn remote(&self) -> &str;

    /// Describe a single path. `""` is the remote root.
    fn stat(&self, path: &str) -> Result<RemoteEntry, StorageError>;

    /// List the direct children of a directory.
    fn list(&self, path: &str) -> Result<Vec<RemoteEntry>, StorageError>;

    /// Open a byte range of a file for reading.
    fn open(
        &self,
        path: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<Box<dyn Read + Send>, StorageError>;
}

/// Builds mounts on first use.
pub trait MountFactory: Send + Sync {
    fn create(&self, remote: &str) -> Result<Arc<dyn RemoteMount>, StorageError>;
}

/// Process-wide cache holding at most one mount per remote name.
///
/// The lock is held across the create-if-absent sequence, so concurrent
/// first lookups of the same remote construct exactly one mount. Once a
/// mount exists, lookups only clone its `Arc`.
pub struct MountRegistry {
    factory: Arc<dyn MountFactory>,
    mounts: Mutex<HashMap<String, Arc<dyn RemoteMount>>>,
}

impl MountRegistry {
    pub fn new(factory: Arc<dyn MountFactory>) -> Self {
        Self {
            factory,
            mounts: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached mount for `remote`, creating it if absent.
    ///
    /// A failed creation is not cached; the next lookup tries again.
    pub fn get_or_create(&self, remote: &str) -> Result<Arc<dyn RemoteMount>, StorageError> {
        let mut mounts = self.mounts.lock();
        if let Some(mount) = mounts.get(remote) {
            return Ok(Arc::clone(mount));
        }

        let mount = self.factory.create(remote)?;
        tracing::info!(remote = %remote, "Remote mount created");
        mounts.insert(remote.to_string(), Arc::clone(&mount));
        Ok(mount)
    }

    /// Number of mounts created so far.
    pub fn len(&self) -> usize {
        self.mounts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for MountRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.mounts.lock().keys().cloned().collect();
        f.debug_struct("MountRegistry").field("mounts", &names).finish()
    }
}
