//! Locator string to [`StorageNode`] resolution.

use std::path::PathBuf;
use std::sync::Arc;

use vs_core::config::StorageConfig;

use crate::error::StorageError;
use crate::locator::{Backend, Locator};
use crate::node::{LocalNode, RemoteNode, StorageNode};
use crate::rclone::RcloneFactory;
use crate::remote::{MountFactory, MountRegistry};

/// Resolves locators against local disk and the cached remote mounts.
#[derive(Debug)]
pub struct Resolver {
    mounts: MountRegistry,
    default_backend: Backend,
}

impl Resolver {
    /// Resolver whose remotes are built by `factory`.
    pub fn new(factory: Arc<dyn MountFactory>) -> Self {
        Self {
            mounts: MountRegistry::new(factory),
            default_backend: Backend::Local,
        }
    }

    /// Resolver backed by the rclone CLI.
    pub fn from_config(storage: &StorageConfig, rclone_path: Option<PathBuf>) -> Self {
        let factory = RcloneFactory::new(rclone_path, storage.rclone_config.clone());
        let default_backend = Backend::from_tag(&storage.default_backend).unwrap_or_else(|| {
            tracing::warn!(
                backend = %storage.default_backend,
                "Unknown default storage backend; using local"
            );
            Backend::Local
        });
        Self::new(Arc::new(factory)).with_default_backend(default_backend)
    }

    pub fn with_default_backend(mut self, backend: Backend) -> Self {
        self.default_backend = backend;
        self
    }

    /// Parse a locator string using this resolver's default backend.
    pub fn parse(&self, s: &str) -> Result<Locator, StorageError> {
        Locator::parse_with_default(s, self.default_backend)
    }

    /// Parse and resolve a locator string.
    pub fn resolve(&self, s: &str) -> Result<StorageNode, StorageError> {
        let locator = self.parse(s)?;
        self.resolve_locator(&locator)
    }

    /// Resolve an already-parsed locator.
    ///
    /// Backend failures are returned as-is so callers can tell a missing
    /// file from an unreachable remote.
    pub fn resolve_locator(&self, locator: &Locator) -> Result<StorageNode, StorageError> {
        match locator {
            Locator::Local { path } => Ok(StorageNode::Local(LocalNode::stat(path)?)),
            Locator::Rclone { remote, path } => {
                let mount = self.mounts.get_or_create(remote)?;
                let entry = mount.stat(path)?;
                Ok(StorageNode::Remote(RemoteNode::new(mount, entry)))
            }
        }
    }

    pub fn mounts(&self) -> &MountRegistry {
        &self.mounts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::testing::CountingFactory;
    use std::collections::BTreeMap;
    use std::sync::Barrier;

    fn remote_factory() -> Arc<CountingFactory> {
        let mut files = BTreeMap::new();
        files.insert("Movies/a.mkv".to_string(), b"aaa".to_vec());
        files.insert("Movies/b.mkv".to_string(), b"b".to_vec());
        Arc::new(CountingFactory {
            files,
            ..Default::default()
        })
    }

    #[test]
    fn local_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("film.mkv"), b"x").unwrap();
        let resolver = Resolver::new(remote_factory());

        let node = resolver
            .resolve(&Locator::local(dir.path().join("film.mkv")).to_string())
            .unwrap();
        let again = resolver.resolve(&node.locator().to_string()).unwrap();
        assert_eq!(again.locator(), node.locator());
        assert_eq!(again.local_path(), node.local_path());
        assert_eq!(again.size(), 1);
    }

    #[test]
    fn remote_round_trip() {
        let resolver = Resolver::new(remote_factory());
        let node = resolver.resolve("rclone/gdrive/Movies/a.mkv").unwrap();
        assert_eq!(node.locator().backend(), Backend::Rclone);

        let again = resolver.resolve(&node.locator().to_string()).unwrap();
        assert_eq!(again.locator(), node.locator());
        assert_eq!(again.size(), 3);
    }

    #[test]
    fn remote_not_found_is_propagated() {
        let resolver = Resolver::new(remote_factory());
        let err = resolver.resolve("rclone/gdrive/Movies/missing.mkv").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn concurrent_first_resolutions_share_one_mount() {
        let factory = remote_factory();
        let resolver = Arc::new(Resolver::new(factory.clone()));
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = ["rclone/gdrive/Movies/a.mkv", "rclone/gdrive/Movies/b.mkv"]
            .into_iter()
            .map(|loc| {
                let resolver = Arc::clone(&resolver);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    resolver.resolve(loc).unwrap().name()
                })
            })
            .collect();

        let mut names: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        names.sort();
        assert_eq!(names, vec!["a.mkv", "b.mkv"]);
        assert_eq!(factory.count(), 1);
        assert_eq!(resolver.mounts().len(), 1);
    }

    #[test]
    fn untagged_uses_default_backend() {
        let resolver = Resolver::new(remote_factory()).with_default_backend(Backend::Rclone);
        let node = resolver.resolve("gdrive/Movies/a.mkv").unwrap();
        assert_eq!(node.locator().to_string(), "rclone/gdrive/Movies/a.mkv");
    }

    #[test]
    fn malformed_locator_is_parse_error() {
        let resolver = Resolver::new(remote_factory());
        assert!(matches!(
            resolver.resolve("rclone/"),
            Err(StorageError::InvalidLocator { .. })
        ));
    }
}
