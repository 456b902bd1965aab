//! # vs-storage
//!
//! Uniform access to source media regardless of where it lives.
//!
//! - **Locators** ([`Locator`]) -- the `<backend>/<path>` strings that carry a
//!   storage location across the HTTP boundary.
//! - **Nodes** ([`StorageNode`]) -- a file or directory on local disk or inside
//!   a remote backend, with stat, list, walk, and ranged reads.
//! - **Remote mounts** ([`RemoteMount`], [`MountRegistry`]) -- one cached,
//!   lazily created handle per remote name, shared by every lookup.
//! - **Resolution** ([`Resolver`]) -- turn a locator string into a node.

pub mod error;
pub mod locator;
pub mod node;
pub mod rclone;
pub mod remote;
pub mod resolver;

pub use error::StorageError;
pub use locator::{Backend, Locator};
pub use node::{LocalNode, RemoteNode, StorageNode};
pub use rclone::{RcloneFactory, RcloneMount};
pub use remote::{MountFactory, MountRegistry, RemoteEntry, RemoteMount};
pub use resolver::Resolver;
