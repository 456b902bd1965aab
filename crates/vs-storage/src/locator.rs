//! `<backend>/<path>` locator strings.
//!
//! Local files are written as `local` followed by their absolute path
//! (`local/var/media/film.mkv`); remote files as `rclone/<remote>/<path>`.
//! Strings without a recognized backend tag are treated as paths on the
//! default backend, which keeps bare paths from older links working.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Storage backend tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Local,
    Rclone,
}

impl Backend {
    pub fn tag(&self) -> &'static str {
        match self {
            Backend::Local => "local",
            Backend::Rclone => "rclone",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "local" => Some(Backend::Local),
            "rclone" => Some(Backend::Rclone),
            _ => None,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A parsed storage location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// Absolute path on local disk.
    Local { path: PathBuf },
    /// Path relative to the root of a named remote. Empty means the root.
    Rclone { remote: String, path: String },
}

impl Locator {
    /// Parse a locator, treating untagged strings as local paths.
    pub fn parse(s: &str) -> Result<Self, StorageError> {
        Self::parse_with_default(s, Backend::Local)
    }

    /// Parse a locator, treating untagged strings as paths on `default`.
    pub fn parse_with_default(s: &str, default: Backend) -> Result<Self, StorageError> {
        let trimmed = s.trim_start_matches('/');
        if trimmed.is_empty() {
            return Err(StorageError::invalid(s, "empty locator"));
        }

        let (backend, rest) = match trimmed.split_once('/') {
            Some((tag, rest)) => match Backend::from_tag(tag) {
                Some(b) => (b, rest),
                None => (default, trimmed),
            },
            None => match Backend::from_tag(trimmed) {
                Some(b) => (b, ""),
                None => (default, trimmed),
            },
        };

        match backend {
            Backend::Local => Ok(Locator::Local {
                path: PathBuf::from(format!("/{}", clean(rest))),
            }),
            Backend::Rclone => {
                let rest = rest.trim_start_matches('/');
                let (remote, path) = rest.split_once('/').unwrap_or((rest, ""));
                if remote.is_empty() || remote == "." || remote == ".." {
                    return Err(StorageError::invalid(s, "missing remote name"));
                }
                if remote.contains(':') {
                    return Err(StorageError::invalid(s, "remote name may not contain ':'"));
                }
                Ok(Locator::Rclone {
                    remote: remote.to_string(),
                    path: clean(path),
                })
            }
        }
    }

    /// Build a local locator from a filesystem path.
    pub fn local(path: impl AsRef<Path>) -> Self {
        let raw = path.as_ref().to_string_lossy();
        Locator::Local {
            path: PathBuf::from(format!("/{}", clean(&raw))),
        }
    }

    pub fn backend(&self) -> Backend {
        match self {
            Locator::Local { .. } => Backend::Local,
            Locator::Rclone { .. } => Backend::Rclone,
        }
    }

    /// Locator of a child entry.
    pub fn join(&self, name: &str) -> Self {
        match self {
            Locator::Local { path } => Locator::local(path.join(name)),
            Locator::Rclone { remote, path } => Locator::Rclone {
                remote: remote.clone(),
                path: clean(&format!("{path}/{name}")),
            },
        }
    }

    /// Last path component, or the remote/root name when there is none.
    pub fn name(&self) -> String {
        match self {
            Locator::Local { path } => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "/".to_string()),
            Locator::Rclone { remote, path } => match path.rsplit('/').next() {
                Some(last) if !last.is_empty() => last.to_string(),
                _ => remote.clone(),
            },
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Local { path } => write!(f, "local{}", path.display()),
            Locator::Rclone { remote, path } if path.is_empty() => write!(f, "rclone/{remote}"),
            Locator::Rclone { remote, path } => write!(f, "rclone/{remote}/{path}"),
        }
    }
}

/// Lexically normalise a slash-separated path: drops empty and `.`
/// components and resolves `..` without ever climbing above the root.
/// The result has no leading or trailing slash.
fn clean(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_local() {
        let loc = Locator::parse("local/var/media/film.mkv").unwrap();
        assert_eq!(
            loc,
            Locator::Local {
                path: PathBuf::from("/var/media/film.mkv")
            }
        );
        assert_eq!(loc.to_string(), "local/var/media/film.mkv");
        assert_eq!(loc.name(), "film.mkv");
    }

    #[test]
    fn parse_rclone() {
        let loc = Locator::parse("rclone/gdrive/Movies/film.mkv").unwrap();
        assert_eq!(
            loc,
            Locator::Rclone {
                remote: "gdrive".into(),
                path: "Movies/film.mkv".into()
            }
        );
        assert_eq!(loc.to_string(), "rclone/gdrive/Movies/film.mkv");
        assert_eq!(loc.backend(), Backend::Rclone);
    }

    #[test]
    fn rclone_remote_root() {
        let loc = Locator::parse("rclone/gdrive").unwrap();
        assert_eq!(loc.to_string(), "rclone/gdrive");
        assert_eq!(loc.name(), "gdrive");
        assert_eq!(loc.join("a.mkv").to_string(), "rclone/gdrive/a.mkv");
    }

    #[test]
    fn untagged_defaults_to_local() {
        let loc = Locator::parse("/srv/media/a.mkv").unwrap();
        assert_eq!(loc.to_string(), "local/srv/media/a.mkv");

        let loc = Locator::parse("srv/media/a.mkv").unwrap();
        assert_eq!(loc.to_string(), "local/srv/media/a.mkv");

        // A tag-lookalike prefix is just a directory name.
        let loc = Locator::parse("localfiles/a.mkv").unwrap();
        assert_eq!(loc.to_string(), "local/localfiles/a.mkv");
    }

    #[test]
    fn untagged_with_remote_default() {
        let loc = Locator::parse_with_default("gdrive/a.mkv", Backend::Rclone).unwrap();
        assert_eq!(loc.to_string(), "rclone/gdrive/a.mkv");
    }

    #[test]
    fn dot_dot_cannot_escape_root() {
        let loc = Locator::parse("local/../../etc/passwd").unwrap();
        assert_eq!(loc.to_string(), "local/etc/passwd");

        let loc = Locator::parse("rclone/gdrive/../../x").unwrap();
        assert_eq!(
            loc,
            Locator::Rclone {
                remote: "gdrive".into(),
                path: "x".into()
            }
        );
        assert!(Locator::parse("rclone/../x").is_err());
    }

    #[test]
    fn malformed_locators() {
        assert!(Locator::parse("").is_err());
        assert!(Locator::parse("///").is_err());
        assert!(Locator::parse("rclone").is_err());
        assert!(Locator::parse("rclone/").is_err());
        assert!(Locator::parse("rclone/bad:name/x").is_err());
    }

    #[test]
    fn display_parse_round_trip() {
        for s in [
            "local/",
            "local/a",
            "local/a/b c/d.mkv",
            "rclone/r",
            "rclone/r/x/y.mp4",
        ] {
            let loc = Locator::parse(s).unwrap();
            assert_eq!(Locator::parse(&loc.to_string()).unwrap(), loc, "{s}");
        }
    }
}
