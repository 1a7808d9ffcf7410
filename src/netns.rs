//! Process-to-namespace resolution
//!
//! Maps a target process id to its network namespace handle under
//! `/proc/<pid>/ns/net`. nsgard never creates or destroys namespaces; it only
//! resolves an existing handle and scopes every iptables invocation to it.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::error::{Error, Result};

/// Opaque handle to a network namespace, identified by its filesystem path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetnsPath {
    path: PathBuf,
    key: String,
}

impl NetnsPath {
    /// Resolves the network namespace of a running process.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdentityResolution`] when the process does not exist
    /// or its namespace file is not accessible.
    pub fn from_pid(pid: u32) -> Result<Self> {
        let path = PathBuf::from(format!("/proc/{pid}/ns/net"));
        if !path.exists() {
            return Err(Error::IdentityResolution {
                target: format!("pid {pid}"),
                message: format!("{} does not exist", path.display()),
            });
        }
        debug!("resolved pid {pid} to namespace {}", path.display());
        Ok(Self::unchecked(path))
    }

    /// Wraps an explicit namespace path (e.g. a bind-mounted handle under
    /// `/run/netns/`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdentityResolution`] when the path does not exist.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(Error::IdentityResolution {
                target: path.display().to_string(),
                message: "namespace path does not exist".to_string(),
            });
        }
        Ok(Self::unchecked(path))
    }

    fn unchecked(path: PathBuf) -> Self {
        let key = path.display().to_string();
        Self { path, key }
    }

    /// Filesystem path of the namespace handle
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// Stable string key identifying this namespace (used for the
    /// per-namespace reconciliation lock and error context)
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pid_self() {
        let pid = std::process::id();
        let ns = NetnsPath::from_pid(pid).unwrap();
        assert_eq!(ns.as_path(), Path::new(&format!("/proc/{pid}/ns/net")));
        assert!(ns.key().contains(&pid.to_string()));
    }

    #[test]
    fn test_from_pid_nonexistent() {
        // PID max on Linux is < 2^22 by default; u32::MAX never exists
        let err = NetnsPath::from_pid(u32::MAX).unwrap_err();
        assert!(matches!(err, Error::IdentityResolution { .. }));
        assert!(err.to_string().contains(&u32::MAX.to_string()));
    }

    #[test]
    fn test_from_path_missing() {
        let err = NetnsPath::from_path("/run/netns/does-not-exist-nsgard").unwrap_err();
        assert!(matches!(err, Error::IdentityResolution { .. }));
    }

    #[test]
    fn test_from_path_existing() {
        let ns = NetnsPath::from_path("/proc/self/ns/net").unwrap();
        assert_eq!(ns.key(), "/proc/self/ns/net");
    }
}
