//! Boolean kernel parameters under `/proc/sys`.
//!
//! Each parameter is a file holding a single ASCII digit.

use std::path::{Path, PathBuf};

use l2bridge_common::DriverResult;

/// Default location of the kernel parameter tree.
pub const PROC_SYS: &str = "/proc/sys";

/// A kernel parameter tree rooted at a directory.
#[derive(Debug, Clone)]
pub struct SysctlTree {
    root: PathBuf,
}

impl Default for SysctlTree {
    fn default() -> Self {
        Self::host()
    }
}

impl SysctlTree {
    /// The host's `/proc/sys`.
    #[must_use]
    pub fn host() -> Self {
        Self::with_root(PROC_SYS)
    }

    /// A tree rooted somewhere else (used by tests).
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the tree.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a parameter given relative to the root.
    #[must_use]
    pub fn path(&self, param: &str) -> PathBuf {
        self.root.join(param)
    }

    /// Parameter that disables IPv6 on an interface.
    #[must_use]
    pub fn disable_ipv6_param(iface: &str) -> String {
        format!("net/ipv6/conf/{iface}/disable_ipv6")
    }

    /// Whether a parameter (or parameter directory) exists.
    #[must_use]
    pub fn exists(&self, param: &str) -> bool {
        self.path(param).exists()
    }

    /// Read a boolean parameter. An empty file reads as `false`.
    pub fn get_bool(&self, param: &str) -> DriverResult<bool> {
        let line = std::fs::read(self.path(param))?;
        Ok(line.first() == Some(&b'1'))
    }

    /// Write a boolean parameter.
    pub fn set_bool(&self, param: &str, on: bool) -> DriverResult<()> {
        let value: &[u8] = if on { b"1\n" } else { b"0\n" };
        std::fs::write(self.path(param), value)?;
        tracing::debug!(param, on, "Kernel parameter set");
        Ok(())
    }

    /// Enable IPv4 forwarding.
    pub fn enable_ip_forwarding(&self) -> DriverResult<()> {
        self.set_bool("net/ipv4/ip_forward", true)?;
        tracing::info!("IP forwarding enabled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with(param: &str, contents: &str) -> (tempfile::TempDir, SysctlTree) {
        let dir = tempfile::tempdir().unwrap();
        let tree = SysctlTree::with_root(dir.path());
        let path = tree.path(param);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        (dir, tree)
    }

    #[test]
    fn test_read_single_digit() {
        let (_dir, tree) = tree_with("net/ipv4/ip_forward", "1\n");
        assert!(tree.get_bool("net/ipv4/ip_forward").unwrap());

        tree.set_bool("net/ipv4/ip_forward", false).unwrap();
        assert!(!tree.get_bool("net/ipv4/ip_forward").unwrap());
        assert_eq!(
            std::fs::read_to_string(tree.path("net/ipv4/ip_forward")).unwrap(),
            "0\n"
        );
    }

    #[test]
    fn test_empty_file_reads_false() {
        let (_dir, tree) = tree_with("net/x", "");
        assert!(!tree.get_bool("net/x").unwrap());
    }

    #[test]
    fn test_missing_param_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let tree = SysctlTree::with_root(dir.path());
        assert!(tree.get_bool("net/missing").is_err());
        assert!(!tree.exists("net/missing"));
    }

    #[test]
    fn test_enable_forwarding_writes_one() {
        let (_dir, tree) = tree_with("net/ipv4/ip_forward", "0\n");
        tree.enable_ip_forwarding().unwrap();
        assert!(tree.get_bool("net/ipv4/ip_forward").unwrap());
    }

    #[test]
    fn test_disable_ipv6_param_path() {
        assert_eq!(
            SysctlTree::disable_ipv6_param("br-0123"),
            "net/ipv6/conf/br-0123/disable_ipv6"
        );
    }
}
