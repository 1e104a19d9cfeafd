//! Network namespace execution context.
//!
//! Kernel-mutating calls must run in the host network namespace. A caller
//! acquires a [`NamespaceGuard`] for the duration of a top-level operation;
//! dropping the guard releases the context on every return path.

use std::fs::File;
use std::os::fd::AsFd;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use l2bridge_common::{DriverError, DriverResult};
use rustix::thread::{LinkNameSpaceType, move_into_link_name_space};

const SELF_NETNS: &str = "/proc/self/ns/net";
const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// Held while an operation executes in the host namespace.
#[must_use = "the namespace context is released when the guard is dropped"]
pub struct NamespaceGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl NamespaceGuard {
    /// Guard that runs `release` when dropped.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Guard with nothing to release.
    pub fn noop() -> Self {
        Self { release: None }
    }
}

impl Drop for NamespaceGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for NamespaceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceGuard")
            .field("armed", &self.release.is_some())
            .finish()
    }
}

/// The network namespace the driver process started in.
#[derive(Debug)]
pub struct HostNamespace {
    file: File,
    inode: u64,
}

impl HostNamespace {
    /// Capture the namespace of the current process.
    pub fn capture() -> DriverResult<Self> {
        let file = File::open(SELF_NETNS).map_err(|e| {
            DriverError::internal(format!("failed to open host network namespace: {e}"))
        })?;
        let inode = file.metadata()?.ino();
        tracing::debug!(inode, "Captured host network namespace");
        Ok(Self { file, inode })
    }

    /// Make sure the calling thread runs in the host namespace.
    pub fn enter(&self) -> DriverResult<NamespaceGuard> {
        let current = namespace_inode(Path::new(THREAD_NETNS))?;
        if current != self.inode {
            tracing::debug!(
                current,
                host = self.inode,
                "Switching thread to host network namespace"
            );
            move_into_link_name_space(self.file.as_fd(), Some(LinkNameSpaceType::Network))
                .map_err(|e| {
                    DriverError::internal(format!("failed to enter host network namespace: {e}"))
                })?;
        }
        Ok(NamespaceGuard::noop())
    }
}

fn namespace_inode(path: &Path) -> DriverResult<u64> {
    Ok(std::fs::metadata(path)?.ino())
}
