//! Local device bridge: iSCSI sessions, block devices and mounts on the node.
//!
//! The bridge only runs once the remote attachment is stable. It moves a
//! volume between ATTACHED and MOUNTED and never talks to the control plane.
//! Host capabilities sit behind [`IscsiInitiator`], [`BlockDevices`] and
//! [`Mounter`] so the flows in [`block`] and [`nfs`] can run against an
//! in-memory host in tests.

pub mod block;
pub mod command;
mod iscsi;
mod linux;
pub mod nfs;

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::debug;

pub use command::{CommandOutput, CommandRunner, ProcessCommandRunner};
pub use iscsi::{IscsiAdm, IscsiTarget};
pub use linux::LinuxHost;

/// Errors raised by local device operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BridgeError {
    /// Raised when a device string is not a recognised iSCSI by-path name.
    #[error("invalid device path {device}: {reason}")]
    InvalidDevicePath {
        /// Device string supplied by the caller.
        device: String,
        /// What was wrong with it.
        reason: String,
    },
    /// Raised when an external command cannot be started.
    #[error("failed to run {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Error reported by the OS.
        message: String,
    },
    /// Raised when an external command exits unsuccessfully.
    #[error("{program} exited with status {code:?}: {stderr}")]
    Command {
        /// Program that failed.
        program: String,
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// Raised when reading host state fails.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path being accessed.
        path: String,
        /// Underlying I/O error.
        message: String,
    },
    /// Raised when a device never appears after login.
    #[error("device {device} did not appear after {attempts} checks")]
    DeviceMissing {
        /// Expected device path.
        device: String,
        /// Number of checks performed.
        attempts: u32,
    },
    /// Raised when the device already carries a different filesystem.
    #[error("device {device} already contains a {existing} filesystem, not {requested}")]
    FilesystemMismatch {
        /// Device being mounted.
        device: String,
        /// Filesystem found on the device.
        existing: String,
        /// Filesystem the caller requested.
        requested: String,
    },
    /// Raised when a mounted device has no iSCSI by-path link.
    #[error("device {device} mounted at {mount_point} is not an iSCSI device")]
    NotIscsi {
        /// Mounted device.
        device: String,
        /// Mount point that was being torn down.
        mount_point: String,
    },
    /// Raised when a different source already occupies a mount point.
    #[error("{target} already has {existing} mounted, not {expected}")]
    ForeignMount {
        /// Mount point.
        target: String,
        /// Source found at the mount point.
        existing: String,
        /// Source the caller asked for.
        expected: String,
    },
    /// Raised when a mount or unmount leaves the host in the wrong state.
    #[error("mount operation on {target} failed: {message}")]
    Mount {
        /// Mount point.
        target: String,
        /// Description of the failure.
        message: String,
    },
}

/// One line of the host mount table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MountEntry {
    /// Mounted source, a device path or `host:/path` for NFS.
    pub source: String,
    /// Mount point.
    pub target: String,
    /// Filesystem type.
    pub fs_type: String,
}

impl MountEntry {
    /// Returns `true` for NFS mounts.
    #[must_use]
    pub fn is_nfs(&self) -> bool {
        self.fs_type.starts_with("nfs")
    }
}

/// Local iSCSI initiator database and session control.
pub trait IscsiInitiator: Send + Sync {
    /// Records the target in the initiator database.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError`] when the initiator rejects the request.
    fn add_to_db(&self, target: &IscsiTarget) -> Result<(), BridgeError>;

    /// Marks the target for automatic login at boot.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError`] when the initiator rejects the request.
    fn set_automatic_login(&self, target: &IscsiTarget) -> Result<(), BridgeError>;

    /// Opens a session to the target.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError`] when login fails.
    fn login(&self, target: &IscsiTarget) -> Result<(), BridgeError>;

    /// Closes the session to the target.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError`] when logout fails.
    fn logout(&self, target: &IscsiTarget) -> Result<(), BridgeError>;

    /// Deletes the target from the initiator database.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError`] when the record cannot be removed.
    fn remove_from_db(&self, target: &IscsiTarget) -> Result<(), BridgeError>;
}

/// Block device inspection and formatting.
pub trait BlockDevices: Send + Sync {
    /// Returns `true` when the device node exists.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] when the check itself fails.
    fn device_exists(&self, device: &str) -> Result<bool, BridgeError>;

    /// Returns `true` when the device is currently mounted anywhere.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError`] when the mount table cannot be read.
    fn device_opened(&self, device: &str) -> Result<bool, BridgeError>;

    /// Returns the `/dev/disk/by-path` name of a device, if it has one.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] when the by-path directory cannot be read.
    fn by_path_link(&self, device: &str) -> Result<Option<String>, BridgeError>;

    /// Formats the device with `fs_type` if it carries no filesystem, then
    /// mounts it at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::FilesystemMismatch`] when the device already
    /// holds a different filesystem, or the underlying command error.
    fn format_and_mount(
        &self,
        device: &str,
        target: &str,
        fs_type: &str,
        options: &[&str],
    ) -> Result<(), BridgeError>;
}

/// Mount table access.
pub trait Mounter: Send + Sync {
    /// Lists the current mounts.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] when the mount table cannot be read.
    fn mounts(&self) -> Result<Vec<MountEntry>, BridgeError>;

    /// Mounts `source` at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError`] when the mount fails, including when
    /// `target` does not exist.
    fn mount(
        &self,
        source: &str,
        target: &str,
        fs_type: &str,
        options: &[&str],
    ) -> Result<(), BridgeError>;

    /// Unmounts `target`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError`] when the unmount fails.
    fn unmount(&self, target: &str) -> Result<(), BridgeError>;

    /// Returns `true` when something is mounted at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] when the mount table cannot be read.
    fn is_mount_point(&self, path: &str) -> Result<bool, BridgeError> {
        Ok(self.mount_at(path)?.is_some())
    }

    /// Returns what is mounted at `path`, if anything.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] when the mount table cannot be read.
    fn source_for(&self, path: &str) -> Result<Option<String>, BridgeError> {
        Ok(self.mount_at(path)?.map(|entry| entry.source))
    }

    /// Returns the topmost mount at `path`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] when the mount table cannot be read.
    fn mount_at(&self, path: &str) -> Result<Option<MountEntry>, BridgeError> {
        let wanted = path.trim_end_matches('/');
        Ok(self
            .mounts()?
            .into_iter()
            .rev()
            .find(|entry| entry.target.trim_end_matches('/') == wanted))
    }
}

/// Everything the node-side flows need from the host.
pub trait Host: IscsiInitiator + BlockDevices + Mounter {}

impl<T> Host for T where T: IscsiInitiator + BlockDevices + Mounter {}

/// Bounded poll for a device node to appear.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DeviceWait {
    /// Number of existence checks.
    pub attempts: u32,
    /// Delay between checks.
    pub interval: Duration,
}

impl Default for DeviceWait {
    fn default() -> Self {
        Self {
            attempts: 20,
            interval: Duration::from_secs(1),
        }
    }
}

/// Waits until `device` exists, checking `wait.attempts` times.
///
/// # Errors
///
/// Returns [`BridgeError::DeviceMissing`] when the device never appears, or
/// the error raised by the existence check.
pub async fn wait_for_device<H>(host: &H, device: &str, wait: DeviceWait) -> Result<(), BridgeError>
where
    H: BlockDevices + ?Sized,
{
    for attempt in 1..=wait.attempts {
        if host.device_exists(device)? {
            debug!(device, attempt, "device is present");
            return Ok(());
        }
        if attempt < wait.attempts {
            sleep(wait.interval).await;
        }
    }
    Err(BridgeError::DeviceMissing {
        device: device.to_owned(),
        attempts: wait.attempts,
    })
}

/// Outcome of a mount-device request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MountOutcome {
    /// The volume was mounted by this call.
    Mounted,
    /// The volume was already mounted; nothing changed.
    AlreadyMounted,
}

/// Outcome of an unmount-device request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnmountOutcome {
    /// The volume was unmounted by this call.
    Unmounted,
    /// Nothing was mounted at the path; nothing changed.
    NotMounted,
}

/// Mount options derived from the orchestrator's read-write flag.
#[must_use]
pub fn mount_options(read_write: Option<&str>) -> Vec<&'static str> {
    if read_write == Some("ro") {
        vec!["ro"]
    } else {
        Vec::new()
    }
}
