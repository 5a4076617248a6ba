//! Mount flows for file-storage exports.

use tracing::{info, instrument};

use super::{BridgeError, Mounter, MountOutcome};

const NFS_FS_TYPE: &str = "nfs";

/// Extracts the mount target address from an export path of the form
/// `/mnt/<ip>/<file system id>`.
///
/// # Errors
///
/// Returns [`BridgeError::InvalidDevicePath`] for any other layout.
pub fn export_address(device: &str) -> Result<&str, BridgeError> {
    device
        .split('/')
        .nth(2)
        .filter(|segment| !segment.is_empty() && device.starts_with('/'))
        .ok_or_else(|| BridgeError::InvalidDevicePath {
            device: device.to_owned(),
            reason: String::from("expected /mnt/<address>/<file system>"),
        })
}

/// Mounts the export named by `device` at `mount_dir` unless that export is
/// already mounted there.
///
/// # Errors
///
/// Returns [`BridgeError::ForeignMount`] when another source occupies
/// `mount_dir`, or [`BridgeError`] when the export path is malformed or the
/// mount fails.
#[instrument(skip(host, options))]
pub fn mount_export<H>(
    host: &H,
    mount_dir: &str,
    device: &str,
    options: &[&str],
) -> Result<MountOutcome, BridgeError>
where
    H: Mounter + ?Sized,
{
    let address = export_address(device)?;
    let source = format!("{address}:{device}");
    match host.mount_at(mount_dir)? {
        Some(entry) if entry.source == source => {
            info!(mount_dir, "export already mounted");
            return Ok(MountOutcome::AlreadyMounted);
        }
        Some(entry) => {
            return Err(BridgeError::ForeignMount {
                target: mount_dir.to_owned(),
                existing: entry.source,
                expected: source,
            });
        }
        None => {}
    }
    host.mount(&source, mount_dir, NFS_FS_TYPE, options)?;
    info!(%source, mount_dir, "export mounted");
    Ok(MountOutcome::Mounted)
}

/// Unmounts `mount_dir` without checking whether anything is mounted.
///
/// # Errors
///
/// Propagates the unmount error.
pub fn unmount_export<H>(host: &H, mount_dir: &str) -> Result<(), BridgeError>
where
    H: Mounter + ?Sized,
{
    host.unmount(mount_dir)
}
