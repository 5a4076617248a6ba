//! Mount and unmount flows for iSCSI-backed block volumes.

use tracing::{info, instrument};

use super::{
    BridgeError, DeviceWait, Host, IscsiTarget, MountOutcome, UnmountOutcome, wait_for_device,
};

/// Logs in to the volume's iSCSI target and mounts the resulting device at
/// `mount_dir`, formatting it first when it carries no filesystem.
///
/// An already mounted device is left alone.
///
/// # Errors
///
/// Returns [`BridgeError`] when the device path is not an iSCSI by-path
/// name, any initiator step fails, the device never appears, or the format
/// and mount step fails.
#[instrument(skip(host, options))]
pub async fn mount_device<H>(
    host: &H,
    mount_dir: &str,
    device: &str,
    fs_type: &str,
    options: &[&str],
    wait: DeviceWait,
) -> Result<MountOutcome, BridgeError>
where
    H: Host + ?Sized,
{
    let target = IscsiTarget::from_device_path(device)?;
    if host.device_opened(device)? {
        info!(device, "device already mounted");
        return Ok(MountOutcome::AlreadyMounted);
    }

    host.add_to_db(&target)?;
    host.set_automatic_login(&target)?;
    host.login(&target)?;
    wait_for_device(host, device, wait).await?;

    host.format_and_mount(device, mount_dir, fs_type, options)?;
    info!(device, mount_dir, "device mounted");
    Ok(MountOutcome::Mounted)
}

/// Unmounts `mount_path` and tears down the iSCSI session behind it.
///
/// A path with nothing mounted is treated as already unmounted.
///
/// # Errors
///
/// Returns [`BridgeError::NotIscsi`] when the mounted device has no iSCSI
/// by-path link, or the error of the failing unmount or initiator step.
#[instrument(skip(host))]
pub fn unmount_device<H>(host: &H, mount_path: &str) -> Result<UnmountOutcome, BridgeError>
where
    H: Host + ?Sized,
{
    let Some(device) = host.source_for(mount_path)? else {
        info!(mount_path, "mount point not found");
        return Ok(UnmountOutcome::NotMounted);
    };
    let link = host
        .by_path_link(&device)?
        .ok_or_else(|| BridgeError::NotIscsi {
            device: device.clone(),
            mount_point: mount_path.to_owned(),
        })?;
    let target = IscsiTarget::from_device_path(&link)?;

    host.unmount(mount_path)?;
    host.logout(&target)?;
    host.remove_from_db(&target)?;
    info!(mount_path, %target, "device unmounted and session closed");
    Ok(UnmountOutcome::Unmounted)
}
