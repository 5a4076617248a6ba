//! BDD step definitions for the volume lifecycle scenarios.

use oci_flexvolume::flexvolume::{DriverStatus, Status};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{
    DEVICE, EXPORT_PATH, FILE_SYSTEM, LifecycleContext, LifecycleTestError, MOUNT_DIR,
    VOLUME_NAME, seed_block_volume, seed_file_system,
};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Setup(#[from] LifecycleTestError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a configured cluster with a block volume")]
fn cluster_with_block_volume(lifecycle_context: LifecycleContext) -> LifecycleContext {
    seed_block_volume(&lifecycle_context.cloud);
    lifecycle_context
}

#[given("a configured cluster with a file system")]
fn cluster_with_file_system(lifecycle_context: LifecycleContext) -> LifecycleContext {
    seed_file_system(&lifecycle_context.cloud);
    lifecycle_context
}

#[when("the controller attaches the block volume to \"{node}\"")]
fn attach_block_volume(
    lifecycle_context: LifecycleContext,
    node: String,
) -> Result<LifecycleContext, StepError> {
    let options = LifecycleContext::block_options();
    lifecycle_context
        .call(&["oci", "attach", &options, node.trim()])
        .map_err(StepError::from)
}

#[when("the controller detaches the block volume from \"{node}\"")]
fn detach_block_volume(
    lifecycle_context: LifecycleContext,
    node: String,
) -> Result<LifecycleContext, StepError> {
    lifecycle_context
        .call(&["oci", "detach", VOLUME_NAME, node.trim()])
        .map_err(StepError::from)
}

#[when("the controller attaches the file system to \"{node}\"")]
fn attach_file_system(
    lifecycle_context: LifecycleContext,
    node: String,
) -> Result<LifecycleContext, StepError> {
    let options = LifecycleContext::file_system_options();
    lifecycle_context
        .call(&["oracle~oci", "attach", &options, node.trim()])
        .map_err(StepError::from)
}

#[when("the kubelet mounts the block device")]
fn mount_block_device(lifecycle_context: LifecycleContext) -> Result<LifecycleContext, StepError> {
    let options = LifecycleContext::block_options();
    lifecycle_context
        .call(&["oci", "mountdevice", MOUNT_DIR, DEVICE, &options])
        .map_err(StepError::from)
}

#[when("the kubelet unmounts the global mount path")]
fn unmount_block_device(
    lifecycle_context: LifecycleContext,
) -> Result<LifecycleContext, StepError> {
    lifecycle_context
        .call(&["oci", "unmountdevice", MOUNT_DIR])
        .map_err(StepError::from)
}

#[when("the kubelet mounts the file system export")]
fn mount_export(lifecycle_context: LifecycleContext) -> Result<LifecycleContext, StepError> {
    let options = LifecycleContext::file_system_options();
    lifecycle_context
        .call(&["oci-fss", "mountdevice", MOUNT_DIR, EXPORT_PATH, &options])
        .map_err(StepError::from)
}

#[when("the kubelet mounts the file system export through \"{driver}\"")]
fn mount_export_through(
    lifecycle_context: LifecycleContext,
    driver: String,
) -> Result<LifecycleContext, StepError> {
    let options = LifecycleContext::file_system_options();
    lifecycle_context
        .call(&[driver.trim(), "mountdevice", MOUNT_DIR, EXPORT_PATH, &options])
        .map_err(StepError::from)
}

#[then("every call-out succeeded")]
fn every_call_succeeded(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    match lifecycle_context
        .statuses
        .iter()
        .find(|status| status.status != Status::Success)
    {
        None if !lifecycle_context.statuses.is_empty() => Ok(()),
        None => Err(StepError::Assertion(String::from("no call-out was made"))),
        Some(status) => Err(StepError::Assertion(format!(
            "unexpected status: {}",
            status.to_json()
        ))),
    }
}

#[then("both attach calls returned the same iSCSI device")]
fn same_device(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let devices: Vec<Option<&str>> = lifecycle_context
        .statuses
        .iter()
        .map(|status| status.device.as_deref())
        .collect();
    if devices == [Some(DEVICE), Some(DEVICE)] {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected devices: {devices:?}")))
    }
}

#[then("the control plane holds one attachment")]
fn one_attachment(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let count = lifecycle_context.cloud.attachments().len();
    if count == 1 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("expected one attachment, found {count}")))
    }
}

#[then("the last call-out failed with \"{message}\"")]
fn last_call_failed(
    lifecycle_context: &LifecycleContext,
    message: String,
) -> Result<(), StepError> {
    let Some(last) = lifecycle_context.statuses.last() else {
        return Err(StepError::Assertion(String::from("no call-out was made")));
    };
    if last_failed_with(last, message.trim()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected status: {}", last.to_json())))
    }
}

#[then("the device was formatted once")]
fn formatted_once(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let formats = lifecycle_context.host.formats();
    if formats == 1 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("expected one format, found {formats}")))
    }
}

#[then("no iSCSI session remains")]
fn no_sessions(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let sessions = lifecycle_context.host.sessions();
    if sessions.is_empty() && lifecycle_context.host.initiator_records().is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("sessions left open: {sessions:?}")))
    }
}

#[then("the control plane holds one export")]
fn one_export(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let exports = lifecycle_context.cloud.exports();
    match exports.as_slice() {
        [export] if export.file_system_id == FILE_SYSTEM && export.path == EXPORT_PATH => Ok(()),
        other => Err(StepError::Assertion(format!("unexpected exports: {other:?}"))),
    }
}

#[then("the export is mounted once")]
fn export_mounted_once(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let mounts = lifecycle_context.host.mount_table();
    let expected_source = format!("10.0.0.8:{EXPORT_PATH}");
    match mounts.as_slice() {
        [entry] if entry.source == expected_source && entry.target == MOUNT_DIR => Ok(()),
        other => Err(StepError::Assertion(format!("unexpected mounts: {other:?}"))),
    }
}

#[then("nothing is mounted at the global mount path")]
fn nothing_mounted(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let mounts = lifecycle_context.host.mount_table();
    if mounts.iter().any(|entry| entry.target == MOUNT_DIR) {
        Err(StepError::Assertion(format!("still mounted: {mounts:?}")))
    } else {
        Ok(())
    }
}

fn last_failed_with(status: &DriverStatus, expected_substring: &str) -> bool {
    status.status == Status::Failure
        && status
            .message
            .as_deref()
            .is_some_and(|message| message.contains(expected_substring))
}
