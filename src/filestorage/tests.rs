//! Tests for the export state machine.

use std::time::Duration;

use super::*;
use crate::test_support::FakeCloud;
use rstest::{fixture, rstest};
use tokio::time::Instant;

const COMPARTMENT: &str = "ocid1.compartment.oc1..cluster";
const FILE_SYSTEM: &str = "ocid1.filesystem.oc1.phx.aaaa";
const AD: &str = "Uocm:PHX-AD-1";
const EXPORT_SET: &str = "ocid1.exportset.oc1.phx.set";
const EXPORT_PATH: &str = "/mnt/10.0.0.8/ocid1.filesystem.oc1.phx.aaaa";

fn mount_target(id: &str, state: ExportState, ips: &[&str]) -> MountTarget {
    MountTarget {
        id: id.to_owned(),
        availability_domain: AD.to_owned(),
        export_set_id: EXPORT_SET.to_owned(),
        private_ip_ids: ips.iter().map(|ip| (*ip).to_owned()).collect(),
        lifecycle_state: state,
    }
}

#[fixture]
fn cloud() -> FakeCloud {
    let cloud = FakeCloud::new();
    cloud.add_file_system(FileSystem {
        id: FILE_SYSTEM.to_owned(),
        availability_domain: AD.to_owned(),
        compartment_id: COMPARTMENT.to_owned(),
    });
    cloud.add_mount_target(mount_target(
        "ocid1.mounttarget.deleting",
        ExportState::Deleting,
        &["ocid1.privateip.old"],
    ));
    cloud.add_mount_target(mount_target(
        "ocid1.mounttarget.live",
        ExportState::Active,
        &["ocid1.privateip.a", "ocid1.privateip.b"],
    ));
    cloud.add_private_ip("ocid1.privateip.a", "10.0.0.8");
    cloud.add_private_ip("ocid1.privateip.b", "10.0.0.9");
    cloud
}

async fn resolve(cloud: &FakeCloud) -> ExportTarget {
    ExportManager::new(cloud, COMPARTMENT)
        .resolve_target(FILE_SYSTEM)
        .await
        .unwrap_or_else(|err| panic!("resolve target: {err}"))
}

#[rstest]
fn export_path_joins_address_and_file_system() {
    assert_eq!(export_path("10.0.0.8", FILE_SYSTEM), EXPORT_PATH);
}

#[rstest]
#[tokio::test]
async fn resolves_first_ip_of_active_mount_target(cloud: FakeCloud) {
    let target = resolve(&cloud).await;

    assert_eq!(target.mount_target.id, "ocid1.mounttarget.live");
    assert_eq!(target.ip_address, "10.0.0.8");
    assert_eq!(target.path(), EXPORT_PATH);
}

#[rstest]
#[tokio::test]
async fn mount_target_without_ips_is_an_error() {
    let cloud = FakeCloud::new();
    cloud.add_file_system(FileSystem {
        id: FILE_SYSTEM.to_owned(),
        availability_domain: AD.to_owned(),
        compartment_id: COMPARTMENT.to_owned(),
    });
    cloud.add_mount_target(mount_target("ocid1.mounttarget.bare", ExportState::Active, &[]));

    let err = ExportManager::new(&cloud, COMPARTMENT)
        .resolve_target(FILE_SYSTEM)
        .await
        .err()
        .unwrap_or_else(|| panic!("resolution should fail"));

    assert_eq!(
        err.to_string(),
        "mount target ocid1.mounttarget.bare has zero private IPs"
    );
}

#[rstest]
#[tokio::test]
async fn missing_mount_target_is_an_error() {
    let cloud = FakeCloud::new();
    cloud.add_file_system(FileSystem {
        id: FILE_SYSTEM.to_owned(),
        availability_domain: AD.to_owned(),
        compartment_id: COMPARTMENT.to_owned(),
    });

    let result = ExportManager::new(&cloud, COMPARTMENT)
        .resolve_target(FILE_SYSTEM)
        .await;

    assert!(matches!(result, Err(ExportError::NoMountTarget { .. })));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn attach_creates_export_and_waits_for_active(cloud: FakeCloud) {
    let target = resolve(&cloud).await;
    let manager = ExportManager::new(&cloud, COMPARTMENT);
    let start = Instant::now();

    let export = manager
        .attach(&target)
        .await
        .unwrap_or_else(|err| panic!("attach: {err}"));
    let active = manager
        .wait_for_active(&export.id)
        .await
        .unwrap_or_else(|err| panic!("wait: {err}"));

    assert_eq!(active.path, EXPORT_PATH);
    assert_eq!(start.elapsed(), Duration::from_secs(1));
    assert!(
        manager
            .is_attached(&target)
            .await
            .unwrap_or_else(|err| panic!("is attached: {err}"))
    );
}

#[rstest]
#[tokio::test]
async fn repeated_attach_reuses_export(cloud: FakeCloud) {
    let target = resolve(&cloud).await;
    let manager = ExportManager::new(&cloud, COMPARTMENT);

    let first = manager
        .attach(&target)
        .await
        .unwrap_or_else(|err| panic!("first attach: {err}"));
    let second = manager
        .attach(&target)
        .await
        .unwrap_or_else(|err| panic!("second attach: {err}"));

    assert_eq!(first.id, second.id);
    assert_eq!(cloud.calls("CreateExport"), 1);
    assert_eq!(cloud.exports().len(), 1);
}

#[rstest]
#[tokio::test]
async fn create_conflict_with_no_export_surfaces_conflict(cloud: FakeCloud) {
    let target = resolve(&cloud).await;
    cloud.fail_next(
        "CreateExport",
        CloudError::api("CreateExport", 409, "Conflict", "path in use"),
    );

    let result = ExportManager::new(&cloud, COMPARTMENT).attach(&target).await;

    assert!(matches!(result, Err(ExportError::Cloud(ref err)) if err.is_conflict()));
    assert_eq!(cloud.calls("ListExports"), 2);
}

#[rstest]
#[tokio::test]
async fn failed_export_is_fatal(cloud: FakeCloud) {
    let target = resolve(&cloud).await;
    let manager = ExportManager::new(&cloud, COMPARTMENT);
    let export = manager
        .attach(&target)
        .await
        .unwrap_or_else(|err| panic!("attach: {err}"));
    cloud.script_export_states(&export.id, &[ExportState::Failed]);

    let err = manager
        .wait_for_active(&export.id)
        .await
        .err()
        .unwrap_or_else(|| panic!("wait should fail"));

    assert_eq!(
        err.to_string(),
        "unexpected state 'FAILED' while waiting for export create"
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn detach_deletes_export_once(cloud: FakeCloud) {
    let target = resolve(&cloud).await;
    let manager = ExportManager::new(&cloud, COMPARTMENT);
    let export = manager
        .attach(&target)
        .await
        .unwrap_or_else(|err| panic!("attach: {err}"));
    manager
        .wait_for_active(&export.id)
        .await
        .unwrap_or_else(|err| panic!("wait: {err}"));

    manager
        .detach(&target)
        .await
        .unwrap_or_else(|err| panic!("detach: {err}"));
    let second = manager.detach(&target).await;

    assert!(matches!(second, Err(ExportError::NotFound { .. })));
    assert!(
        !manager
            .is_attached(&target)
            .await
            .unwrap_or_else(|err| panic!("is attached: {err}"))
    );
}

#[rstest]
#[tokio::test]
async fn export_vanishing_during_delete_counts_as_deleted(cloud: FakeCloud) {
    let target = resolve(&cloud).await;
    cloud.insert_export(Export {
        id: String::from("ocid1.export.live"),
        export_set_id: EXPORT_SET.to_owned(),
        file_system_id: FILE_SYSTEM.to_owned(),
        path: EXPORT_PATH.to_owned(),
        lifecycle_state: ExportState::Active,
    });
    cloud.fail_next(
        "GetExport",
        CloudError::api("GetExport", 404, "NotAuthorizedOrNotFound", "gone"),
    );

    ExportManager::new(&cloud, COMPARTMENT)
        .detach(&target)
        .await
        .unwrap_or_else(|err| panic!("detach: {err}"));
}

#[rstest]
#[tokio::test]
async fn creating_export_is_not_yet_attached(cloud: FakeCloud) {
    let target = resolve(&cloud).await;
    cloud.insert_export(Export {
        id: String::from("ocid1.export.pending"),
        export_set_id: EXPORT_SET.to_owned(),
        file_system_id: FILE_SYSTEM.to_owned(),
        path: EXPORT_PATH.to_owned(),
        lifecycle_state: ExportState::Creating,
    });

    let attached = ExportManager::new(&cloud, COMPARTMENT)
        .is_attached(&target)
        .await
        .unwrap_or_else(|err| panic!("is attached: {err}"));

    assert!(!attached);
}
