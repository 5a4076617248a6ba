//! Tests for driver selection and the block and file-storage drivers.

use std::time::Duration;

use super::*;
use crate::cloud::{Export, ExportState, FileSystem, InstanceState, MountTarget};
use crate::flexvolume::{OPTION_FS_TYPE, OPTION_VOLUME_NAME, Status};
use crate::test_support::{
    EnvGuard, FakeCloud, FakeConnector, FakeHost, TEST_COMPARTMENT, sample_config,
};
use rstest::{fixture, rstest};
use tempfile::TempDir;

const NODE: &str = "k8s-worker-1";
const INSTANCE: &str = "ocid1.instance.oc1.phx.worker1";
const OTHER_INSTANCE: &str = "ocid1.instance.oc1.phx.worker2";
const VOLUME_NAME: &str = "aaaavolume";
const VOLUME: &str = "ocid1.volume.oc1.phx.aaaavolume";
const DEVICE: &str = "/dev/disk/by-path/ip-169.254.2.2:3260-iscsi-iqn.2015-12.com.oracleiaas:ocid1.volume.oc1.phx.aaaavolume-lun-1";
const FILE_SYSTEM: &str = "ocid1.filesystem.oc1.phx.aaaafs";
const AD: &str = "Uocm:PHX-AD-1";
const MOUNT_TARGET: &str = "ocid1.mounttarget.oc1.phx.mt";
const EXPORT_PATH: &str = "/mnt/10.0.0.8/ocid1.filesystem.oc1.phx.aaaafs";
const MOUNT_DIR: &str = "/var/lib/kubelet/plugins/kubernetes.io/flexvolume/oracle/oci/mounts/pv";

const FAST: PollPolicy = PollPolicy {
    interval: Duration::from_millis(10),
    max_retries: 5,
};

struct Harness {
    _tmp: TempDir,
    cloud: FakeCloud,
    host: FakeHost,
    drivers: DriverSet<FakeConnector, FakeHost>,
}

impl Harness {
    async fn run(&self, args: &[&str]) -> DriverStatus {
        let argv: Vec<String> = args.iter().map(|arg| (*arg).to_owned()).collect();
        self.drivers.execute(&DriverTable::STANDARD, &argv).await
    }
}

fn cache_path(tmp: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(tmp.path().join("nodenamecache.json"))
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()))
}

fn seeded_cloud() -> FakeCloud {
    let cloud = FakeCloud::new();
    cloud.add_volume(VOLUME);
    cloud.add_instance(INSTANCE, NODE, InstanceState::Running);
    cloud.add_instance(OTHER_INSTANCE, "k8s-worker-2", InstanceState::Running);
    cloud.add_file_system(FileSystem {
        id: FILE_SYSTEM.to_owned(),
        availability_domain: AD.to_owned(),
        compartment_id: TEST_COMPARTMENT.to_owned(),
    });
    cloud.add_mount_target(MountTarget {
        id: MOUNT_TARGET.to_owned(),
        availability_domain: AD.to_owned(),
        export_set_id: String::from("ocid1.exportset.oc1.phx.set"),
        private_ip_ids: vec![String::from("ocid1.privateip.mt")],
        lifecycle_state: ExportState::Active,
    });
    cloud.add_private_ip("ocid1.privateip.mt", "10.0.0.8");
    cloud
}

#[fixture]
fn harness() -> Harness {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let cloud = seeded_cloud();
    let host = FakeHost::new();
    host.add_directory(MOUNT_DIR);
    let connector = FakeConnector::new(cloud.clone(), sample_config(), cache_path(&tmp));
    let drivers = DriverSet::new(connector, host.clone()).with_timing(
        FAST,
        DeviceWait {
            attempts: 3,
            interval: Duration::from_millis(10),
        },
    );
    Harness {
        _tmp: tmp,
        cloud,
        host,
        drivers,
    }
}

fn block_options() -> String {
    format!(r#"{{"{OPTION_VOLUME_NAME}":"{VOLUME_NAME}","{OPTION_FS_TYPE}":"ext4"}}"#)
}

fn fss_options() -> String {
    format!(r#"{{"{OPTION_VOLUME_NAME}":"{FILE_SYSTEM}"}}"#)
}

#[rstest]
#[case("oci", Route::Claim)]
#[case("/usr/libexec/kubernetes/kubelet-plugins/volume/exec/oracle~oci/oci", Route::Claim)]
#[case("oracle~oci-bvs", Route::Fixed(DriverKind::Block))]
#[case("/opt/oracle~oci-fss/oracle~oci-fss", Route::Fixed(DriverKind::FileStorage))]
fn table_resolves_installed_names(#[case] program: &str, #[case] expected: Route) {
    let route = DriverTable::STANDARD
        .lookup(program)
        .unwrap_or_else(|err| panic!("lookup {program}: {err}"));

    assert_eq!(route, expected);
}

#[rstest]
fn unknown_executable_is_named_in_the_error() {
    let err = DriverTable::STANDARD
        .lookup("/bin/oracle~nfs")
        .err()
        .unwrap_or_else(|| panic!("lookup should fail"));

    assert_eq!(err.to_string(), "No driver found for nfs");
}

#[rstest]
#[case(&["oci", "detach", VOLUME, NODE], DriverKind::Block)]
#[case(&["oci", "detach", VOLUME_NAME, NODE], DriverKind::Block)]
#[case(&["oci", "detach", FILE_SYSTEM, NODE], DriverKind::FileStorage)]
#[case(&["oci", "init"], DriverKind::Block)]
#[case(&["oci", "unmountdevice", MOUNT_DIR], DriverKind::Block)]
fn claim_route_follows_the_volume_identifier(#[case] args: &[&str], #[case] expected: DriverKind) {
    let argv: Vec<String> = args.iter().map(|arg| (*arg).to_owned()).collect();
    let call_out = CallOut::parse(&argv).unwrap_or_else(|err| panic!("parse: {err}"));

    let kind = Route::Claim
        .select(&call_out, &FakeHost::new())
        .unwrap_or_else(|err| panic!("select: {err}"));

    assert_eq!(kind, expected);
}

#[rstest]
#[case::nfs_export("10.0.0.8:/mnt/10.0.0.8/fs", "nfs", DriverKind::FileStorage)]
#[case::block_device(DEVICE, "ext4", DriverKind::Block)]
fn claim_route_unmounts_by_mount_type(
    #[case] source: &str,
    #[case] fs_type: &str,
    #[case] expected: DriverKind,
) {
    let host = FakeHost::new();
    host.add_mount(source, MOUNT_DIR, fs_type);
    let argv: Vec<String> = ["oci", "unmountdevice", MOUNT_DIR]
        .iter()
        .map(|arg| (*arg).to_owned())
        .collect();
    let call_out = CallOut::parse(&argv).unwrap_or_else(|err| panic!("parse: {err}"));

    let kind = Route::Claim
        .select(&call_out, &host)
        .unwrap_or_else(|err| panic!("select: {err}"));

    assert_eq!(kind, expected);
}

#[rstest]
fn claim_route_rejects_foreign_identifiers() {
    let argv: Vec<String> = ["oci", "detach", "ocid1.bucket.oc1.phx.x", NODE]
        .iter()
        .map(|arg| (*arg).to_owned())
        .collect();
    let call_out = CallOut::parse(&argv).unwrap_or_else(|err| panic!("parse: {err}"));

    let result = Route::Claim.select(&call_out, &FakeHost::new());

    assert!(matches!(result, Err(DriverError::Unclaimed { ref volume }) if volume == "ocid1.bucket.oc1.phx.x"));
}

#[rstest]
#[tokio::test]
async fn init_reports_capabilities(harness: Harness) {
    let status = harness.run(&["oci", "init"]).await;

    assert_eq!(status.status, Status::Success);
    assert_eq!(status.capabilities, Some(CAPABILITIES));
}

#[rstest]
#[tokio::test]
async fn init_without_config_assumes_a_worker_node() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let connector = FakeConnector::unconfigured(FakeCloud::new(), cache_path(&tmp));
    let drivers = DriverSet::new(connector, FakeHost::new());

    let status = drivers
        .execute(&DriverTable::STANDARD, &[String::from("oci"), String::from("init")])
        .await;

    assert_eq!(status.status, Status::Success);
    assert_eq!(status.capabilities, Some(CAPABILITIES));
}

#[rstest]
#[tokio::test]
async fn attach_without_config_fails() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let connector = FakeConnector::unconfigured(FakeCloud::new(), cache_path(&tmp));
    let drivers = DriverSet::new(connector, FakeHost::new());
    let options = block_options();
    let args: Vec<String> = ["oci", "attach", options.as_str(), NODE]
        .iter()
        .map(|arg| (*arg).to_owned())
        .collect();

    let status = drivers.execute(&DriverTable::STANDARD, &args).await;

    assert_eq!(status.status, Status::Failure);
    assert!(
        status
            .message
            .as_deref()
            .is_some_and(|message| message.contains("does not exist")),
        "unexpected message {:?}",
        status.message
    );
}

#[rstest]
#[tokio::test]
async fn unknown_driver_name_is_a_failure(harness: Harness) {
    let status = harness.run(&["oracle~oci-nfs", "init"]).await;

    assert_eq!(status.status, Status::Failure);
    assert_eq!(status.message.as_deref(), Some("No driver found for oci-nfs"));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn attach_is_idempotent(harness: Harness) {
    let options = block_options();

    let first = harness.run(&["oci", "attach", &options, NODE]).await;
    let second = harness.run(&["oci", "attach", &options, NODE]).await;

    assert_eq!(first.status, Status::Success, "{first:?}");
    assert_eq!(first.device.as_deref(), Some(DEVICE));
    assert_eq!(second.device, first.device);
    assert_eq!(harness.cloud.attachments().len(), 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn attach_to_a_second_node_names_the_owner(harness: Harness) {
    let options = block_options();
    harness.run(&["oci", "attach", &options, NODE]).await;

    let status = harness
        .run(&["oci", "attach", &options, "k8s-worker-2"])
        .await;

    assert_eq!(status.status, Status::Failure);
    assert_eq!(
        status.message,
        Some(format!("already attached to instance: {INSTANCE}"))
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn attach_fails_for_an_unknown_node(harness: Harness) {
    let status = harness
        .run(&["oci", "attach", &block_options(), "k8s-missing"])
        .await;

    assert_eq!(status.status, Status::Failure);
}

#[rstest]
#[tokio::test]
async fn attach_requires_a_volume_name(harness: Harness) {
    let status = harness
        .run(&["oci-bvs", "attach", r#"{"kubernetes.io/fsType":"ext4"}"#, NODE])
        .await;

    assert_eq!(status.status, Status::Failure);
    assert_eq!(
        status.message.as_deref(),
        Some("options do not name a volume (kubernetes.io/pvOrVolumeName)")
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn second_detach_reports_the_missing_attachment(harness: Harness) {
    harness.run(&["oci", "attach", &block_options(), NODE]).await;

    let first = harness.run(&["oci", "detach", VOLUME_NAME, NODE]).await;
    let second = harness.run(&["oci", "detach", VOLUME_NAME, NODE]).await;

    assert_eq!(first.status, Status::Success, "{first:?}");
    assert_eq!(second.status, Status::Failure);
    assert_eq!(
        second.message,
        Some(format!("failed to find volume attachment for '{VOLUME}'"))
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn is_attached_tracks_the_attachment(harness: Harness) {
    let options = block_options();

    let before = harness.run(&["oci", "isattached", &options, NODE]).await;
    harness.run(&["oci", "attach", &options, NODE]).await;
    let after = harness.run(&["oci", "isattached", &options, NODE]).await;

    assert_eq!(before.status, Status::Success);
    assert!(!before.attached);
    assert_eq!(
        before.message,
        Some(format!("failed to find volume attachment for '{VOLUME}'"))
    );
    assert_eq!(after.status, Status::Success);
    assert!(after.attached);
}

#[rstest]
#[tokio::test]
async fn wait_for_attach_echoes_the_device(harness: Harness) {
    let status = harness
        .run(&["oci", "waitforattach", DEVICE, &block_options()])
        .await;

    assert_eq!(status.status, Status::Success);
    assert_eq!(status.device.as_deref(), Some(DEVICE));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn block_mount_and_unmount_are_idempotent(harness: Harness) {
    let options = block_options();

    let mounted = harness
        .run(&["oci", "mountdevice", MOUNT_DIR, DEVICE, &options])
        .await;
    let remounted = harness
        .run(&["oci", "mountdevice", MOUNT_DIR, DEVICE, &options])
        .await;
    let unmounted = harness.run(&["oci", "unmountdevice", MOUNT_DIR]).await;
    let again = harness.run(&["oci", "unmountdevice", MOUNT_DIR]).await;

    assert_eq!(mounted.status, Status::Success, "{mounted:?}");
    assert_eq!(
        remounted.message.as_deref(),
        Some("Device already mounted. Nothing to do.")
    );
    assert_eq!(harness.host.formats(), 1);
    assert_eq!(unmounted.status, Status::Success, "{unmounted:?}");
    assert_eq!(
        again.message.as_deref(),
        Some("Mount point not found. Nothing to do.")
    );
    assert!(harness.host.sessions().is_empty());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn block_mount_fails_when_the_device_never_appears(harness: Harness) {
    harness.host.withhold_devices();

    let status = harness
        .run(&["oci-bvs", "mountdevice", MOUNT_DIR, DEVICE, &block_options()])
        .await;

    assert_eq!(status.status, Status::Failure);
    assert_eq!(
        status.message,
        Some(format!("device {DEVICE} did not appear after 3 checks"))
    );
}

#[rstest]
#[case("mount")]
#[case("unmount")]
#[tokio::test]
async fn pod_level_mounts_are_not_supported(harness: Harness, #[case] verb: &str) {
    let args: Vec<&str> = if verb == "mount" {
        vec!["oci", verb, MOUNT_DIR, "{}"]
    } else {
        vec!["oci", verb, MOUNT_DIR]
    };

    let status = harness.run(&args).await;

    assert_eq!(status.status, Status::NotSupported);
    assert_eq!(status.exit_code(), 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn file_system_attach_exports_once(harness: Harness) {
    let options = fss_options();

    let first = harness.run(&["oci", "attach", &options, NODE]).await;
    let second = harness.run(&["oracle~oci-fss", "attach", &options, NODE]).await;

    assert_eq!(first.status, Status::Success, "{first:?}");
    assert_eq!(first.device.as_deref(), Some(EXPORT_PATH));
    assert_eq!(second.device.as_deref(), Some(EXPORT_PATH));
    let exports: Vec<Export> = harness.cloud.exports();
    assert_eq!(exports.len(), 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn file_system_is_attached_follows_the_export(harness: Harness) {
    let options = fss_options();

    let before = harness.run(&["oci", "isattached", &options, NODE]).await;
    harness.run(&["oci", "attach", &options, NODE]).await;
    let after = harness.run(&["oci", "isattached", &options, NODE]).await;

    assert_eq!(before.status, Status::Success);
    assert!(!before.attached);
    assert!(after.attached);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn file_system_detach_names_the_mount_target(harness: Harness) {
    harness.run(&["oci", "attach", &fss_options(), NODE]).await;

    let status = harness.run(&["oci", "detach", FILE_SYSTEM, NODE]).await;

    assert_eq!(status.status, Status::Success, "{status:?}");
    assert_eq!(
        status.message,
        Some(format!("Detach {FILE_SYSTEM} from {MOUNT_TARGET}"))
    );
}

#[rstest]
#[tokio::test]
async fn file_system_mount_uses_the_export_address(harness: Harness) {
    let status = harness
        .run(&["oci-fss", "mountdevice", MOUNT_DIR, EXPORT_PATH, "{}"])
        .await;
    let again = harness
        .run(&["oci-fss", "mountdevice", MOUNT_DIR, EXPORT_PATH, "{}"])
        .await;
    let unmounted = harness.run(&["oci-fss", "unmountdevice", MOUNT_DIR]).await;

    assert_eq!(status.status, Status::Success, "{status:?}");
    assert_eq!(again.status, Status::Success);
    assert_eq!(
        harness.host.mount_table().len(),
        0,
        "unmount should clear the single entry"
    );
    assert_eq!(
        unmounted.message,
        Some(format!("UnmountDevice:{MOUNT_DIR}"))
    );
}

#[rstest]
#[tokio::test]
async fn generic_name_unmounts_a_file_system_it_mounted(harness: Harness) {
    let options = fss_options();

    let mounted = harness
        .run(&["oci", "mountdevice", MOUNT_DIR, EXPORT_PATH, &options])
        .await;
    let unmounted = harness.run(&["oci", "unmountdevice", MOUNT_DIR]).await;

    assert_eq!(mounted.status, Status::Success, "{mounted:?}");
    assert_eq!(unmounted.status, Status::Success, "{unmounted:?}");
    assert_eq!(
        unmounted.message,
        Some(format!("UnmountDevice:{MOUNT_DIR}"))
    );
    assert!(harness.host.mount_table().is_empty());
}

#[rstest]
#[tokio::test]
async fn file_system_mount_refuses_an_occupied_directory(harness: Harness) {
    harness.host.add_mount("10.9.9.9:/other", MOUNT_DIR, "nfs");

    let status = harness
        .run(&["oci-fss", "mountdevice", MOUNT_DIR, EXPORT_PATH, "{}"])
        .await;

    assert_eq!(status.status, Status::Failure, "{status:?}");
    assert!(
        status
            .message
            .as_deref()
            .is_some_and(|message| message.contains("10.9.9.9:/other")),
        "{status:?}"
    );
    let table = harness.host.mount_table();
    assert_eq!(table.len(), 1);
    assert!(table.iter().all(|entry| entry.source == "10.9.9.9:/other"));
}

#[rstest]
#[tokio::test]
async fn file_system_mount_rejects_a_malformed_export(harness: Harness) {
    let status = harness
        .run(&["oci-fss", "mountdevice", MOUNT_DIR, "10.0.0.8:/share", "{}"])
        .await;

    assert_eq!(status.status, Status::Failure);
}

fn write_pem(tmp: &TempDir) -> String {
    let dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    cap_std::fs_utf8::Dir::open_ambient_dir(&dir, cap_std::ambient_authority())
        .and_then(|handle| handle.write("ca.pem", "-----BEGIN CERTIFICATE-----"))
        .unwrap_or_else(|err| panic!("write pem: {err}"));
    dir.join("ca.pem").into_string()
}

#[rstest]
#[tokio::test]
async fn http_settings_follow_proxy_and_trusted_ca_variables() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let pem = write_pem(&tmp);
    let _env = EnvGuard::set_vars(&[
        (PROXY_ENV, "http://proxy.internal:3128"),
        (TRUSTED_CA_ENV, pem.as_str()),
    ])
    .await;

    let settings = HttpConnector::settings(&sample_config())
        .unwrap_or_else(|err| panic!("settings: {err}"));

    assert_eq!(settings.region, "us-phoenix-1");
    assert_eq!(settings.proxy.as_deref(), Some("http://proxy.internal:3128"));
    assert_eq!(
        settings.trusted_ca_pem.as_deref(),
        Some(b"-----BEGIN CERTIFICATE-----".as_slice())
    );
}

#[rstest]
#[tokio::test]
async fn http_settings_ignore_unset_and_blank_variables() {
    let _env = EnvGuard::apply(&[(PROXY_ENV, "  ")], &[TRUSTED_CA_ENV]).await;

    let settings = HttpConnector::settings(&sample_config())
        .unwrap_or_else(|err| panic!("settings: {err}"));

    assert_eq!(settings.proxy, None);
    assert_eq!(settings.trusted_ca_pem, None);
}

#[rstest]
#[tokio::test]
async fn missing_trusted_ca_file_is_a_config_error() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let missing = tmp.path().join("absent.pem");
    let missing_path = missing
        .to_str()
        .unwrap_or_else(|| panic!("temp path should be utf8"));
    let _env = EnvGuard::set_vars(&[(TRUSTED_CA_ENV, missing_path)]).await;

    let result = HttpConnector::settings(&sample_config());

    assert!(matches!(
        result,
        Err(DriverError::Config(ConfigError::Io { .. }))
    ));
}
