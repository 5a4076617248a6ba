//! Shared fixtures for the volume lifecycle scenarios.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use oci_flexvolume::attachment::PollPolicy;
use oci_flexvolume::bridge::DeviceWait;
use oci_flexvolume::cloud::{ExportState, FileSystem, InstanceState, MountTarget};
use oci_flexvolume::driver::{DriverSet, DriverTable};
use oci_flexvolume::flexvolume::DriverStatus;
use oci_flexvolume::test_support::{
    FakeCloud, FakeConnector, FakeHost, TEST_COMPARTMENT, sample_config,
};
use rstest::fixture;
use tempfile::TempDir;
use thiserror::Error;
use tokio::runtime::Runtime;

pub const VOLUME_NAME: &str = "aaaavolume";
pub const VOLUME: &str = "ocid1.volume.oc1.phx.aaaavolume";
pub const DEVICE: &str = "/dev/disk/by-path/ip-169.254.2.2:3260-iscsi-iqn.2015-12.com.oracleiaas:ocid1.volume.oc1.phx.aaaavolume-lun-1";
pub const FILE_SYSTEM: &str = "ocid1.filesystem.oc1.phx.aaaafs";
pub const EXPORT_PATH: &str = "/mnt/10.0.0.8/ocid1.filesystem.oc1.phx.aaaafs";
pub const MOUNT_DIR: &str = "/var/lib/kubelet/plugins/kubernetes.io/flexvolume/oracle/oci/mounts/pv";
const AD: &str = "Uocm:PHX-AD-1";

const POLICY: PollPolicy = PollPolicy {
    interval: Duration::from_millis(1),
    max_retries: 10,
};

const DEVICE_WAIT: DeviceWait = DeviceWait {
    attempts: 3,
    interval: Duration::from_millis(1),
};

#[derive(Clone, Debug)]
pub struct LifecycleContext {
    pub cloud: FakeCloud,
    pub host: FakeHost,
    pub connector: FakeConnector,
    pub statuses: Vec<DriverStatus>,
    pub(crate) cache_tmp: Arc<TempDir>,
}

#[derive(Clone, Debug, Error)]
pub enum LifecycleTestError {
    #[error("failed to create workspace: {0}")]
    Workspace(String),
    #[error("failed to start runtime: {0}")]
    Runtime(String),
}

impl LifecycleContext {
    /// Runs one call-out through the standard driver table and records its
    /// status.
    pub fn call(mut self, args: &[&str]) -> Result<Self, LifecycleTestError> {
        let runtime = Runtime::new().map_err(|err| LifecycleTestError::Runtime(err.to_string()))?;
        let drivers = DriverSet::new(self.connector.clone(), self.host.clone())
            .with_timing(POLICY, DEVICE_WAIT);
        let argv: Vec<String> = args.iter().map(|arg| (*arg).to_owned()).collect();
        let status = runtime.block_on(drivers.execute(&DriverTable::STANDARD, &argv));
        self.statuses.push(status);
        Ok(self)
    }

    pub fn block_options() -> String {
        format!(
            r#"{{"kubernetes.io/pvOrVolumeName":"{VOLUME_NAME}","kubernetes.io/fsType":"ext4"}}"#
        )
    }

    pub fn file_system_options() -> String {
        format!(r#"{{"kubernetes.io/pvOrVolumeName":"{FILE_SYSTEM}"}}"#)
    }
}

#[fixture]
pub fn lifecycle_context_result() -> Result<LifecycleContext, LifecycleTestError> {
    build_lifecycle_context()
}

#[fixture]
pub fn lifecycle_context(
    lifecycle_context_result: Result<LifecycleContext, LifecycleTestError>,
) -> LifecycleContext {
    lifecycle_context_result
        .unwrap_or_else(|err| panic!("lifecycle context fixture should initialise: {err}"))
}

pub fn build_lifecycle_context() -> Result<LifecycleContext, LifecycleTestError> {
    let tmp_dir =
        TempDir::new().map_err(|err| LifecycleTestError::Workspace(format!("tempdir: {err}")))?;
    let cache_path = Utf8PathBuf::from_path_buf(tmp_dir.path().join("nodenamecache.json"))
        .map_err(|path| {
            LifecycleTestError::Workspace(format!("non-utf8 tempdir path: {}", path.display()))
        })?;

    let cloud = FakeCloud::new();
    cloud.add_instance(
        "ocid1.instance.oc1.phx.worker1",
        "k8s-worker-1",
        InstanceState::Running,
    );
    cloud.add_instance(
        "ocid1.instance.oc1.phx.worker2",
        "k8s-worker-2",
        InstanceState::Running,
    );
    let host = FakeHost::new();
    host.add_directory(MOUNT_DIR);

    Ok(LifecycleContext {
        connector: FakeConnector::new(cloud.clone(), sample_config(), cache_path),
        cloud,
        host,
        statuses: Vec::new(),
        cache_tmp: Arc::new(tmp_dir),
    })
}

pub fn seed_block_volume(cloud: &FakeCloud) {
    cloud.add_volume(VOLUME);
}

pub fn seed_file_system(cloud: &FakeCloud) {
    cloud.add_file_system(FileSystem {
        id: FILE_SYSTEM.to_owned(),
        availability_domain: AD.to_owned(),
        compartment_id: TEST_COMPARTMENT.to_owned(),
    });
    cloud.add_mount_target(MountTarget {
        id: String::from("ocid1.mounttarget.oc1.phx.mt"),
        availability_domain: AD.to_owned(),
        export_set_id: String::from("ocid1.exportset.oc1.phx.set"),
        private_ip_ids: vec![String::from("ocid1.privateip.mt")],
        lifecycle_state: ExportState::Active,
    });
    cloud.add_private_ip("ocid1.privateip.mt", "10.0.0.8");
}
