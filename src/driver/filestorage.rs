//! Driver for file-storage file systems exported over NFS.

use tracing::{info, instrument};

use super::{CloudSession, Connector, DriverError, init_status, into_status};
use crate::attachment::PollPolicy;
use crate::bridge::{Host, MountOutcome, mount_options, nfs};
use crate::filestorage::{ExportManager, ExportTarget};
use crate::flexvolume::{Driver, DriverFuture, DriverStatus, Options};

/// File-storage driver.
///
/// The volume name is the file system OCID. Attaching creates an export on
/// the mount target of the file system's availability domain; the export
/// path doubles as the device handed to `mountdevice`.
#[derive(Clone, Debug)]
pub struct FileStorageDriver<K, H> {
    connector: K,
    host: H,
    policy: PollPolicy,
}

impl<K, H> FileStorageDriver<K, H> {
    /// Creates a driver with the default polling.
    #[must_use]
    pub const fn new(connector: K, host: H) -> Self {
        Self {
            connector,
            host,
            policy: PollPolicy::DEFAULT,
        }
    }

    /// Overrides export polling.
    #[must_use]
    pub const fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl<K, H> FileStorageDriver<K, H>
where
    K: Connector,
    H: Host,
{
    fn manager<'s>(&self, session: &'s CloudSession<K::Client>) -> ExportManager<'s, K::Client> {
        ExportManager::new(&session.client, session.compartment_id()).with_policy(self.policy)
    }

    async fn target(
        &self,
        session: &CloudSession<K::Client>,
        file_system_id: &str,
    ) -> Result<ExportTarget, DriverError> {
        let target = self.manager(session).resolve_target(file_system_id).await?;
        info!(
            mount_target_id = %target.mount_target.id,
            ip_address = %target.ip_address,
            "resolved mount target"
        );
        Ok(target)
    }

    #[instrument(skip(self, options))]
    async fn attach_file_system(
        &self,
        options: &Options,
        node_name: &str,
    ) -> Result<DriverStatus, DriverError> {
        let file_system_id = options.volume_name().ok_or(DriverError::MissingVolumeName)?;
        let session = self.connector.connect().await?;
        let target = self.target(&session, file_system_id).await?;
        let manager = self.manager(&session);
        let requested = manager.attach(&target).await?;
        let export = manager.wait_for_active(&requested.id).await?;
        info!(export_id = %export.id, path = %export.path, "file system exported");
        Ok(DriverStatus::success().with_device(target.path()))
    }

    #[instrument(skip(self))]
    async fn detach_file_system(
        &self,
        file_system_id: &str,
        node_name: &str,
    ) -> Result<DriverStatus, DriverError> {
        let session = self.connector.connect().await?;
        let target = self.target(&session, file_system_id).await?;
        self.manager(&session).detach(&target).await?;
        Ok(DriverStatus::success_with(format!(
            "Detach {} from {}",
            target.file_system.id, target.mount_target.id
        )))
    }

    #[instrument(skip(self, options))]
    async fn check_exported(
        &self,
        options: &Options,
        node_name: &str,
    ) -> Result<DriverStatus, DriverError> {
        let file_system_id = options.volume_name().ok_or(DriverError::MissingVolumeName)?;
        let session = self.connector.connect().await?;
        let target = self.target(&session, file_system_id).await?;
        let attached = self.manager(&session).is_attached(&target).await?;
        Ok(DriverStatus::success().with_attached(attached))
    }

    fn mount(
        &self,
        mount_dir: &str,
        device: &str,
        options: &Options,
    ) -> Result<DriverStatus, DriverError> {
        let mount_flags = mount_options(options.read_write());
        Ok(
            match nfs::mount_export(&self.host, mount_dir, device, &mount_flags)? {
                MountOutcome::Mounted => DriverStatus::success(),
                MountOutcome::AlreadyMounted => {
                    DriverStatus::success_with("Export already mounted. Nothing to do.")
                }
            },
        )
    }

    fn unmount(&self, mount_dir: &str) -> Result<DriverStatus, DriverError> {
        nfs::unmount_export(&self.host, mount_dir)?;
        Ok(DriverStatus::success_with(format!("UnmountDevice:{mount_dir}")))
    }
}

impl<K, H> Driver for FileStorageDriver<K, H>
where
    K: Connector,
    H: Host,
{
    fn init(&self) -> DriverFuture<'_> {
        Box::pin(async move { init_status(self.connector.connect().await) })
    }

    fn attach<'a>(&'a self, options: &'a Options, node_name: &'a str) -> DriverFuture<'a> {
        Box::pin(async move { into_status(self.attach_file_system(options, node_name).await) })
    }

    fn detach<'a>(&'a self, volume: &'a str, node_name: &'a str) -> DriverFuture<'a> {
        Box::pin(async move { into_status(self.detach_file_system(volume, node_name).await) })
    }

    fn wait_for_attach<'a>(&'a self, device: &'a str, _options: &'a Options) -> DriverFuture<'a> {
        Box::pin(std::future::ready(DriverStatus::success().with_device(device)))
    }

    fn is_attached<'a>(&'a self, options: &'a Options, node_name: &'a str) -> DriverFuture<'a> {
        Box::pin(async move { into_status(self.check_exported(options, node_name).await) })
    }

    fn mount_device<'a>(
        &'a self,
        mount_dir: &'a str,
        device: &'a str,
        options: &'a Options,
    ) -> DriverFuture<'a> {
        Box::pin(std::future::ready(into_status(
            self.mount(mount_dir, device, options),
        )))
    }

    fn unmount_device<'a>(&'a self, mount_dir: &'a str) -> DriverFuture<'a> {
        Box::pin(std::future::ready(into_status(self.unmount(mount_dir))))
    }
}
