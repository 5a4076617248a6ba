//! Driver for block volumes attached over iSCSI.

use tracing::{info, instrument};

use super::{CloudSession, Connector, DriverError, init_status, into_status};
use crate::attachment::{AttachmentError, AttachmentManager, PollPolicy, device_path};
use crate::bridge::{DeviceWait, Host, MountOutcome, UnmountOutcome, block, mount_options};
use crate::flexvolume::{Driver, DriverFuture, DriverStatus, Options};
use crate::resolver::InstanceResolver;
use crate::volume_id::derive_volume_id;

/// Block volume driver.
///
/// Attach and detach drive the control plane from the controller manager;
/// mount and unmount run on the node and only touch the host.
#[derive(Clone, Debug)]
pub struct BlockVolumeDriver<K, H> {
    connector: K,
    host: H,
    policy: PollPolicy,
    device_wait: DeviceWait,
}

impl<K, H> BlockVolumeDriver<K, H> {
    /// Creates a driver with the default polling.
    #[must_use]
    pub fn new(connector: K, host: H) -> Self {
        Self {
            connector,
            host,
            policy: PollPolicy::DEFAULT,
            device_wait: DeviceWait::default(),
        }
    }

    /// Overrides attachment polling and the post-login device wait.
    #[must_use]
    pub const fn with_timing(mut self, policy: PollPolicy, device_wait: DeviceWait) -> Self {
        self.policy = policy;
        self.device_wait = device_wait;
        self
    }
}

impl<K, H> BlockVolumeDriver<K, H>
where
    K: Connector,
    H: Host,
{
    fn manager<'s>(
        &self,
        session: &'s CloudSession<K::Client>,
    ) -> AttachmentManager<'s, K::Client> {
        AttachmentManager::new(&session.client, session.compartment_id()).with_policy(self.policy)
    }

    #[instrument(skip(self, options))]
    async fn attach_volume(
        &self,
        options: &Options,
        node_name: &str,
    ) -> Result<DriverStatus, DriverError> {
        let volume_name = options.volume_name().ok_or(DriverError::MissingVolumeName)?;
        let session = self.connector.connect().await?;
        let scope = session.resolver_scope();
        let instance = InstanceResolver::new(&session.client, &scope)
            .resolve(node_name)
            .await?;
        let volume_id = derive_volume_id(session.region_key(), volume_name);
        info!(%volume_id, instance_id = %instance.id, "attaching volume");

        let manager = self.manager(&session);
        let requested = manager.attach(&instance.id, &volume_id).await?;
        let attachment = manager.wait_for_attached(&requested.id).await?;
        info!(attachment_id = %attachment.id, "volume attached");
        Ok(DriverStatus::success().with_device(device_path(&attachment)?))
    }

    #[instrument(skip(self))]
    async fn detach_volume(&self, volume: &str, node_name: &str) -> Result<DriverStatus, DriverError> {
        let session = self.connector.connect().await?;
        let volume_id = derive_volume_id(session.region_key(), volume);
        let manager = self.manager(&session);
        let attachment = manager.find_attachment(&volume_id).await?;
        manager.detach(&attachment.id).await?;
        manager.wait_for_detached(&attachment.id).await?;
        info!(attachment_id = %attachment.id, "volume detached");
        Ok(DriverStatus::success())
    }

    #[instrument(skip(self, options))]
    async fn check_attached(
        &self,
        options: &Options,
        node_name: &str,
    ) -> Result<DriverStatus, DriverError> {
        let volume_name = options.volume_name().ok_or(DriverError::MissingVolumeName)?;
        let session = self.connector.connect().await?;
        let volume_id = derive_volume_id(session.region_key(), volume_name);
        match self.manager(&session).find_attachment(&volume_id).await {
            Ok(attachment) => {
                info!(attachment_id = %attachment.id, "found volume attachment");
                Ok(DriverStatus::success().with_attached(true))
            }
            Err(err @ AttachmentError::NotFound { .. }) => {
                Ok(DriverStatus::success_with(err.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(skip(self, options))]
    async fn mount(
        &self,
        mount_dir: &str,
        device: &str,
        options: &Options,
    ) -> Result<DriverStatus, DriverError> {
        let mount_flags = mount_options(options.read_write());
        let outcome = block::mount_device(
            &self.host,
            mount_dir,
            device,
            options.fs_type(),
            &mount_flags,
            self.device_wait,
        )
        .await?;
        Ok(match outcome {
            MountOutcome::Mounted => DriverStatus::success(),
            MountOutcome::AlreadyMounted => {
                DriverStatus::success_with("Device already mounted. Nothing to do.")
            }
        })
    }

    fn unmount(&self, mount_dir: &str) -> Result<DriverStatus, DriverError> {
        Ok(match block::unmount_device(&self.host, mount_dir)? {
            UnmountOutcome::Unmounted => DriverStatus::success(),
            UnmountOutcome::NotMounted => {
                DriverStatus::success_with("Mount point not found. Nothing to do.")
            }
        })
    }
}

impl<K, H> Driver for BlockVolumeDriver<K, H>
where
    K: Connector,
    H: Host,
{
    fn init(&self) -> DriverFuture<'_> {
        Box::pin(async move { init_status(self.connector.connect().await) })
    }

    fn attach<'a>(&'a self, options: &'a Options, node_name: &'a str) -> DriverFuture<'a> {
        Box::pin(async move { into_status(self.attach_volume(options, node_name).await) })
    }

    fn detach<'a>(&'a self, volume: &'a str, node_name: &'a str) -> DriverFuture<'a> {
        Box::pin(async move { into_status(self.detach_volume(volume, node_name).await) })
    }

    fn wait_for_attach<'a>(&'a self, device: &'a str, _options: &'a Options) -> DriverFuture<'a> {
        Box::pin(std::future::ready(DriverStatus::success().with_device(device)))
    }

    fn is_attached<'a>(&'a self, options: &'a Options, node_name: &'a str) -> DriverFuture<'a> {
        Box::pin(async move { into_status(self.check_attached(options, node_name).await) })
    }

    fn mount_device<'a>(
        &'a self,
        mount_dir: &'a str,
        device: &'a str,
        options: &'a Options,
    ) -> DriverFuture<'a> {
        Box::pin(async move { into_status(self.mount(mount_dir, device, options).await) })
    }

    fn unmount_device<'a>(&'a self, mount_dir: &'a str) -> DriverFuture<'a> {
        Box::pin(std::future::ready(into_status(self.unmount(mount_dir))))
    }
}
