//! Export state machine for file-storage volumes.
//!
//! Attaching a file system means exporting it through the mount target of
//! its availability domain. The export path is derived from the target's
//! first private IP and the file system OCID, so every call-out can
//! reconstruct it without local state.

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::attachment::PollPolicy;
use crate::cloud::{
    CloudClient, CloudError, CreateExport, Export, ExportState, FileSystem, MountTarget,
};

/// Errors raised while driving file-storage exports.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Wrapper for control-plane failures.
    #[error(transparent)]
    Cloud(#[from] CloudError),
    /// Raised when the file system's availability domain has no usable
    /// mount target.
    #[error("no active mount target in availability domain {availability_domain}")]
    NoMountTarget {
        /// Availability domain searched.
        availability_domain: String,
    },
    /// Raised when a mount target carries no private IP.
    #[error("mount target {mount_target_id} has zero private IPs")]
    NoPrivateIps {
        /// Mount target OCID.
        mount_target_id: String,
    },
    /// Raised when detaching a file system that has no live export.
    #[error("failed to find export '{path}' for file system '{file_system_id}'")]
    NotFound {
        /// File system OCID.
        file_system_id: String,
        /// Export path searched for.
        path: String,
    },
    /// Raised when polling observes a state outside the expected progression.
    #[error("unexpected state '{state}' while waiting for export {action}")]
    UnexpectedState {
        /// Observed lifecycle state.
        state: ExportState,
        /// `create` or `delete`.
        action: &'static str,
    },
    /// Raised when the poll budget runs out.
    #[error("maximum number of retries ({retries}) exceeded {action} export")]
    RetriesExceeded {
        /// Configured poll budget.
        retries: u32,
        /// `creating` or `deleting`.
        action: &'static str,
    },
}

/// Builds the export path for a file system behind `ip_address`.
#[must_use]
pub fn export_path(ip_address: &str, file_system_id: &str) -> String {
    format!("/mnt/{ip_address}/{file_system_id}")
}

/// Where a file system is, or would be, exported.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExportTarget {
    /// File system being exported.
    pub file_system: FileSystem,
    /// Mount target serving the file system's availability domain.
    pub mount_target: MountTarget,
    /// First private IP of the mount target.
    pub ip_address: String,
}

impl ExportTarget {
    /// The export path, which is also the device handed to the orchestrator.
    #[must_use]
    pub fn path(&self) -> String {
        export_path(&self.ip_address, &self.file_system.id)
    }

    fn create_request(&self) -> CreateExport {
        CreateExport {
            export_set_id: self.mount_target.export_set_id.clone(),
            file_system_id: self.file_system.id.clone(),
            path: self.path(),
        }
    }
}

/// Drives exports within one compartment.
#[derive(Debug)]
pub struct ExportManager<'a, C: ?Sized> {
    client: &'a C,
    compartment_id: &'a str,
    policy: PollPolicy,
}

impl<'a, C> ExportManager<'a, C>
where
    C: CloudClient + ?Sized,
{
    /// Creates a manager using the default poll policy.
    #[must_use]
    pub const fn new(client: &'a C, compartment_id: &'a str) -> Self {
        Self {
            client,
            compartment_id,
            policy: PollPolicy::DEFAULT,
        }
    }

    /// Replaces the poll policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Locates the mount target and address a file system is exported on.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::NoMountTarget`] when the availability domain
    /// has no active mount target and [`ExportError::NoPrivateIps`] when the
    /// chosen target has no address.
    #[instrument(skip(self))]
    pub async fn resolve_target(&self, file_system_id: &str) -> Result<ExportTarget, ExportError> {
        let file_system = self.client.get_file_system(file_system_id).await?;
        let mount_target = self
            .active_mount_target(&file_system.availability_domain)
            .await?;
        let Some(private_ip_id) = mount_target.private_ip_ids.first() else {
            return Err(ExportError::NoPrivateIps {
                mount_target_id: mount_target.id,
            });
        };
        let private_ip = self.client.get_private_ip(private_ip_id).await?;
        debug!(
            mount_target_id = %mount_target.id,
            ip_address = %private_ip.ip_address,
            "resolved export target"
        );
        Ok(ExportTarget {
            file_system,
            mount_target,
            ip_address: private_ip.ip_address,
        })
    }

    async fn active_mount_target(
        &self,
        availability_domain: &str,
    ) -> Result<MountTarget, ExportError> {
        let mut page: Option<String> = None;
        loop {
            let listing = self
                .client
                .list_mount_targets(self.compartment_id, availability_domain, page.as_deref())
                .await?;
            if let Some(found) = listing
                .items
                .into_iter()
                .find(|target| target.lifecycle_state == ExportState::Active)
            {
                return Ok(found);
            }
            match listing.next_page {
                Some(next) => page = Some(next),
                None => {
                    return Err(ExportError::NoMountTarget {
                        availability_domain: availability_domain.to_owned(),
                    });
                }
            }
        }
    }

    /// Returns the CREATING or ACTIVE export for `target`, if any.
    ///
    /// # Errors
    ///
    /// Propagates control-plane errors.
    pub async fn find_export(&self, target: &ExportTarget) -> Result<Option<Export>, ExportError> {
        let path = target.path();
        let mut page: Option<String> = None;
        loop {
            let listing = self
                .client
                .list_exports(
                    &target.mount_target.export_set_id,
                    &target.file_system.id,
                    page.as_deref(),
                )
                .await?;
            if let Some(found) = listing.items.into_iter().find(|export| {
                export.path == path
                    && matches!(
                        export.lifecycle_state,
                        ExportState::Creating | ExportState::Active
                    )
            }) {
                return Ok(Some(found));
            }
            match listing.next_page {
                Some(next) => page = Some(next),
                None => return Ok(None),
            }
        }
    }

    /// Creates the export for `target` unless a live one already exists.
    ///
    /// # Errors
    ///
    /// A conflict on create is resolved by searching again; if the search
    /// still finds nothing the conflict error is returned.
    #[instrument(skip(self, target), fields(path = %target.path()))]
    pub async fn attach(&self, target: &ExportTarget) -> Result<Export, ExportError> {
        if let Some(existing) = self.find_export(target).await? {
            info!(export_id = %existing.id, "reusing existing export");
            return Ok(existing);
        }
        match self.client.create_export(&target.create_request()).await {
            Ok(created) => {
                info!(export_id = %created.id, "export requested");
                Ok(created)
            }
            Err(err) if err.is_conflict() => {
                warn!("export creation conflicted; searching again");
                self.find_export(target).await?.ok_or_else(|| err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Polls until the export reports ACTIVE.
    ///
    /// # Errors
    ///
    /// Any state other than CREATING or ACTIVE fails at once; running out
    /// of polls fails with [`ExportError::RetriesExceeded`].
    #[instrument(skip(self))]
    pub async fn wait_for_active(&self, export_id: &str) -> Result<Export, ExportError> {
        for _ in 0..self.policy.max_retries {
            let export = self.client.get_export(export_id).await?;
            match export.lifecycle_state {
                ExportState::Creating => sleep(self.policy.interval).await,
                ExportState::Active => return Ok(export),
                state => {
                    return Err(ExportError::UnexpectedState {
                        state,
                        action: "create",
                    });
                }
            }
        }
        Err(ExportError::RetriesExceeded {
            retries: self.policy.max_retries,
            action: "creating",
        })
    }

    /// Deletes the live export for `target` and waits for it to go away.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::NotFound`] when there is nothing to delete,
    /// which makes a repeated detach fail like a repeated block detach.
    #[instrument(skip(self, target), fields(path = %target.path()))]
    pub async fn detach(&self, target: &ExportTarget) -> Result<(), ExportError> {
        let Some(export) = self.find_export(target).await? else {
            return Err(ExportError::NotFound {
                file_system_id: target.file_system.id.clone(),
                path: target.path(),
            });
        };
        self.client.delete_export(&export.id).await?;
        info!(export_id = %export.id, "export deletion requested");
        self.wait_for_deleted(&export.id).await
    }

    async fn wait_for_deleted(&self, export_id: &str) -> Result<(), ExportError> {
        for _ in 0..self.policy.max_retries {
            let export = match self.client.get_export(export_id).await {
                Ok(export) => export,
                Err(err) if err.is_not_found() => return Ok(()),
                Err(err) => return Err(err.into()),
            };
            match export.lifecycle_state {
                ExportState::Deleting => sleep(self.policy.interval).await,
                ExportState::Deleted => return Ok(()),
                state => {
                    return Err(ExportError::UnexpectedState {
                        state,
                        action: "delete",
                    });
                }
            }
        }
        Err(ExportError::RetriesExceeded {
            retries: self.policy.max_retries,
            action: "deleting",
        })
    }

    /// Returns `true` when an ACTIVE export exists for `target`.
    ///
    /// # Errors
    ///
    /// Propagates control-plane errors.
    pub async fn is_attached(&self, target: &ExportTarget) -> Result<bool, ExportError> {
        Ok(self
            .find_export(target)
            .await?
            .is_some_and(|export| export.lifecycle_state == ExportState::Active))
    }
}

#[cfg(test)]
mod tests;
