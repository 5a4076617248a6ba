//! Attachment state machine for block volumes.
//!
//! The control plane offers no idempotency token, so every operation here
//! re-observes remote state instead of trusting local memory. An attach that
//! conflicts is treated as "already attached, verify the owner", and
//! lookups by volume only ever match ATTACHING or ATTACHED records.

use std::net::Ipv4Addr;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::bridge::IscsiTarget;
use crate::cloud::{AttachmentState, CloudClient, CloudError, VolumeAttachment};

/// Bounded polling schedule shared by the attach and detach waits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Delay between polls.
    pub interval: Duration,
    /// Number of polls before giving up.
    pub max_retries: u32,
}

impl PollPolicy {
    /// One poll per second for up to two minutes.
    pub const DEFAULT: Self = Self {
        interval: Duration::from_secs(1),
        max_retries: 120,
    };
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Errors raised while driving a volume attachment.
#[derive(Debug, Error)]
pub enum AttachmentError {
    /// Wrapper for control-plane failures.
    #[error(transparent)]
    Cloud(#[from] CloudError),
    /// Raised when a conflicting attach belongs to another instance.
    #[error("already attached to instance: {instance_id}")]
    AttachedElsewhere {
        /// Volume being attached.
        volume_id: String,
        /// Instance that currently owns the attachment.
        instance_id: String,
    },
    /// Raised when no live attachment exists for a volume.
    #[error("failed to find volume attachment for '{volume_id}'")]
    NotFound {
        /// Volume that was searched for.
        volume_id: String,
    },
    /// Raised when polling observes a state outside the expected progression.
    #[error("unexpected state '{state}' while waiting for volume {action}")]
    UnexpectedState {
        /// Observed lifecycle state.
        state: AttachmentState,
        /// `attach` or `detach`.
        action: &'static str,
    },
    /// Raised when the poll budget runs out.
    #[error("maximum number of retries ({retries}) exceeded {action} volume")]
    RetriesExceeded {
        /// Configured poll budget.
        retries: u32,
        /// `attaching` or `detaching`.
        action: &'static str,
    },
    /// Raised when a live attachment lacks usable iSCSI details.
    #[error("attachment {attachment_id} is not a usable iSCSI attachment: {reason}")]
    NotIscsi {
        /// Attachment OCID.
        attachment_id: String,
        /// What was missing or malformed.
        reason: String,
    },
}

/// Drives volume attachments within one compartment.
#[derive(Debug)]
pub struct AttachmentManager<'a, C: ?Sized> {
    client: &'a C,
    compartment_id: &'a str,
    policy: PollPolicy,
}

impl<'a, C> AttachmentManager<'a, C>
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

    /// Requests an attachment of `volume_id` to `instance_id`.
    ///
    /// A conflict means an attachment already exists; it is accepted when it
    /// belongs to `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AttachmentError::AttachedElsewhere`] when the volume is bound
    /// to another instance. When a conflict is reported but no live
    /// attachment can be found the original conflict error is returned.
    #[instrument(skip(self))]
    pub async fn attach(
        &self,
        instance_id: &str,
        volume_id: &str,
    ) -> Result<VolumeAttachment, AttachmentError> {
        let conflict = match self.client.attach_volume(instance_id, volume_id).await {
            Ok(attachment) => {
                info!(attachment_id = %attachment.id, "attach requested");
                return Ok(attachment);
            }
            Err(err) if err.is_conflict() => err,
            Err(err) => return Err(err.into()),
        };

        info!(volume_id, "volume already attached; verifying owner");
        let existing = match self.find_attachment(volume_id).await {
            Ok(existing) => existing,
            Err(AttachmentError::NotFound { .. }) => {
                warn!(volume_id, "conflict reported but no live attachment found");
                return Err(conflict.into());
            }
            Err(err) => return Err(err),
        };
        if existing.instance_id != instance_id {
            return Err(AttachmentError::AttachedElsewhere {
                volume_id: volume_id.to_owned(),
                instance_id: existing.instance_id,
            });
        }
        Ok(existing)
    }

    /// Returns the first ATTACHING or ATTACHED record for `volume_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AttachmentError::NotFound`] when every page has been read
    /// without a match.
    pub async fn find_attachment(
        &self,
        volume_id: &str,
    ) -> Result<VolumeAttachment, AttachmentError> {
        let mut page: Option<String> = None;
        loop {
            let listing = self
                .client
                .list_volume_attachments(self.compartment_id, volume_id, page.as_deref())
                .await?;
            if let Some(found) = listing.items.into_iter().find(|attachment| {
                matches!(
                    attachment.lifecycle_state,
                    AttachmentState::Attaching | AttachmentState::Attached
                )
            }) {
                debug!(volume_id, attachment_id = %found.id, "found live attachment");
                return Ok(found);
            }
            match listing.next_page {
                Some(next) => page = Some(next),
                None => {
                    return Err(AttachmentError::NotFound {
                        volume_id: volume_id.to_owned(),
                    });
                }
            }
        }
    }

    /// Polls until the attachment reports ATTACHED.
    ///
    /// # Errors
    ///
    /// Any state other than ATTACHING or ATTACHED fails at once with
    /// [`AttachmentError::UnexpectedState`]; running out of polls fails with
    /// [`AttachmentError::RetriesExceeded`].
    #[instrument(skip(self))]
    pub async fn wait_for_attached(
        &self,
        attachment_id: &str,
    ) -> Result<VolumeAttachment, AttachmentError> {
        for _ in 0..self.policy.max_retries {
            let attachment = self.client.get_volume_attachment(attachment_id).await?;
            match attachment.lifecycle_state {
                AttachmentState::Attaching => sleep(self.policy.interval).await,
                AttachmentState::Attached => return Ok(attachment),
                state => {
                    return Err(AttachmentError::UnexpectedState {
                        state,
                        action: "attach",
                    });
                }
            }
        }
        Err(AttachmentError::RetriesExceeded {
            retries: self.policy.max_retries,
            action: "attaching",
        })
    }

    /// Requests the detach of an attachment. Errors propagate unchanged.
    ///
    /// # Errors
    ///
    /// Returns the control-plane error for the detach request.
    #[instrument(skip(self))]
    pub async fn detach(&self, attachment_id: &str) -> Result<(), AttachmentError> {
        self.client.detach_volume(attachment_id).await?;
        info!(attachment_id, "detach requested");
        Ok(())
    }

    /// Polls until the attachment reports DETACHED.
    ///
    /// # Errors
    ///
    /// Mirrors [`Self::wait_for_attached`] for DETACHING and DETACHED.
    #[instrument(skip(self))]
    pub async fn wait_for_detached(&self, attachment_id: &str) -> Result<(), AttachmentError> {
        for _ in 0..self.policy.max_retries {
            let attachment = self.client.get_volume_attachment(attachment_id).await?;
            match attachment.lifecycle_state {
                AttachmentState::Detaching => sleep(self.policy.interval).await,
                AttachmentState::Detached => return Ok(()),
                state => {
                    return Err(AttachmentError::UnexpectedState {
                        state,
                        action: "detach",
                    });
                }
            }
        }
        Err(AttachmentError::RetriesExceeded {
            retries: self.policy.max_retries,
            action: "detaching",
        })
    }
}

/// Local by-path device name for an iSCSI attachment.
///
/// # Errors
///
/// Returns [`AttachmentError::NotIscsi`] when the address, port or IQN is
/// missing or the address is not IPv4.
pub fn device_path(attachment: &VolumeAttachment) -> Result<String, AttachmentError> {
    let not_iscsi = |reason: &str| AttachmentError::NotIscsi {
        attachment_id: attachment.id.clone(),
        reason: reason.to_owned(),
    };
    let ip: Ipv4Addr = attachment
        .ipv4
        .as_deref()
        .ok_or_else(|| not_iscsi("missing target address"))?
        .parse()
        .map_err(|_| not_iscsi("target address is not IPv4"))?;
    let port = attachment
        .port
        .ok_or_else(|| not_iscsi("missing target port"))?;
    let iqn = attachment
        .iqn
        .as_deref()
        .filter(|iqn| !iqn.is_empty())
        .ok_or_else(|| not_iscsi("missing target IQN"))?;
    Ok(IscsiTarget::new(ip, port, iqn).device_path())
}
