//! Maps an orchestrator node name to the compute instance backing it.
//!
//! Resolution tries the instance display name first. When that does not
//! yield exactly one running instance it falls back to the node's network
//! identity: public IP or DNS hostname label of a VNIC in the cluster VCN.

use std::collections::BTreeSet;

use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cloud::{CloudClient, CloudError, Instance, InstanceState, VnicAttachmentState};
use crate::vnic_cache::{CacheError, VnicCache};

/// Errors raised while resolving a node name.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Wrapper for control-plane failures.
    #[error(transparent)]
    Cloud(#[from] CloudError),
    /// Raised when the VNIC cache cannot be opened.
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// Raised when the cluster VCN has no subnets to search.
    #[error("no subnets defined for VCN {vcn_id}")]
    NoSubnets {
        /// VCN that was searched.
        vcn_id: String,
    },
    /// Raised when both strategies fail to find a unique running instance.
    #[error("expected exactly one instance matching node name '{node_name}' but found {found}")]
    Unresolved {
        /// Node name supplied by the orchestrator.
        node_name: String,
        /// Number of running candidates the network search produced.
        found: usize,
    },
}

/// Where the resolver searches.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolverScope {
    /// Compartment holding the cluster's instances.
    pub compartment_id: String,
    /// VCN the cluster's nodes are attached to.
    pub vcn_id: String,
    /// Path of the shared VNIC cache file.
    pub cache_path: Utf8PathBuf,
}

/// Two-phase node name resolver.
#[derive(Debug)]
pub struct InstanceResolver<'a, C: ?Sized> {
    client: &'a C,
    scope: &'a ResolverScope,
}

impl<'a, C> InstanceResolver<'a, C>
where
    C: CloudClient + ?Sized,
{
    /// Creates a resolver over `client` limited to `scope`.
    #[must_use]
    pub const fn new(client: &'a C, scope: &'a ResolverScope) -> Self {
        Self { client, scope }
    }

    /// Resolves `node_name` to exactly one running instance.
    ///
    /// # Errors
    ///
    /// Control-plane and cache errors propagate unchanged. When neither
    /// strategy finds a unique running instance the error is
    /// [`ResolveError::Unresolved`].
    pub async fn resolve(&self, node_name: &str) -> Result<Instance, ResolveError> {
        let mut by_name = self.running_by_display_name(node_name).await?;
        if by_name.len() == 1
            && let Some(instance) = by_name.pop()
        {
            debug!(node_name, instance_id = %instance.id, "resolved node by display name");
            return Ok(instance);
        }
        info!(
            node_name,
            matches = by_name.len(),
            "display name did not identify a unique instance; searching VNICs"
        );

        let mut by_vnic = self.running_by_network_identity(node_name).await?;
        if by_vnic.len() == 1
            && let Some(instance) = by_vnic.pop()
        {
            debug!(node_name, instance_id = %instance.id, "resolved node by network identity");
            return Ok(instance);
        }

        Err(ResolveError::Unresolved {
            node_name: node_name.to_owned(),
            found: by_vnic.len(),
        })
    }

    async fn running_by_display_name(
        &self,
        node_name: &str,
    ) -> Result<Vec<Instance>, ResolveError> {
        let mut running = Vec::new();
        let mut page: Option<String> = None;
        loop {
            let listing = self
                .client
                .list_instances(&self.scope.compartment_id, Some(node_name), page.as_deref())
                .await?;
            running.extend(
                listing
                    .items
                    .into_iter()
                    .filter(|instance| {
                        instance.display_name == node_name
                            && instance.lifecycle_state == InstanceState::Running
                    }),
            );
            match listing.next_page {
                Some(next) => page = Some(next),
                None => return Ok(running),
            }
        }
    }

    async fn running_by_network_identity(
        &self,
        node_name: &str,
    ) -> Result<Vec<Instance>, ResolveError> {
        let vcn = self.client.get_vcn(&self.scope.vcn_id).await?;
        let subnets = self.subnet_ids(&vcn.compartment_id).await?;
        if subnets.is_empty() {
            return Err(ResolveError::NoSubnets {
                vcn_id: self.scope.vcn_id.clone(),
            });
        }

        let mut cache = VnicCache::open(&self.scope.cache_path)?;
        let outcome = self
            .search_vnic_attachments(node_name, &subnets, &mut cache)
            .await;
        if let Err(err) = cache.close() {
            warn!(error = %err, "failed to persist vnic cache");
        }
        outcome
    }

    async fn subnet_ids(&self, vcn_compartment: &str) -> Result<BTreeSet<String>, ResolveError> {
        let mut ids = BTreeSet::new();
        let mut page: Option<String> = None;
        loop {
            let listing = self
                .client
                .list_subnets(vcn_compartment, &self.scope.vcn_id, page.as_deref())
                .await?;
            ids.extend(listing.items.into_iter().map(|subnet| subnet.id));
            match listing.next_page {
                Some(next) => page = Some(next),
                None => return Ok(ids),
            }
        }
    }

    async fn search_vnic_attachments(
        &self,
        node_name: &str,
        subnets: &BTreeSet<String>,
        cache: &mut VnicCache,
    ) -> Result<Vec<Instance>, ResolveError> {
        let mut seen = BTreeSet::new();
        let mut running = Vec::new();
        let mut page: Option<String> = None;
        loop {
            let listing = self
                .client
                .list_vnic_attachments(&self.scope.compartment_id, page.as_deref())
                .await?;

            for attachment in listing.items {
                if attachment.lifecycle_state != VnicAttachmentState::Attached
                    || !subnets.contains(&attachment.subnet_id)
                {
                    continue;
                }
                let Some(vnic_id) = attachment.vnic_id.as_deref() else {
                    continue;
                };

                let identifies = if let Some(vnic) = cache.get(vnic_id) {
                    vnic.identifies(node_name)
                } else {
                    let vnic = self.client.get_vnic(vnic_id).await?;
                    let identifies = vnic.identifies(node_name);
                    cache.set(vnic_id, vnic);
                    identifies
                };
                if !identifies || !seen.insert(attachment.instance_id.clone()) {
                    continue;
                }

                let instance = self.client.get_instance(&attachment.instance_id).await?;
                if instance.lifecycle_state == InstanceState::Running {
                    running.push(instance);
                }
            }

            match listing.next_page {
                Some(next) => page = Some(next),
                None => return Ok(running),
            }
        }
    }
}
