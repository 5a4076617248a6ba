//! Typed request/response contract for the OCI control plane.
//!
//! [`CloudClient`] is a thin seam: every method is a single API exchange with
//! no polling or retry. The attach and export state machines layer their
//! behaviour on top of it, and tests drive them with an in-memory client.

mod error;
pub mod http;
mod types;

use std::future::Future;
use std::pin::Pin;

pub use error::{CONFLICT_STATUS, CloudError};
pub use http::{HttpCloudClient, HttpSettings, REQUEST_TIMEOUT, RequestSigner, UnsignedRequests};
pub use types::{
    AttachmentState, CreateExport, Export, ExportState, FileSystem, Instance, InstanceState,
    MountTarget, Page, PrivateIp, Subnet, Vcn, Vnic, VnicAttachment, VnicAttachmentState,
    VolumeAttachment,
};

/// Future returned by [`CloudClient`] operations.
pub type CloudFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CloudError>> + Send + 'a>>;

/// Single-exchange operations against the compute, network and file-storage
/// APIs.
pub trait CloudClient: Send + Sync {
    /// Requests an iSCSI attachment of `volume_id` to `instance_id`.
    fn attach_volume<'a>(
        &'a self,
        instance_id: &'a str,
        volume_id: &'a str,
    ) -> CloudFuture<'a, VolumeAttachment>;

    /// Fetches a volume attachment by OCID.
    fn get_volume_attachment<'a>(
        &'a self,
        attachment_id: &'a str,
    ) -> CloudFuture<'a, VolumeAttachment>;

    /// Lists attachments of `volume_id` within `compartment_id`.
    fn list_volume_attachments<'a>(
        &'a self,
        compartment_id: &'a str,
        volume_id: &'a str,
        page: Option<&'a str>,
    ) -> CloudFuture<'a, Page<VolumeAttachment>>;

    /// Requests detachment of a volume attachment.
    fn detach_volume<'a>(&'a self, attachment_id: &'a str) -> CloudFuture<'a, ()>;

    /// Fetches an instance by OCID.
    fn get_instance<'a>(&'a self, instance_id: &'a str) -> CloudFuture<'a, Instance>;

    /// Lists instances in a compartment, optionally filtered by exact
    /// display name.
    fn list_instances<'a>(
        &'a self,
        compartment_id: &'a str,
        display_name: Option<&'a str>,
        page: Option<&'a str>,
    ) -> CloudFuture<'a, Page<Instance>>;

    /// Fetches a VCN by OCID.
    fn get_vcn<'a>(&'a self, vcn_id: &'a str) -> CloudFuture<'a, Vcn>;

    /// Lists subnets of `vcn_id` within `compartment_id`.
    fn list_subnets<'a>(
        &'a self,
        compartment_id: &'a str,
        vcn_id: &'a str,
        page: Option<&'a str>,
    ) -> CloudFuture<'a, Page<Subnet>>;

    /// Lists VNIC attachments within a compartment.
    fn list_vnic_attachments<'a>(
        &'a self,
        compartment_id: &'a str,
        page: Option<&'a str>,
    ) -> CloudFuture<'a, Page<VnicAttachment>>;

    /// Fetches a VNIC by OCID.
    fn get_vnic<'a>(&'a self, vnic_id: &'a str) -> CloudFuture<'a, Vnic>;

    /// Fetches a file system by OCID.
    fn get_file_system<'a>(&'a self, file_system_id: &'a str) -> CloudFuture<'a, FileSystem>;

    /// Lists mount targets of an availability domain.
    fn list_mount_targets<'a>(
        &'a self,
        compartment_id: &'a str,
        availability_domain: &'a str,
        page: Option<&'a str>,
    ) -> CloudFuture<'a, Page<MountTarget>>;

    /// Fetches a private IP by OCID.
    fn get_private_ip<'a>(&'a self, private_ip_id: &'a str) -> CloudFuture<'a, PrivateIp>;

    /// Lists the exports of `file_system_id` in `export_set_id`.
    fn list_exports<'a>(
        &'a self,
        export_set_id: &'a str,
        file_system_id: &'a str,
        page: Option<&'a str>,
    ) -> CloudFuture<'a, Page<Export>>;

    /// Creates an export.
    fn create_export<'a>(&'a self, request: &'a CreateExport) -> CloudFuture<'a, Export>;

    /// Fetches an export by OCID.
    fn get_export<'a>(&'a self, export_id: &'a str) -> CloudFuture<'a, Export>;

    /// Deletes an export.
    fn delete_export<'a>(&'a self, export_id: &'a str) -> CloudFuture<'a, ()>;
}
