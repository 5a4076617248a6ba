//! In-memory control plane used by unit and behavioural tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::cloud::{
    AttachmentState, CONFLICT_STATUS, CloudClient, CloudError, CloudFuture, CreateExport, Export,
    ExportState, FileSystem, Instance, InstanceState, MountTarget, Page, PrivateIp, Subnet, Vcn,
    Vnic, VnicAttachment, VnicAttachmentState, VolumeAttachment,
};

const NOT_FOUND_STATUS: u16 = 404;
const FAKE_ISCSI_IP: &str = "169.254.2.2";
const FAKE_ISCSI_PORT: u16 = 3260;

/// Scripted, stateful stand-in for the OCI APIs.
///
/// Attachments and exports advance one lifecycle step per `get` call
/// (ATTACHING to ATTACHED, DETACHING to DETACHED, CREATING to ACTIVE,
/// DELETING to DELETED) unless explicit states were scripted.
#[derive(Clone, Debug, Default)]
pub struct FakeCloud {
    state: Arc<Mutex<CloudState>>,
}

#[derive(Debug, Default)]
struct CloudState {
    next_id: u64,
    page_size: Option<usize>,
    volumes: Vec<String>,
    attachments: Vec<VolumeAttachment>,
    attachment_script: BTreeMap<String, VecDeque<AttachmentState>>,
    instances: Vec<Instance>,
    vcns: Vec<Vcn>,
    subnets: Vec<Subnet>,
    vnic_attachments: Vec<VnicAttachment>,
    vnics: BTreeMap<String, Vnic>,
    file_systems: Vec<FileSystem>,
    mount_targets: Vec<MountTarget>,
    private_ips: Vec<PrivateIp>,
    exports: Vec<Export>,
    export_script: BTreeMap<String, VecDeque<ExportState>>,
    failures: BTreeMap<String, VecDeque<CloudError>>,
    calls: Vec<String>,
}

impl CloudState {
    fn allocate(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("ocid1.{kind}.oc1.fake.{}", self.next_id)
    }

    fn record(&mut self, operation: &str) -> Result<(), CloudError> {
        self.calls.push(operation.to_owned());
        match self
            .failures
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn paginate<T: Clone>(&self, items: &[T], page: Option<&str>) -> Page<T> {
        let offset = page.and_then(|token| token.parse::<usize>().ok()).unwrap_or(0);
        let Some(size) = self.page_size else {
            return Page::last(items.iter().skip(offset).cloned().collect());
        };
        let slice: Vec<T> = items.iter().skip(offset).take(size).cloned().collect();
        let end = offset + slice.len();
        Page {
            items: slice,
            next_page: (end < items.len()).then(|| end.to_string()),
        }
    }
}

fn not_found(operation: &str, id: &str) -> CloudError {
    CloudError::api(
        operation,
        NOT_FOUND_STATUS,
        "NotAuthorizedOrNotFound",
        format!("resource {id} not found"),
    )
}

impl FakeCloud {
    /// Creates an empty control plane.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CloudState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Splits list responses into pages of `size` items.
    pub fn set_page_size(&self, size: usize) {
        self.lock().page_size = Some(size);
    }

    /// Registers a block volume that may be attached.
    pub fn add_volume(&self, volume_id: &str) {
        self.lock().volumes.push(volume_id.to_owned());
    }

    /// Inserts an attachment record as-is.
    pub fn insert_attachment(&self, attachment: VolumeAttachment) {
        let mut state = self.lock();
        if !state.volumes.contains(&attachment.volume_id) {
            state.volumes.push(attachment.volume_id.clone());
        }
        state.attachments.push(attachment);
    }

    /// Scripts the states returned by successive `get_volume_attachment`
    /// calls for `attachment_id`.
    pub fn script_attachment_states(&self, attachment_id: &str, states: &[AttachmentState]) {
        self.lock()
            .attachment_script
            .insert(attachment_id.to_owned(), states.iter().cloned().collect());
    }

    /// Scripts the states returned by successive `get_export` calls.
    pub fn script_export_states(&self, export_id: &str, states: &[ExportState]) {
        self.lock()
            .export_script
            .insert(export_id.to_owned(), states.iter().cloned().collect());
    }

    /// Makes the next call to `operation` fail with `error`.
    pub fn fail_next(&self, operation: &str, error: CloudError) {
        self.lock()
            .failures
            .entry(operation.to_owned())
            .or_default()
            .push_back(error);
    }

    /// Number of calls made to `operation`.
    #[must_use]
    pub fn calls(&self, operation: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.as_str() == operation)
            .count()
    }

    /// Snapshot of every attachment record, including detached ones.
    #[must_use]
    pub fn attachments(&self) -> Vec<VolumeAttachment> {
        self.lock().attachments.clone()
    }

    /// Snapshot of every export record.
    #[must_use]
    pub fn exports(&self) -> Vec<Export> {
        self.lock().exports.clone()
    }

    /// Registers an instance.
    pub fn add_instance(&self, id: &str, display_name: &str, state: InstanceState) {
        self.lock().instances.push(Instance {
            id: id.to_owned(),
            display_name: display_name.to_owned(),
            lifecycle_state: state,
        });
    }

    /// Registers a VCN with one subnet per entry of `subnet_ids`.
    pub fn add_vcn(&self, vcn_id: &str, compartment_id: &str, subnet_ids: &[&str]) {
        let mut state = self.lock();
        state.vcns.push(Vcn {
            id: vcn_id.to_owned(),
            compartment_id: compartment_id.to_owned(),
        });
        state
            .subnets
            .extend(subnet_ids.iter().map(|subnet_id| Subnet {
                id: (*subnet_id).to_owned(),
                vcn_id: vcn_id.to_owned(),
            }));
    }

    /// Attaches `vnic` to `instance_id` in `subnet_id`.
    pub fn add_vnic(
        &self,
        instance_id: &str,
        subnet_id: &str,
        vnic: Vnic,
        state: VnicAttachmentState,
    ) {
        let mut cloud = self.lock();
        let attachment_id = cloud.allocate("vnicattachment");
        cloud.vnic_attachments.push(VnicAttachment {
            id: attachment_id,
            instance_id: instance_id.to_owned(),
            subnet_id: subnet_id.to_owned(),
            vnic_id: Some(vnic.id.clone()),
            lifecycle_state: state,
        });
        cloud.vnics.insert(vnic.id.clone(), vnic);
    }

    /// Registers a file system.
    pub fn add_file_system(&self, file_system: FileSystem) {
        self.lock().file_systems.push(file_system);
    }

    /// Registers a mount target.
    pub fn add_mount_target(&self, mount_target: MountTarget) {
        self.lock().mount_targets.push(mount_target);
    }

    /// Registers a private IP.
    pub fn add_private_ip(&self, id: &str, ip_address: &str) {
        self.lock().private_ips.push(PrivateIp {
            id: id.to_owned(),
            ip_address: ip_address.to_owned(),
        });
    }

    /// Inserts an export record as-is.
    pub fn insert_export(&self, export: Export) {
        self.lock().exports.push(export);
    }
}

impl CloudClient for FakeCloud {
    fn attach_volume<'a>(
        &'a self,
        instance_id: &'a str,
        volume_id: &'a str,
    ) -> CloudFuture<'a, VolumeAttachment> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("AttachVolume")?;
            if !state.volumes.iter().any(|known| known == volume_id) {
                return Err(not_found("AttachVolume", volume_id));
            }
            if state
                .attachments
                .iter()
                .any(|existing| existing.volume_id == volume_id && existing.lifecycle_state.is_in_flight())
            {
                return Err(CloudError::api(
                    "AttachVolume",
                    CONFLICT_STATUS,
                    "Conflict",
                    format!("volume {volume_id} is already attached"),
                ));
            }
            let id = state.allocate("volumeattachment");
            let attachment = VolumeAttachment {
                id,
                volume_id: volume_id.to_owned(),
                instance_id: instance_id.to_owned(),
                lifecycle_state: AttachmentState::Attaching,
                attachment_type: String::from("iscsi"),
                ipv4: Some(FAKE_ISCSI_IP.to_owned()),
                port: Some(FAKE_ISCSI_PORT),
                iqn: Some(format!("iqn.2015-12.com.oracleiaas:{volume_id}")),
            };
            state.attachments.push(attachment.clone());
            Ok(attachment)
        })
    }

    fn get_volume_attachment<'a>(
        &'a self,
        attachment_id: &'a str,
    ) -> CloudFuture<'a, VolumeAttachment> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("GetVolumeAttachment")?;
            let scripted = state
                .attachment_script
                .get_mut(attachment_id)
                .and_then(VecDeque::pop_front);
            let attachment = state
                .attachments
                .iter_mut()
                .find(|attachment| attachment.id == attachment_id)
                .ok_or_else(|| not_found("GetVolumeAttachment", attachment_id))?;
            if let Some(next) = scripted {
                attachment.lifecycle_state = next;
                return Ok(attachment.clone());
            }
            let observed = attachment.clone();
            attachment.lifecycle_state = match attachment.lifecycle_state {
                AttachmentState::Attaching => AttachmentState::Attached,
                AttachmentState::Detaching => AttachmentState::Detached,
                ref other => other.clone(),
            };
            Ok(observed)
        })
    }

    fn list_volume_attachments<'a>(
        &'a self,
        _compartment_id: &'a str,
        volume_id: &'a str,
        page: Option<&'a str>,
    ) -> CloudFuture<'a, Page<VolumeAttachment>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("ListVolumeAttachments")?;
            let matching: Vec<VolumeAttachment> = state
                .attachments
                .iter()
                .filter(|attachment| attachment.volume_id == volume_id)
                .cloned()
                .collect();
            Ok(state.paginate(&matching, page))
        })
    }

    fn detach_volume<'a>(&'a self, attachment_id: &'a str) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("DetachVolume")?;
            let attachment = state
                .attachments
                .iter_mut()
                .find(|attachment| attachment.id == attachment_id)
                .ok_or_else(|| not_found("DetachVolume", attachment_id))?;
            if !attachment.lifecycle_state.is_in_flight() {
                return Err(CloudError::api(
                    "DetachVolume",
                    CONFLICT_STATUS,
                    "Conflict",
                    format!("attachment {attachment_id} is {}", attachment.lifecycle_state),
                ));
            }
            attachment.lifecycle_state = AttachmentState::Detaching;
            Ok(())
        })
    }

    fn get_instance<'a>(&'a self, instance_id: &'a str) -> CloudFuture<'a, Instance> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("GetInstance")?;
            state
                .instances
                .iter()
                .find(|instance| instance.id == instance_id)
                .cloned()
                .ok_or_else(|| not_found("GetInstance", instance_id))
        })
    }

    fn list_instances<'a>(
        &'a self,
        _compartment_id: &'a str,
        display_name: Option<&'a str>,
        page: Option<&'a str>,
    ) -> CloudFuture<'a, Page<Instance>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("ListInstances")?;
            let matching: Vec<Instance> = state
                .instances
                .iter()
                .filter(|instance| display_name.is_none_or(|name| instance.display_name == name))
                .cloned()
                .collect();
            Ok(state.paginate(&matching, page))
        })
    }

    fn get_vcn<'a>(&'a self, vcn_id: &'a str) -> CloudFuture<'a, Vcn> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("GetVcn")?;
            state
                .vcns
                .iter()
                .find(|vcn| vcn.id == vcn_id)
                .cloned()
                .ok_or_else(|| not_found("GetVcn", vcn_id))
        })
    }

    fn list_subnets<'a>(
        &'a self,
        _compartment_id: &'a str,
        vcn_id: &'a str,
        page: Option<&'a str>,
    ) -> CloudFuture<'a, Page<Subnet>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("ListSubnets")?;
            let matching: Vec<Subnet> = state
                .subnets
                .iter()
                .filter(|subnet| subnet.vcn_id == vcn_id)
                .cloned()
                .collect();
            Ok(state.paginate(&matching, page))
        })
    }

    fn list_vnic_attachments<'a>(
        &'a self,
        _compartment_id: &'a str,
        page: Option<&'a str>,
    ) -> CloudFuture<'a, Page<VnicAttachment>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("ListVnicAttachments")?;
            let all = state.vnic_attachments.clone();
            Ok(state.paginate(&all, page))
        })
    }

    fn get_vnic<'a>(&'a self, vnic_id: &'a str) -> CloudFuture<'a, Vnic> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("GetVnic")?;
            state
                .vnics
                .get(vnic_id)
                .cloned()
                .ok_or_else(|| not_found("GetVnic", vnic_id))
        })
    }

    fn get_file_system<'a>(&'a self, file_system_id: &'a str) -> CloudFuture<'a, FileSystem> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("GetFileSystem")?;
            state
                .file_systems
                .iter()
                .find(|file_system| file_system.id == file_system_id)
                .cloned()
                .ok_or_else(|| not_found("GetFileSystem", file_system_id))
        })
    }

    fn list_mount_targets<'a>(
        &'a self,
        _compartment_id: &'a str,
        availability_domain: &'a str,
        page: Option<&'a str>,
    ) -> CloudFuture<'a, Page<MountTarget>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("ListMountTargets")?;
            let matching: Vec<MountTarget> = state
                .mount_targets
                .iter()
                .filter(|target| target.availability_domain == availability_domain)
                .cloned()
                .collect();
            Ok(state.paginate(&matching, page))
        })
    }

    fn get_private_ip<'a>(&'a self, private_ip_id: &'a str) -> CloudFuture<'a, PrivateIp> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("GetPrivateIp")?;
            state
                .private_ips
                .iter()
                .find(|ip| ip.id == private_ip_id)
                .cloned()
                .ok_or_else(|| not_found("GetPrivateIp", private_ip_id))
        })
    }

    fn list_exports<'a>(
        &'a self,
        export_set_id: &'a str,
        file_system_id: &'a str,
        page: Option<&'a str>,
    ) -> CloudFuture<'a, Page<Export>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("ListExports")?;
            let matching: Vec<Export> = state
                .exports
                .iter()
                .filter(|export| {
                    export.export_set_id == export_set_id && export.file_system_id == file_system_id
                })
                .cloned()
                .collect();
            Ok(state.paginate(&matching, page))
        })
    }

    fn create_export<'a>(&'a self, request: &'a CreateExport) -> CloudFuture<'a, Export> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("CreateExport")?;
            let duplicate = state.exports.iter().any(|export| {
                export.export_set_id == request.export_set_id
                    && export.path == request.path
                    && matches!(
                        export.lifecycle_state,
                        ExportState::Creating | ExportState::Active
                    )
            });
            if duplicate {
                return Err(CloudError::api(
                    "CreateExport",
                    CONFLICT_STATUS,
                    "Conflict",
                    format!("export path {} already in use", request.path),
                ));
            }
            let export = Export {
                id: state.allocate("export"),
                export_set_id: request.export_set_id.clone(),
                file_system_id: request.file_system_id.clone(),
                path: request.path.clone(),
                lifecycle_state: ExportState::Creating,
            };
            state.exports.push(export.clone());
            Ok(export)
        })
    }

    fn get_export<'a>(&'a self, export_id: &'a str) -> CloudFuture<'a, Export> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("GetExport")?;
            let scripted = state
                .export_script
                .get_mut(export_id)
                .and_then(VecDeque::pop_front);
            let export = state
                .exports
                .iter_mut()
                .find(|export| export.id == export_id)
                .ok_or_else(|| not_found("GetExport", export_id))?;
            if let Some(next) = scripted {
                export.lifecycle_state = next;
                return Ok(export.clone());
            }
            let observed = export.clone();
            export.lifecycle_state = match export.lifecycle_state {
                ExportState::Creating => ExportState::Active,
                ExportState::Deleting => ExportState::Deleted,
                ref other => other.clone(),
            };
            Ok(observed)
        })
    }

    fn delete_export<'a>(&'a self, export_id: &'a str) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("DeleteExport")?;
            let export = state
                .exports
                .iter_mut()
                .find(|export| export.id == export_id)
                .ok_or_else(|| not_found("DeleteExport", export_id))?;
            export.lifecycle_state = ExportState::Deleting;
            Ok(())
        })
    }
}
