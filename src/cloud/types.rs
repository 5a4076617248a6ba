//! Typed OCI resources consumed by the driver.
//!
//! Only the fields the attach and mount flows read are modelled. Unknown
//! JSON fields are ignored so that API additions do not break decoding.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! lifecycle_state {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $wire:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $(
                #[doc = concat!("`", $wire, "`")]
                $variant,
            )+
            /// Any state this driver does not recognise.
            Other(String),
        }

        impl $name {
            /// Returns the wire representation of the state.
            #[must_use]
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $wire,)+
                    Self::Other(value) => value.as_str(),
                }
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                match value.as_str() {
                    $($wire => Self::$variant,)+
                    _ => Self::Other(value),
                }
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::from(value.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_owned()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

lifecycle_state!(
    /// Lifecycle of a volume attachment.
    AttachmentState {
        Attaching => "ATTACHING",
        Attached => "ATTACHED",
        Detaching => "DETACHING",
        Detached => "DETACHED",
    }
);

lifecycle_state!(
    /// Lifecycle of a compute instance.
    InstanceState {
        Provisioning => "PROVISIONING",
        Running => "RUNNING",
        Starting => "STARTING",
        Stopping => "STOPPING",
        Stopped => "STOPPED",
        Terminating => "TERMINATING",
        Terminated => "TERMINATED",
    }
);

lifecycle_state!(
    /// Lifecycle of a VNIC attachment.
    VnicAttachmentState {
        Attaching => "ATTACHING",
        Attached => "ATTACHED",
        Detaching => "DETACHING",
        Detached => "DETACHED",
    }
);

lifecycle_state!(
    /// Lifecycle shared by file-storage resources (exports, mount targets).
    ExportState {
        Creating => "CREATING",
        Active => "ACTIVE",
        Deleting => "DELETING",
        Deleted => "DELETED",
        Failed => "FAILED",
    }
);

impl AttachmentState {
    /// Returns `true` for attachments that are live or on their way to being
    /// live.
    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        matches!(self, Self::Attaching | Self::Attached)
    }
}

/// A block volume bound to an instance.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAttachment {
    /// Attachment OCID.
    pub id: String,
    /// Attached volume OCID.
    pub volume_id: String,
    /// Instance the volume is attached to.
    pub instance_id: String,
    /// Current lifecycle state.
    pub lifecycle_state: AttachmentState,
    /// Transport type reported by the service (`iscsi`, `paravirtualized`).
    #[serde(default)]
    pub attachment_type: String,
    /// iSCSI target address.
    #[serde(default)]
    pub ipv4: Option<String>,
    /// iSCSI target port.
    #[serde(default)]
    pub port: Option<u16>,
    /// iSCSI qualified name of the target.
    #[serde(default)]
    pub iqn: Option<String>,
}

/// A compute instance.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Instance OCID.
    pub id: String,
    /// User-facing name, usually the node name.
    #[serde(default)]
    pub display_name: String,
    /// Current lifecycle state.
    pub lifecycle_state: InstanceState,
}

/// The binding of a VNIC to an instance.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VnicAttachment {
    /// Attachment OCID.
    pub id: String,
    /// Instance owning the VNIC.
    pub instance_id: String,
    /// Subnet the VNIC lives in.
    pub subnet_id: String,
    /// VNIC OCID, absent while the attachment is still being created.
    #[serde(default)]
    pub vnic_id: Option<String>,
    /// Current lifecycle state.
    pub lifecycle_state: VnicAttachmentState,
}

/// Network identity of a VNIC. This is what the node-name cache stores.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Vnic {
    /// VNIC OCID.
    pub id: String,
    /// Public address, if one is assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    /// Primary private address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<String>,
    /// DNS hostname label within the subnet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname_label: Option<String>,
}

impl Vnic {
    /// Returns `true` when this VNIC identifies `node_name`, either by its
    /// public address or because its hostname label prefixes the name.
    #[must_use]
    pub fn identifies(&self, node_name: &str) -> bool {
        if self.public_ip.as_deref() == Some(node_name) {
            return true;
        }
        self.hostname_label
            .as_deref()
            .is_some_and(|label| !label.is_empty() && node_name.starts_with(label))
    }
}

/// A virtual cloud network.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Vcn {
    /// VCN OCID.
    pub id: String,
    /// Compartment holding the VCN and its subnets.
    pub compartment_id: String,
}

/// A subnet of a VCN.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    /// Subnet OCID.
    pub id: String,
    /// Owning VCN.
    pub vcn_id: String,
}

/// A file-storage file system.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSystem {
    /// File system OCID.
    pub id: String,
    /// Availability domain the file system lives in.
    pub availability_domain: String,
    /// Compartment holding the file system.
    pub compartment_id: String,
}

/// A mount target exposing file systems to a subnet.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountTarget {
    /// Mount target OCID.
    pub id: String,
    /// Availability domain the target is bound to.
    pub availability_domain: String,
    /// Export set holding the target's exports.
    pub export_set_id: String,
    /// Private IP OCIDs of the target.
    #[serde(default)]
    pub private_ip_ids: Vec<String>,
    /// Current lifecycle state.
    pub lifecycle_state: ExportState,
}

/// A private IP resource.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateIp {
    /// Private IP OCID.
    pub id: String,
    /// The address itself.
    pub ip_address: String,
}

/// A file system exported through a mount target's export set.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Export {
    /// Export OCID.
    pub id: String,
    /// Export set the export belongs to.
    pub export_set_id: String,
    /// Exported file system.
    pub file_system_id: String,
    /// Export path on the mount target.
    pub path: String,
    /// Current lifecycle state.
    pub lifecycle_state: ExportState,
}

/// Body of a create-export request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExport {
    /// Export set to create the export in.
    pub export_set_id: String,
    /// File system to export.
    pub file_system_id: String,
    /// Path the export is reachable under.
    pub path: String,
}

/// One page of a paginated listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Token for the next page, `None` on the last page.
    pub next_page: Option<String>,
}

impl<T> Page<T> {
    /// Builds the final page of a listing.
    #[must_use]
    pub const fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page: None,
        }
    }
}
