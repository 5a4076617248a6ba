//! Canonical identifiers for OCI volumes and file systems.
//!
//! The orchestrator hands the driver either a full OCID or the truncated
//! suffix used as a persistent-volume name. Both directions are pure string
//! functions so that detach can rebuild exactly the identifier attach used.

/// Prefix shared by every OCI resource identifier.
pub const OCID_PREFIX: &str = "ocid1.";
/// Prefix of block volume identifiers.
pub const VOLUME_OCID_PREFIX: &str = "ocid1.volume.";
/// Prefix of file-storage file system identifiers.
pub const FILESYSTEM_OCID_PREFIX: &str = "ocid1.filesystem.";

const VOLUME_REALM_PREFIX: &str = "ocid1.volume.oc1.";

/// Region tags whose identifier segment differs from the tag itself.
const REGION_SEGMENTS: &[(&str, &str)] = &[("fra", "eu-frankfurt-1")];

/// Returns the region segment embedded in volume OCIDs for `region_key`.
#[must_use]
pub fn region_segment(region_key: &str) -> &str {
    REGION_SEGMENTS
        .iter()
        .find(|(tag, _)| *tag == region_key)
        .map_or(region_key, |(_, segment)| segment)
}

/// Derives the canonical volume OCID for `name` in the region identified by
/// `region_key`.
///
/// Names that already carry the OCID prefix are returned unchanged, which
/// makes the function idempotent.
///
/// # Examples
///
/// ```
/// use oci_flexvolume::volume_id::derive_volume_id;
///
/// assert_eq!(derive_volume_id("phx", "aaaaaa"), "ocid1.volume.oc1.phx.aaaaaa");
/// assert_eq!(
///     derive_volume_id("fra", "aaaaaa"),
///     "ocid1.volume.oc1.eu-frankfurt-1.aaaaaa"
/// );
/// ```
#[must_use]
pub fn derive_volume_id(region_key: &str, name: &str) -> String {
    if name.starts_with(OCID_PREFIX) {
        return name.to_owned();
    }
    format!("{VOLUME_REALM_PREFIX}{}.{name}", region_segment(region_key))
}

/// Recovers the short volume name from a canonical volume OCID.
///
/// Identifiers outside the `ocid1.volume.oc1.<region>.` family are returned
/// unchanged.
#[must_use]
pub fn short_volume_name(volume_id: &str) -> &str {
    volume_id
        .strip_prefix(VOLUME_REALM_PREFIX)
        .and_then(|rest| rest.split_once('.'))
        .map_or(volume_id, |(_, name)| name)
}

/// The storage family an identifier belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VolumeKind {
    /// Block volume attached over iSCSI.
    Block,
    /// File-storage file system exported over NFS.
    FileSystem,
}

impl VolumeKind {
    /// Claims `identifier` for a storage family.
    ///
    /// File systems are checked first, then block volumes, then the legacy
    /// short-name shim. Returns `None` for other OCID families.
    #[must_use]
    pub fn claim(identifier: &str) -> Option<Self> {
        if identifier.starts_with(FILESYSTEM_OCID_PREFIX) {
            return Some(Self::FileSystem);
        }
        if identifier.starts_with(VOLUME_OCID_PREFIX) {
            return Some(Self::Block);
        }
        if claims_legacy_volume_name(identifier) {
            return Some(Self::Block);
        }
        None
    }
}

/// Compatibility shim for volumes provisioned before full OCIDs were used as
/// persistent-volume names.
///
/// Any identifier lacking the generic OCID prefix is assumed to be a
/// truncated block volume name. Malformed input is claimed as well.
#[must_use]
pub fn claims_legacy_volume_name(identifier: &str) -> bool {
    !identifier.starts_with(OCID_PREFIX)
}
