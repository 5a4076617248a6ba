//! Flexvolume call-out contract: status payloads, options and the driver
//! interface the dispatcher calls into.

mod callout;

use std::collections::BTreeMap;
use std::fmt;
use std::future::{self, Future};
use std::pin::Pin;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use serde::{Deserialize, Serialize};

pub use callout::{CallOut, CallOutError};

/// Option key carrying the requested filesystem type.
pub const OPTION_FS_TYPE: &str = "kubernetes.io/fsType";
/// Option key carrying `rw` or `ro`.
pub const OPTION_READ_WRITE: &str = "kubernetes.io/readwrite";
/// Option key carrying the persistent volume or volume name.
pub const OPTION_VOLUME_NAME: &str = "kubernetes.io/pvOrVolumeName";
/// Prefix of option keys whose values are base64-encoded secrets.
pub const OPTION_SECRET_PREFIX: &str = "kubernetes.io/secret/";
/// Option key carrying the pod fs group.
pub const OPTION_FS_GROUP: &str = "kubernetes.io/fsGroup";
/// Option key carrying the kubelet mounts directory.
pub const OPTION_MOUNTS_DIR: &str = "kubernetes.io/mountsDir";
/// Option key carrying the pod name.
pub const OPTION_POD_NAME: &str = "kubernetes.io/pod.name";
/// Option key carrying the pod namespace.
pub const OPTION_POD_NAMESPACE: &str = "kubernetes.io/pod.namespace";
/// Option key carrying the pod UID.
pub const OPTION_POD_UID: &str = "kubernetes.io/pod.uid";
/// Option key carrying the pod's service account.
pub const OPTION_SERVICE_ACCOUNT_NAME: &str = "kubernetes.io/serviceAccount.name";

/// Outcome of a call-out.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum Status {
    /// The call-out succeeded.
    Success,
    /// The call-out failed; the message says why.
    Failure,
    /// The driver deliberately does not implement the call-out.
    #[serde(rename = "Not supported")]
    NotSupported,
}

/// Driver capabilities reported by `init`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct Capabilities {
    /// Whether the driver implements attach and detach.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub attach: bool,
    /// Whether `getvolumename` may be used.
    #[serde(
        rename = "cangetvolumename",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub can_get_volume_name: bool,
}

/// JSON payload written to stdout for every call-out.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverStatus {
    /// Outcome of the call-out.
    pub status: Status,
    /// Reason for success or failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Device path, only for the attach family.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Whether the volume is attached, only for `isattached`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub attached: bool,
    /// Volume name, only for `getvolumename`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,
    /// Capabilities, only for `init`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

impl DriverStatus {
    const fn with_status(status: Status) -> Self {
        Self {
            status,
            message: None,
            device: None,
            attached: false,
            volume_name: None,
            capabilities: None,
        }
    }

    /// A bare success.
    #[must_use]
    pub const fn success() -> Self {
        Self::with_status(Status::Success)
    }

    /// A success carrying an informational message.
    #[must_use]
    pub fn success_with(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::success()
        }
    }

    /// A failure whose message is the display text of `reason`.
    #[must_use]
    pub fn failure(reason: impl fmt::Display) -> Self {
        Self {
            message: Some(reason.to_string()),
            ..Self::with_status(Status::Failure)
        }
    }

    /// A permanent capability negation.
    #[must_use]
    pub fn not_supported(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::with_status(Status::NotSupported)
        }
    }

    /// Sets the device path.
    #[must_use]
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Sets the attached flag.
    #[must_use]
    pub const fn with_attached(mut self, attached: bool) -> Self {
        self.attached = attached;
        self
    }

    /// Sets the capabilities block.
    #[must_use]
    pub const fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Process exit code for this status: zero unless the call failed.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self.status {
            Status::Success | Status::NotSupported => 0,
            Status::Failure => 1,
        }
    }

    /// Renders the status as a single JSON line.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            String::from(r#"{"status":"Failure","message":"Error marshaling result to JSON"}"#)
        })
    }
}

/// Options map passed as JSON to most call-outs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Options(BTreeMap<String, String>);

impl Options {
    /// Decodes the JSON argument of a call-out, base64-decoding secret
    /// values in place.
    ///
    /// # Errors
    ///
    /// Returns [`CallOutError::InvalidOptions`] for malformed JSON and
    /// [`CallOutError::InvalidSecret`] for secrets that are not valid
    /// base64 UTF-8.
    pub fn parse(raw: &str) -> Result<Self, CallOutError> {
        let mut map: BTreeMap<String, String> =
            serde_json::from_str(raw).map_err(|err| CallOutError::InvalidOptions {
                raw: raw.to_owned(),
                message: err.to_string(),
            })?;
        for (key, value) in &mut map {
            if !key.starts_with(OPTION_SECRET_PREFIX) {
                continue;
            }
            let bytes = BASE64_STANDARD
                .decode(value.as_bytes())
                .map_err(|err| CallOutError::InvalidSecret {
                    key: key.clone(),
                    message: err.to_string(),
                })?;
            *value = String::from_utf8(bytes).map_err(|err| CallOutError::InvalidSecret {
                key: key.clone(),
                message: err.to_string(),
            })?;
        }
        Ok(Self(map))
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Sets `key`, mostly useful when building options in tests.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// The persistent volume or volume name.
    #[must_use]
    pub fn volume_name(&self) -> Option<&str> {
        self.get(OPTION_VOLUME_NAME)
    }

    /// Requested filesystem type, empty when unset.
    #[must_use]
    pub fn fs_type(&self) -> &str {
        self.get(OPTION_FS_TYPE).unwrap_or_default()
    }

    /// The raw read-write flag.
    #[must_use]
    pub fn read_write(&self) -> Option<&str> {
        self.get(OPTION_READ_WRITE)
    }
}

/// Future returned by [`Driver`] call-outs.
pub type DriverFuture<'a> = Pin<Box<dyn Future<Output = DriverStatus> + Send + 'a>>;

/// A volume driver answering flexvolume call-outs.
///
/// Every method reports its outcome as a [`DriverStatus`]; errors never
/// escape the driver.
pub trait Driver: Send + Sync {
    /// Validates configuration on driver start-up.
    fn init(&self) -> DriverFuture<'_>;

    /// Attaches the volume named in `options` to `node_name`.
    fn attach<'a>(&'a self, options: &'a Options, node_name: &'a str) -> DriverFuture<'a>;

    /// Detaches `volume` from `node_name`.
    fn detach<'a>(&'a self, volume: &'a str, node_name: &'a str) -> DriverFuture<'a>;

    /// Confirms that `device` is ready.
    fn wait_for_attach<'a>(&'a self, device: &'a str, options: &'a Options) -> DriverFuture<'a>;

    /// Reports whether the volume named in `options` is attached.
    fn is_attached<'a>(&'a self, options: &'a Options, node_name: &'a str) -> DriverFuture<'a>;

    /// Mounts `device` at the global mount directory.
    fn mount_device<'a>(
        &'a self,
        mount_dir: &'a str,
        device: &'a str,
        options: &'a Options,
    ) -> DriverFuture<'a>;

    /// Unmounts the global mount directory.
    fn unmount_device<'a>(&'a self, mount_dir: &'a str) -> DriverFuture<'a>;

    /// Pod-level mount. Devices are mounted through [`Self::mount_device`].
    fn mount<'a>(&'a self, _mount_dir: &'a str, _options: &'a Options) -> DriverFuture<'a> {
        Box::pin(future::ready(DriverStatus::not_supported(
            "mount is handled by mountdevice",
        )))
    }

    /// Pod-level unmount. Devices are unmounted through
    /// [`Self::unmount_device`].
    fn unmount<'a>(&'a self, _mount_dir: &'a str) -> DriverFuture<'a> {
        Box::pin(future::ready(DriverStatus::not_supported(
            "unmount is handled by unmountdevice",
        )))
    }

    /// Volume naming is left to the orchestrator.
    fn get_volume_name<'a>(&'a self, _options: &'a Options) -> DriverFuture<'a> {
        Box::pin(future::ready(DriverStatus::not_supported(
            "getvolumename is not supported",
        )))
    }
}
