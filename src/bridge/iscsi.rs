//! iSCSI target naming and the `iscsiadm` initiator.

use std::ffi::OsString;
use std::fmt;
use std::net::Ipv4Addr;

use tracing::info;

use super::command::{CommandRunner, args};
use super::{BridgeError, IscsiInitiator};

const BY_PATH_DIR: &str = "/dev/disk/by-path/";
const ISCSIADM: &str = "iscsiadm";

/// An iSCSI target as exposed by a block volume attachment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IscsiTarget {
    /// Target portal address.
    pub ip: Ipv4Addr,
    /// Target portal port.
    pub port: u16,
    /// Target qualified name.
    pub iqn: String,
    /// Logical unit number. OCI volumes are always LUN 1.
    pub lun: u16,
}

impl IscsiTarget {
    /// LUN used by OCI block volume attachments.
    pub const DEFAULT_LUN: u16 = 1;

    /// Creates a target on the default LUN.
    #[must_use]
    pub fn new(ip: Ipv4Addr, port: u16, iqn: impl Into<String>) -> Self {
        Self {
            ip,
            port,
            iqn: iqn.into(),
            lun: Self::DEFAULT_LUN,
        }
    }

    /// Parses a `/dev/disk/by-path/ip-<ip>:<port>-iscsi-<iqn>-lun-<n>` path.
    /// The directory prefix is optional.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidDevicePath`] when `device` does not
    /// follow that layout.
    pub fn from_device_path(device: &str) -> Result<Self, BridgeError> {
        let invalid = |reason: &str| BridgeError::InvalidDevicePath {
            device: device.to_owned(),
            reason: reason.to_owned(),
        };

        let name = device.strip_prefix(BY_PATH_DIR).unwrap_or(device);
        let portal_and_rest = name
            .strip_prefix("ip-")
            .ok_or_else(|| invalid("expected an ip-<address>:<port> prefix"))?;
        let (portal, rest) = portal_and_rest
            .split_once("-iscsi-")
            .ok_or_else(|| invalid("missing -iscsi- separator"))?;
        let (ip, port) = portal
            .rsplit_once(':')
            .ok_or_else(|| invalid("portal is missing a port"))?;
        let (iqn, lun) = rest
            .rsplit_once("-lun-")
            .ok_or_else(|| invalid("missing -lun- suffix"))?;
        if iqn.is_empty() {
            return Err(invalid("empty target name"));
        }

        Ok(Self {
            ip: ip.parse().map_err(|_| invalid("portal address is not IPv4"))?,
            port: port.parse().map_err(|_| invalid("portal port is not a number"))?,
            iqn: iqn.to_owned(),
            lun: lun.parse().map_err(|_| invalid("LUN is not a number"))?,
        })
    }

    /// The `/dev/disk/by-path` device this target appears as once logged in.
    #[must_use]
    pub fn device_path(&self) -> String {
        format!(
            "{BY_PATH_DIR}ip-{}:{}-iscsi-{}-lun-{}",
            self.ip, self.port, self.iqn, self.lun
        )
    }

    /// The `<ip>:<port>` portal string.
    #[must_use]
    pub fn portal(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl fmt::Display for IscsiTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.iqn, self.portal())
    }
}

/// [`IscsiInitiator`] driving `open-iscsi` through `iscsiadm`.
#[derive(Clone, Debug, Default)]
pub struct IscsiAdm<R> {
    runner: R,
}

impl<R: CommandRunner> IscsiAdm<R> {
    /// Wraps `runner`.
    pub const fn new(runner: R) -> Self {
        Self { runner }
    }

    fn node_command(&self, target: &IscsiTarget, extra: &[&str]) -> Result<(), BridgeError> {
        let portal = target.portal();
        let mut argv: Vec<OsString> = args(&["-m", "node", "-p", &portal, "-T", &target.iqn]);
        argv.extend(args(extra));
        self.runner.run(ISCSIADM, &argv)?.into_success(ISCSIADM)?;
        Ok(())
    }
}

impl<R: CommandRunner> IscsiInitiator for IscsiAdm<R> {
    fn add_to_db(&self, target: &IscsiTarget) -> Result<(), BridgeError> {
        self.node_command(target, &["-o", "new"])
    }

    fn set_automatic_login(&self, target: &IscsiTarget) -> Result<(), BridgeError> {
        self.node_command(
            target,
            &["-o", "update", "-n", "node.startup", "-v", "automatic"],
        )
    }

    fn login(&self, target: &IscsiTarget) -> Result<(), BridgeError> {
        self.node_command(target, &["-l"])?;
        info!(%target, "logged in to iSCSI target");
        Ok(())
    }

    fn logout(&self, target: &IscsiTarget) -> Result<(), BridgeError> {
        self.node_command(target, &["-u"])?;
        info!(%target, "logged out of iSCSI target");
        Ok(())
    }

    fn remove_from_db(&self, target: &IscsiTarget) -> Result<(), BridgeError> {
        self.node_command(target, &["-o", "delete"])
    }
}
