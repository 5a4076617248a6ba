//! Flexvolume driver for Oracle Cloud Infrastructure.
//!
//! The kubelet and controller manager invoke the driver once per call-out.
//! Controller-side call-outs reconcile volume attachments and file-storage
//! exports against the control plane; node-side call-outs log in to iSCSI
//! targets and mount the resulting devices or NFS exports. Each call-out
//! answers with a single JSON status on stdout.

pub mod attachment;
pub mod bridge;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod driver;
pub mod filestorage;
pub mod flexvolume;
pub mod logging;
pub mod metadata;
pub mod resolver;
pub mod test_support;
pub mod vnic_cache;
pub mod volume_id;

pub use driver::{DriverError, DriverKind, DriverSet, DriverTable, HttpConnector};
pub use flexvolume::{CallOut, Driver, DriverStatus, Options, Status};
