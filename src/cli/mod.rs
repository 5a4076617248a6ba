//! Command-line interface definitions for the `oci-flexvolume` binary.
//!
//! The kubelet invokes the driver with a call-out verb followed by
//! positional arguments. This module holds the clap structures so both the
//! library and the build script can reuse them when generating the manual
//! page.

use clap::{Parser, Subcommand};

/// Top-level CLI for the `oci-flexvolume` binary.
#[derive(Debug, Parser)]
#[command(
    name = "oci-flexvolume",
    about = "Flexvolume driver for OCI block volumes and file systems",
    disable_help_subcommand = true
)]
pub struct Cli {
    /// Call-out requested by the kubelet or controller manager.
    #[command(subcommand)]
    pub call_out: CallOutCommand,
}

/// Flexvolume call-outs. Options are passed as a JSON object.
#[derive(Debug, Subcommand)]
pub enum CallOutCommand {
    /// Check the driver configuration and report capabilities.
    #[command(name = "init")]
    Init,
    /// Report a unique volume name (not supported).
    #[command(name = "getvolumename")]
    GetVolumeName {
        /// JSON options.
        options: String,
    },
    /// Attach a volume to a node.
    #[command(name = "attach")]
    Attach {
        /// JSON options.
        options: String,
        /// Node the volume is attached to.
        node_name: String,
    },
    /// Detach a volume from a node.
    #[command(name = "detach")]
    Detach {
        /// Volume name or OCID.
        volume: String,
        /// Node the volume is detached from.
        node_name: String,
    },
    /// Wait for an attached device to become usable.
    #[command(name = "waitforattach")]
    WaitForAttach {
        /// Device returned by attach.
        device: String,
        /// JSON options.
        options: String,
    },
    /// Check whether a volume is attached to a node.
    #[command(name = "isattached")]
    IsAttached {
        /// JSON options.
        options: String,
        /// Node to check.
        node_name: String,
    },
    /// Mount an attached device at its global mount directory.
    #[command(name = "mountdevice")]
    MountDevice {
        /// Global mount directory.
        mount_dir: String,
        /// Device returned by attach.
        device: String,
        /// JSON options.
        options: String,
    },
    /// Unmount a device from its global mount directory.
    #[command(name = "unmountdevice")]
    UnmountDevice {
        /// Global mount directory.
        mount_dir: String,
    },
    /// Mount a volume into a pod directory (not supported).
    #[command(name = "mount")]
    Mount {
        /// Pod mount directory.
        mount_dir: String,
        /// JSON options.
        options: String,
    },
    /// Unmount a volume from a pod directory (not supported).
    #[command(name = "unmount")]
    Unmount {
        /// Pod mount directory.
        mount_dir: String,
    },
}
