//! Parsing of the kubelet's argument vector into a typed call-out.

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use thiserror::Error;
use tracing::info;

use super::{Driver, DriverStatus, Options};
use crate::cli::{CallOutCommand, Cli};

/// Errors raised while interpreting call-out arguments.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum CallOutError {
    /// Raised when the driver is invoked without a verb.
    #[error("Expected at least one argument")]
    MissingVerb,
    /// Raised when a verb receives the wrong number of arguments.
    #[error("{verb} expected exactly {expected} arguments; got {args:?}")]
    Arity {
        /// Verb that was invoked.
        verb: String,
        /// Expected argument count, program name included.
        expected: usize,
        /// Arguments actually received.
        args: Vec<String>,
    },
    /// Raised for verbs the driver does not know.
    #[error("Invalid command; got {args:?}")]
    UnknownVerb {
        /// Arguments received.
        args: Vec<String>,
    },
    /// Raised when the options argument is not a JSON string map.
    #[error("failed to unmarshal options {raw:?}: {message}")]
    InvalidOptions {
        /// Raw options argument.
        raw: String,
        /// Decoder error.
        message: String,
    },
    /// Raised when a secret option is not valid base64 text.
    #[error("failed to decode secret option {key}: {message}")]
    InvalidSecret {
        /// Offending option key.
        key: String,
        /// Decoder error.
        message: String,
    },
    /// Raised for any other usage error, such as `--help`.
    #[error("{message}")]
    Usage {
        /// Rendered clap message.
        message: String,
    },
}

/// A parsed flexvolume call-out.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CallOut {
    /// `init`
    Init,
    /// `getvolumename <json>`
    GetVolumeName {
        /// Decoded options.
        options: Options,
    },
    /// `attach <json> <node>`
    Attach {
        /// Decoded options.
        options: Options,
        /// Target node.
        node_name: String,
    },
    /// `detach <volume> <node>`
    Detach {
        /// Volume name or OCID.
        volume: String,
        /// Node the volume is detached from.
        node_name: String,
    },
    /// `waitforattach <device> <json>`
    WaitForAttach {
        /// Device returned by attach.
        device: String,
        /// Decoded options.
        options: Options,
    },
    /// `isattached <json> <node>`
    IsAttached {
        /// Decoded options.
        options: Options,
        /// Node to check.
        node_name: String,
    },
    /// `mountdevice <dir> <device> <json>`
    MountDevice {
        /// Global mount directory.
        mount_dir: String,
        /// Device returned by attach.
        device: String,
        /// Decoded options.
        options: Options,
    },
    /// `unmountdevice <dir>`
    UnmountDevice {
        /// Global mount directory.
        mount_dir: String,
    },
    /// `mount <dir> <json>`
    Mount {
        /// Pod mount directory.
        mount_dir: String,
        /// Decoded options.
        options: Options,
    },
    /// `unmount <dir>`
    Unmount {
        /// Pod mount directory.
        mount_dir: String,
    },
}

impl CallOut {
    /// Parses a full argument vector, program name first.
    ///
    /// # Errors
    ///
    /// Returns [`CallOutError`] for a missing or unknown verb, a wrong
    /// argument count, or undecodable options.
    pub fn parse(args: &[String]) -> Result<Self, CallOutError> {
        let cli = Cli::try_parse_from(args).map_err(|err| usage_error(&err, args))?;
        Self::from_command(cli.call_out)
    }

    fn from_command(command: CallOutCommand) -> Result<Self, CallOutError> {
        Ok(match command {
            CallOutCommand::Init => Self::Init,
            CallOutCommand::GetVolumeName { options } => Self::GetVolumeName {
                options: Options::parse(&options)?,
            },
            CallOutCommand::Attach { options, node_name } => Self::Attach {
                options: Options::parse(&options)?,
                node_name,
            },
            CallOutCommand::Detach { volume, node_name } => Self::Detach { volume, node_name },
            CallOutCommand::WaitForAttach { device, options } => Self::WaitForAttach {
                device,
                options: Options::parse(&options)?,
            },
            CallOutCommand::IsAttached { options, node_name } => Self::IsAttached {
                options: Options::parse(&options)?,
                node_name,
            },
            CallOutCommand::MountDevice {
                mount_dir,
                device,
                options,
            } => Self::MountDevice {
                mount_dir,
                device,
                options: Options::parse(&options)?,
            },
            CallOutCommand::UnmountDevice { mount_dir } => Self::UnmountDevice { mount_dir },
            CallOutCommand::Mount { mount_dir, options } => Self::Mount {
                mount_dir,
                options: Options::parse(&options)?,
            },
            CallOutCommand::Unmount { mount_dir } => Self::Unmount { mount_dir },
        })
    }

    /// The call-out verb as the kubelet spells it.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::GetVolumeName { .. } => "getvolumename",
            Self::Attach { .. } => "attach",
            Self::Detach { .. } => "detach",
            Self::WaitForAttach { .. } => "waitforattach",
            Self::IsAttached { .. } => "isattached",
            Self::MountDevice { .. } => "mountdevice",
            Self::UnmountDevice { .. } => "unmountdevice",
            Self::Mount { .. } => "mount",
            Self::Unmount { .. } => "unmount",
        }
    }

    /// The volume identifier this call-out carries, if any.
    #[must_use]
    pub fn volume_name(&self) -> Option<&str> {
        match self {
            Self::Detach { volume, .. } => Some(volume),
            Self::GetVolumeName { options }
            | Self::Attach { options, .. }
            | Self::WaitForAttach { options, .. }
            | Self::IsAttached { options, .. }
            | Self::MountDevice { options, .. }
            | Self::Mount { options, .. } => options.volume_name(),
            Self::Init | Self::UnmountDevice { .. } | Self::Unmount { .. } => None,
        }
    }

    /// Runs the call-out against `driver`.
    pub async fn dispatch<D>(&self, driver: &D) -> DriverStatus
    where
        D: Driver + ?Sized,
    {
        info!(verb = self.verb(), "dispatching call-out");
        match self {
            Self::Init => driver.init().await,
            Self::GetVolumeName { options } => driver.get_volume_name(options).await,
            Self::Attach { options, node_name } => driver.attach(options, node_name).await,
            Self::Detach { volume, node_name } => driver.detach(volume, node_name).await,
            Self::WaitForAttach { device, options } => {
                driver.wait_for_attach(device, options).await
            }
            Self::IsAttached { options, node_name } => {
                driver.is_attached(options, node_name).await
            }
            Self::MountDevice {
                mount_dir,
                device,
                options,
            } => driver.mount_device(mount_dir, device, options).await,
            Self::UnmountDevice { mount_dir } => driver.unmount_device(mount_dir).await,
            Self::Mount { mount_dir, options } => driver.mount(mount_dir, options).await,
            Self::Unmount { mount_dir } => driver.unmount(mount_dir).await,
        }
    }
}

/// Number of arguments `verb` takes, program name and verb included.
fn expected_arity(verb: &str) -> Option<usize> {
    Cli::command()
        .find_subcommand(verb)
        .map(|sub| sub.get_positionals().count() + 2)
}

fn usage_error(err: &clap::Error, args: &[String]) -> CallOutError {
    let verb = args.get(1);
    match err.kind() {
        ErrorKind::MissingSubcommand | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
            if verb.is_none() =>
        {
            CallOutError::MissingVerb
        }
        ErrorKind::InvalidSubcommand | ErrorKind::UnknownArgument
            if verb.and_then(|name| expected_arity(name)).is_none() =>
        {
            CallOutError::UnknownVerb {
                args: args.to_vec(),
            }
        }
        ErrorKind::MissingRequiredArgument
        | ErrorKind::UnknownArgument
        | ErrorKind::TooManyValues
        | ErrorKind::WrongNumberOfValues => match verb.and_then(|name| {
            expected_arity(name).map(|expected| (name, expected))
        }) {
            Some((name, expected)) => CallOutError::Arity {
                verb: name.clone(),
                expected,
                args: args.to_vec(),
            },
            None => CallOutError::UnknownVerb {
                args: args.to_vec(),
            },
        },
        _ => CallOutError::Usage {
            message: err.to_string().trim().to_owned(),
        },
    }
}
