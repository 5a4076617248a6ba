//! Linux host implementation of the bridge capabilities.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tracing::info;

use super::command::{CommandRunner, args};
use super::{
    BlockDevices, BridgeError, IscsiAdm, IscsiInitiator, IscsiTarget, MountEntry, Mounter,
};

const PROC_DIR: &str = "/proc";
const MOUNTS_FILE: &str = "mounts";
const BY_PATH_DIR: &str = "/dev/disk/by-path";
const DEFAULT_FS_TYPE: &str = "ext4";
/// `blkid` exit status when the device carries no recognised filesystem.
const BLKID_NOTHING_FOUND: i32 = 2;

/// Node host backed by `iscsiadm`, `mount`, `umount`, `blkid` and `mkfs`.
#[derive(Clone, Debug, Default)]
pub struct LinuxHost<R> {
    runner: R,
    iscsi: IscsiAdm<R>,
}

impl<R: CommandRunner + Clone> LinuxHost<R> {
    /// Creates a host that runs commands through `runner`.
    #[must_use]
    pub fn new(runner: R) -> Self {
        Self {
            iscsi: IscsiAdm::new(runner.clone()),
            runner,
        }
    }
}

impl<R: CommandRunner> LinuxHost<R> {
    fn probe_filesystem(&self, device: &str) -> Result<Option<String>, BridgeError> {
        let output = self
            .runner
            .run("blkid", &args(&["-p", "-s", "TYPE", "-o", "value", device]))?;
        if output.code == Some(BLKID_NOTHING_FOUND) {
            return Ok(None);
        }
        let output = output.into_success("blkid")?;
        let fs_type = output.stdout.trim();
        Ok((!fs_type.is_empty()).then(|| fs_type.to_owned()))
    }

    fn format(&self, device: &str, fs_type: &str) -> Result<(), BridgeError> {
        let program = format!("mkfs.{fs_type}");
        let argv = if fs_type.starts_with("ext") {
            args(&["-F", device])
        } else {
            args(&[device])
        };
        self.runner.run(&program, &argv)?.into_success(&program)?;
        info!(device, fs_type, "formatted device");
        Ok(())
    }
}

fn canonical(path: &str) -> Option<Utf8PathBuf> {
    std::fs::canonicalize(path)
        .ok()
        .and_then(|resolved| Utf8PathBuf::from_path_buf(resolved).ok())
}

/// Parses `/proc/mounts` content, decoding the octal escapes used for
/// whitespace in paths.
pub(super) fn parse_mount_table(contents: &str) -> Vec<MountEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let fs_type = fields.next()?;
            Some(MountEntry {
                source: unescape_mount_field(source),
                target: unescape_mount_field(target),
                fs_type: fs_type.to_owned(),
            })
        })
        .collect()
}

fn unescape_mount_field(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

impl<R: CommandRunner> IscsiInitiator for LinuxHost<R> {
    fn add_to_db(&self, target: &IscsiTarget) -> Result<(), BridgeError> {
        self.iscsi.add_to_db(target)
    }

    fn set_automatic_login(&self, target: &IscsiTarget) -> Result<(), BridgeError> {
        self.iscsi.set_automatic_login(target)
    }

    fn login(&self, target: &IscsiTarget) -> Result<(), BridgeError> {
        self.iscsi.login(target)
    }

    fn logout(&self, target: &IscsiTarget) -> Result<(), BridgeError> {
        self.iscsi.logout(target)
    }

    fn remove_from_db(&self, target: &IscsiTarget) -> Result<(), BridgeError> {
        self.iscsi.remove_from_db(target)
    }
}

impl<R: CommandRunner> BlockDevices for LinuxHost<R> {
    fn device_exists(&self, device: &str) -> Result<bool, BridgeError> {
        Utf8Path::new(device)
            .try_exists()
            .map_err(|err| BridgeError::Io {
                path: device.to_owned(),
                message: err.to_string(),
            })
    }

    fn device_opened(&self, device: &str) -> Result<bool, BridgeError> {
        let resolved = canonical(device);
        Ok(self.mounts()?.iter().any(|entry| {
            entry.source == device
                || resolved
                    .as_ref()
                    .is_some_and(|path| entry.source == path.as_str())
        }))
    }

    fn by_path_link(&self, device: &str) -> Result<Option<String>, BridgeError> {
        let Some(resolved) = canonical(device) else {
            return Ok(None);
        };
        let io_error = |err: io::Error| BridgeError::Io {
            path: BY_PATH_DIR.to_owned(),
            message: err.to_string(),
        };

        let dir = match Dir::open_ambient_dir(BY_PATH_DIR, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(err)),
        };
        for entry in dir.entries().map_err(io_error)? {
            let name = entry.map_err(io_error)?.file_name().map_err(io_error)?;
            if !name.contains("-iscsi-") {
                continue;
            }
            let link = Utf8Path::new(BY_PATH_DIR).join(&name);
            if canonical(link.as_str()).as_ref() == Some(&resolved) {
                return Ok(Some(link.into_string()));
            }
        }
        Ok(None)
    }

    fn format_and_mount(
        &self,
        device: &str,
        target: &str,
        fs_type: &str,
        options: &[&str],
    ) -> Result<(), BridgeError> {
        let requested = if fs_type.is_empty() {
            DEFAULT_FS_TYPE
        } else {
            fs_type
        };
        match self.probe_filesystem(device)? {
            None => self.format(device, requested)?,
            Some(existing) if existing != requested => {
                return Err(BridgeError::FilesystemMismatch {
                    device: device.to_owned(),
                    existing,
                    requested: requested.to_owned(),
                });
            }
            Some(_) => {}
        }
        self.mount(device, target, requested, options)
    }
}

impl<R: CommandRunner> Mounter for LinuxHost<R> {
    fn mounts(&self) -> Result<Vec<MountEntry>, BridgeError> {
        let path = format!("{PROC_DIR}/{MOUNTS_FILE}");
        let io_error = |err: io::Error| BridgeError::Io {
            path: path.clone(),
            message: err.to_string(),
        };
        let dir = Dir::open_ambient_dir(PROC_DIR, ambient_authority()).map_err(io_error)?;
        let contents = dir.read_to_string(MOUNTS_FILE).map_err(io_error)?;
        Ok(parse_mount_table(&contents))
    }

    fn mount(
        &self,
        source: &str,
        target: &str,
        fs_type: &str,
        options: &[&str],
    ) -> Result<(), BridgeError> {
        let mut argv = args(&["-t", fs_type]);
        let joined = options.join(",");
        if !joined.is_empty() {
            argv.extend(args(&["-o", &joined]));
        }
        argv.extend(args(&[source, target]));
        self.runner.run("mount", &argv)?.into_success("mount")?;
        info!(source, target, fs_type, "mounted");
        Ok(())
    }

    fn unmount(&self, target: &str) -> Result<(), BridgeError> {
        self.runner
            .run("umount", &args(&[target]))?
            .into_success("umount")?;
        info!(target, "unmounted");
        Ok(())
    }
}
