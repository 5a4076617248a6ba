//! In-memory node host used by unit and behavioural tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::bridge::{
    BlockDevices, BridgeError, IscsiInitiator, IscsiTarget, MountEntry, Mounter,
};

/// Simulated node: iSCSI initiator, block devices and mount table.
///
/// Logging in to a target makes its by-path device appear; logging out
/// removes it. Filesystems written to a device survive logout, so a later
/// login sees what an earlier mount formatted.
#[derive(Clone, Debug, Default)]
pub struct FakeHost {
    state: Arc<Mutex<HostState>>,
}

#[derive(Debug, Default)]
struct HostState {
    directories: BTreeSet<String>,
    initiator_db: BTreeSet<String>,
    automatic_login: BTreeSet<String>,
    sessions: BTreeSet<String>,
    devices: BTreeSet<String>,
    filesystems: BTreeMap<String, String>,
    mounts: Vec<MountEntry>,
    withhold_devices: bool,
    failures: BTreeMap<String, VecDeque<BridgeError>>,
    calls: Vec<String>,
    formats: usize,
}

impl HostState {
    fn record(&mut self, operation: &str) -> Result<(), BridgeError> {
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
}

impl FakeHost {
    /// Creates an empty host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Creates a directory that can serve as a mount point.
    pub fn add_directory(&self, path: &str) {
        self.lock().directories.insert(path.to_owned());
    }

    /// Seeds a filesystem on `device`, as if formatted earlier.
    pub fn add_filesystem(&self, device: &str, fs_type: &str) {
        self.lock()
            .filesystems
            .insert(device.to_owned(), fs_type.to_owned());
    }

    /// Seeds a mount-table entry.
    pub fn add_mount(&self, source: &str, target: &str, fs_type: &str) {
        self.lock().mounts.push(MountEntry {
            source: source.to_owned(),
            target: target.to_owned(),
            fs_type: fs_type.to_owned(),
        });
    }

    /// Keeps logged-in devices from ever appearing.
    pub fn withhold_devices(&self) {
        self.lock().withhold_devices = true;
    }

    /// Makes the next call to `operation` fail with `error`.
    pub fn fail_next(&self, operation: &str, error: BridgeError) {
        self.lock()
            .failures
            .entry(operation.to_owned())
            .or_default()
            .push_back(error);
    }

    /// Ordered log of every capability call.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of times a device was formatted.
    #[must_use]
    pub fn formats(&self) -> usize {
        self.lock().formats
    }

    /// Snapshot of the mount table.
    #[must_use]
    pub fn mount_table(&self) -> Vec<MountEntry> {
        self.lock().mounts.clone()
    }

    /// Targets with an open session.
    #[must_use]
    pub fn sessions(&self) -> Vec<String> {
        self.lock().sessions.iter().cloned().collect()
    }

    /// Targets recorded in the initiator database.
    #[must_use]
    pub fn initiator_records(&self) -> Vec<String> {
        self.lock().initiator_db.iter().cloned().collect()
    }

    /// Filesystem currently written to `device`.
    #[must_use]
    pub fn filesystem(&self, device: &str) -> Option<String> {
        self.lock().filesystems.get(device).cloned()
    }
}

impl IscsiInitiator for FakeHost {
    fn add_to_db(&self, target: &IscsiTarget) -> Result<(), BridgeError> {
        let mut state = self.lock();
        state.record("add_to_db")?;
        state.initiator_db.insert(target.iqn.clone());
        Ok(())
    }

    fn set_automatic_login(&self, target: &IscsiTarget) -> Result<(), BridgeError> {
        let mut state = self.lock();
        state.record("set_automatic_login")?;
        if !state.initiator_db.contains(&target.iqn) {
            return Err(BridgeError::Command {
                program: String::from("iscsiadm"),
                code: Some(21),
                stderr: String::from("No records found"),
            });
        }
        state.automatic_login.insert(target.iqn.clone());
        Ok(())
    }

    fn login(&self, target: &IscsiTarget) -> Result<(), BridgeError> {
        let mut state = self.lock();
        state.record("login")?;
        state.sessions.insert(target.iqn.clone());
        if !state.withhold_devices {
            state.devices.insert(target.device_path());
        }
        Ok(())
    }

    fn logout(&self, target: &IscsiTarget) -> Result<(), BridgeError> {
        let mut state = self.lock();
        state.record("logout")?;
        state.sessions.remove(&target.iqn);
        state.devices.remove(&target.device_path());
        Ok(())
    }

    fn remove_from_db(&self, target: &IscsiTarget) -> Result<(), BridgeError> {
        let mut state = self.lock();
        state.record("remove_from_db")?;
        state.initiator_db.remove(&target.iqn);
        state.automatic_login.remove(&target.iqn);
        Ok(())
    }
}

impl BlockDevices for FakeHost {
    fn device_exists(&self, device: &str) -> Result<bool, BridgeError> {
        let mut state = self.lock();
        state.record("device_exists")?;
        Ok(state.devices.contains(device))
    }

    fn device_opened(&self, device: &str) -> Result<bool, BridgeError> {
        let mut state = self.lock();
        state.record("device_opened")?;
        Ok(state.mounts.iter().any(|entry| entry.source == device))
    }

    fn by_path_link(&self, device: &str) -> Result<Option<String>, BridgeError> {
        let mut state = self.lock();
        state.record("by_path_link")?;
        Ok(IscsiTarget::from_device_path(device)
            .ok()
            .map(|_| device.to_owned()))
    }

    fn format_and_mount(
        &self,
        device: &str,
        target: &str,
        fs_type: &str,
        options: &[&str],
    ) -> Result<(), BridgeError> {
        {
            let mut state = self.lock();
            state.record("format_and_mount")?;
            if !state.devices.contains(device) {
                return Err(BridgeError::Command {
                    program: String::from("blkid"),
                    code: Some(2),
                    stderr: format!("{device}: No such file or directory"),
                });
            }
            match state.filesystems.get(device) {
                Some(existing) if existing != fs_type => {
                    return Err(BridgeError::FilesystemMismatch {
                        device: device.to_owned(),
                        existing: existing.clone(),
                        requested: fs_type.to_owned(),
                    });
                }
                Some(_) => {}
                None => {
                    state
                        .filesystems
                        .insert(device.to_owned(), fs_type.to_owned());
                    state.formats += 1;
                }
            }
        }
        self.mount(device, target, fs_type, options)
    }
}

impl Mounter for FakeHost {
    fn mounts(&self) -> Result<Vec<MountEntry>, BridgeError> {
        let mut state = self.lock();
        state.record("mounts")?;
        Ok(state.mounts.clone())
    }

    fn mount(
        &self,
        source: &str,
        target: &str,
        fs_type: &str,
        _options: &[&str],
    ) -> Result<(), BridgeError> {
        let mut state = self.lock();
        state.record("mount")?;
        if !state.directories.contains(target) {
            return Err(BridgeError::Command {
                program: String::from("mount"),
                code: Some(32),
                stderr: format!("mount point {target} does not exist"),
            });
        }
        state.mounts.push(MountEntry {
            source: source.to_owned(),
            target: target.to_owned(),
            fs_type: fs_type.to_owned(),
        });
        Ok(())
    }

    fn unmount(&self, target: &str) -> Result<(), BridgeError> {
        let mut state = self.lock();
        state.record("unmount")?;
        let Some(index) = state.mounts.iter().rposition(|entry| entry.target == target) else {
            return Err(BridgeError::Command {
                program: String::from("umount"),
                code: Some(32),
                stderr: format!("{target}: not mounted"),
            });
        };
        state.mounts.remove(index);
        Ok(())
    }
}
