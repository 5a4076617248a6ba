//! Directories the driver reads from and writes to on the node.

use std::env;

use camino::Utf8PathBuf;

use crate::vnic_cache::CACHE_FILE_NAME;

/// Environment variable overriding the driver installation directory.
pub const DRIVER_DIRECTORY_ENV: &str = "OCI_FLEXD_DRIVER_DIRECTORY";
/// Environment variable overriding the configuration directory.
pub const CONFIG_DIRECTORY_ENV: &str = "OCI_FLEXD_CONFIG_DIRECTORY";
/// Environment variable overriding the cache directory.
pub const CACHE_DIRECTORY_ENV: &str = "OCI_FLEXD_CACHE_DIRECTORY";
/// Environment variable overriding the log directory.
pub const LOG_DIRECTORY_ENV: &str = "OCI_FLEXD_DRIVER_LOG_DIR";

/// Default kubelet plugin directory for the driver.
pub const DEFAULT_DRIVER_DIRECTORY: &str =
    "/usr/libexec/kubernetes/kubelet-plugins/volume/exec/oracle~oci";
/// Name of the configuration file inside the configuration directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";
/// Name of the log file inside the log directory.
pub const LOG_FILE_NAME: &str = "oci_flexvolume_driver.log";

/// Resolved driver directories.
///
/// Every directory falls back to the driver directory when its variable is
/// unset or empty.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DriverPaths {
    /// Directory the driver executable is installed in.
    pub driver_dir: Utf8PathBuf,
    /// Directory holding `config.toml`.
    pub config_dir: Utf8PathBuf,
    /// Directory holding the VNIC cache.
    pub cache_dir: Utf8PathBuf,
    /// Directory receiving the driver log.
    pub log_dir: Utf8PathBuf,
}

impl DriverPaths {
    /// Resolves directories from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolves directories through `lookup`, which maps variable names to
    /// values.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let driver_dir = read(DRIVER_DIRECTORY_ENV)
            .map_or_else(|| Utf8PathBuf::from(DEFAULT_DRIVER_DIRECTORY), Utf8PathBuf::from);
        let or_driver_dir = |key: &str| {
            read(key).map_or_else(|| driver_dir.clone(), Utf8PathBuf::from)
        };
        Self {
            config_dir: or_driver_dir(CONFIG_DIRECTORY_ENV),
            cache_dir: or_driver_dir(CACHE_DIRECTORY_ENV),
            log_dir: or_driver_dir(LOG_DIRECTORY_ENV),
            driver_dir,
        }
    }

    /// Path of the configuration file.
    #[must_use]
    pub fn config_file(&self) -> Utf8PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    /// Path of the shared VNIC cache.
    #[must_use]
    pub fn cache_file(&self) -> Utf8PathBuf {
        self.cache_dir.join(CACHE_FILE_NAME)
    }

    /// Path of the driver log.
    #[must_use]
    pub fn log_file(&self) -> Utf8PathBuf {
        self.log_dir.join(LOG_FILE_NAME)
    }
}
