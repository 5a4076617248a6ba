//! Driver configuration: discovery, parsing, defaulting and validation.
//!
//! The configuration lives in `config.toml` next to the driver (or in
//! `OCI_FLEXD_CONFIG_DIRECTORY`). Only master nodes carry one; worker nodes
//! run the mount call-outs, which never talk to the control plane.

mod paths;

use std::env;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::ConfigDiscovery;
use ortho_config::toml;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::metadata::{MetadataError, MetadataSource};

pub use paths::{
    CACHE_DIRECTORY_ENV, CONFIG_DIRECTORY_ENV, CONFIG_FILE_NAME, DEFAULT_DRIVER_DIRECTORY,
    DRIVER_DIRECTORY_ENV, DriverPaths, LOG_DIRECTORY_ENV, LOG_FILE_NAME,
};

const APP_NAME: &str = "oci-flexvolume";
/// Environment variable naming an explicit configuration file.
pub const CONFIG_PATH_ENV: &str = "OCI_FLEXD_CONFIG_PATH";
const DOTFILE_NAME: &str = ".oci-flexvolume.toml";
const AUTH_SECTION: &str = "auth";

/// Errors raised while loading configuration.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Raised when no configuration file exists.
    #[error("config file {path} does not exist")]
    NotFound {
        /// Location that was expected to hold the file.
        path: Utf8PathBuf,
    },
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the file is not valid TOML for [`OciConfig`].
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a required field is empty.
    #[error("missing {description}: add {toml_key} to [{section}] in {path}")]
    MissingField {
        /// What the field holds.
        description: &'static str,
        /// TOML key of the field.
        toml_key: &'static str,
        /// TOML table holding the field.
        section: &'static str,
        /// File that was validated.
        path: Utf8PathBuf,
    },
    /// Raised when defaults cannot be read from instance metadata.
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// API credentials and cluster identifiers, the `[auth]` table.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// Region name, for example `us-phoenix-1`.
    pub region: String,
    /// Short region key, for example `phx`.
    #[serde(alias = "regionKey")]
    pub region_key: String,
    /// Tenancy OCID.
    pub tenancy: String,
    /// Compartment holding the cluster's instances and volumes.
    pub compartment: String,
    /// User OCID used for key-based signing.
    pub user: String,
    /// PEM-encoded API signing key.
    pub key: String,
    /// Passphrase of the signing key.
    pub passphrase: String,
    /// Deprecated spelling of [`Self::passphrase`].
    #[serde(alias = "key_passphase")]
    pub key_passphrase: String,
    /// Fingerprint of the signing key.
    pub fingerprint: String,
    /// VCN the cluster's nodes are attached to.
    pub vcn: String,
}

/// Parsed `config.toml`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct OciConfig {
    /// Credentials and identifiers.
    pub auth: AuthConfig,
    /// Authenticate as the instance rather than with a user key.
    #[serde(alias = "useInstancePrincipals")]
    pub use_instance_principals: bool,
    /// Base URL replacing the regional API endpoints.
    pub endpoint: Option<String>,
}

/// Metadata for a configuration field, used to generate actionable error
/// messages.
struct FieldMetadata {
    description: &'static str,
    toml_key: &'static str,
    value: fn(&AuthConfig) -> &str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        toml_key: &'static str,
        value: fn(&AuthConfig) -> &str,
    ) -> Self {
        Self {
            description,
            toml_key,
            value,
        }
    }
}

const VCN_FIELD: FieldMetadata = FieldMetadata::new("cluster VCN OCID", "vcn", |auth| &auth.vcn);

const CREDENTIAL_FIELDS: [FieldMetadata; 4] = [
    FieldMetadata::new("tenancy OCID", "tenancy", |auth| &auth.tenancy),
    FieldMetadata::new("user OCID", "user", |auth| &auth.user),
    FieldMetadata::new("API signing key", "key", |auth| &auth.key),
    FieldMetadata::new("API key fingerprint", "fingerprint", |auth| &auth.fingerprint),
];

impl OciConfig {
    /// Parses TOML `contents` read from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the content does not match the
    /// expected layout.
    pub fn parse(path: &Utf8Path, contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    /// Fills `region`, `region_key` and `compartment` from instance metadata
    /// when unset, and migrates the deprecated passphrase key.
    ///
    /// Metadata is only queried when a value is missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Metadata`] when the metadata service is needed
    /// but unavailable.
    pub async fn apply_defaults<M>(&mut self, metadata: &M) -> Result<(), ConfigError>
    where
        M: MetadataSource + ?Sized,
    {
        let auth = &mut self.auth;
        if auth.region.is_empty() || auth.region_key.is_empty() || auth.compartment.is_empty() {
            let instance = metadata.fetch().await?;
            debug!(region = %instance.region, "filling configuration defaults from metadata");
            if auth.region.is_empty() {
                auth.region = instance.region;
            }
            if auth.region_key.is_empty() {
                auth.region_key = instance.region_key;
            }
            if auth.compartment.is_empty() {
                auth.compartment = instance.compartment_id;
            }
        }
        if auth.passphrase.is_empty() && !auth.key_passphrase.is_empty() {
            warn!(
                "auth.key_passphrase is deprecated and will be removed in a later release; \
                 set auth.passphrase instead"
            );
            auth.passphrase = auth.key_passphrase.clone();
        }
        Ok(())
    }

    /// Checks that required fields are populated.
    ///
    /// `vcn` is always required. The credential fields are required unless
    /// instance principals are enabled, in which case they are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the first empty field.
    pub fn validate(&self, path: &Utf8Path) -> Result<(), ConfigError> {
        let missing = |field: &FieldMetadata| ConfigError::MissingField {
            description: field.description,
            toml_key: field.toml_key,
            section: AUTH_SECTION,
            path: path.to_path_buf(),
        };
        if (VCN_FIELD.value)(&self.auth).trim().is_empty() {
            return Err(missing(&VCN_FIELD));
        }
        for field in &CREDENTIAL_FIELDS {
            let empty = (field.value)(&self.auth).trim().is_empty();
            match (empty, self.use_instance_principals) {
                (true, false) => return Err(missing(field)),
                (false, true) => warn!(
                    field = field.toml_key,
                    "instance principal authentication is enabled; auth.{} will be ignored",
                    field.toml_key
                ),
                _ => {}
            }
        }
        Ok(())
    }
}

/// Discovery for the driver's configuration file.
///
/// `explicit` comes first, then `config_file`. `ortho_config` appends its
/// XDG and home-directory candidates after both, so they are consulted only
/// when neither driver path exists.
#[must_use]
pub fn discovery(config_file: &Utf8Path, explicit: Option<&str>) -> ConfigDiscovery {
    let builder = ConfigDiscovery::builder(APP_NAME)
        .config_file_name(CONFIG_FILE_NAME)
        .dotfile_name(DOTFILE_NAME)
        .clear_project_roots();
    let builder = match explicit {
        Some(path) => builder.add_explicit_path(path),
        None => builder,
    };
    builder
        .add_explicit_path(config_file.as_std_path())
        .build()
}

/// Locates and loads `config.toml` using `OrthoConfig`'s discovery order.
#[derive(Clone, Debug)]
pub struct ConfigLoader {
    discovery: ConfigDiscovery,
    fallback: Utf8PathBuf,
}

impl ConfigLoader {
    /// Builds a loader searching `OCI_FLEXD_CONFIG_PATH`, then the
    /// configuration directory.
    #[must_use]
    pub fn new(paths: &DriverPaths) -> Self {
        let explicit = env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty());
        let config_file = paths.config_file();
        Self::with_discovery(discovery(&config_file, explicit.as_deref()), config_file)
    }

    /// Builds a loader with explicit discovery settings. `fallback` is the
    /// path reported when nothing is found.
    #[must_use]
    pub const fn with_discovery(discovery: ConfigDiscovery, fallback: Utf8PathBuf) -> Self {
        Self {
            discovery,
            fallback,
        }
    }

    /// Returns the first existing configuration file, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when a candidate directory cannot be
    /// inspected.
    pub fn locate(&self) -> Result<Option<Utf8PathBuf>, ConfigError> {
        for candidate in self.discovery.utf8_candidates() {
            if path_exists(&candidate)? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Loads, defaults and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] when no file exists, or the
    /// read, parse, metadata or validation error.
    pub async fn load<M>(&self, metadata: &M) -> Result<(Utf8PathBuf, OciConfig), ConfigError>
    where
        M: MetadataSource + ?Sized,
    {
        let path = self.locate()?.ok_or_else(|| ConfigError::NotFound {
            path: self.fallback.clone(),
        })?;
        let contents = read_to_string(&path)?;
        let mut config = OciConfig::parse(&path, &contents)?;
        config.apply_defaults(metadata).await?;
        config.validate(&path)?;
        debug!(%path, "configuration loaded");
        Ok((path, config))
    }
}

fn split(path: &Utf8Path) -> Result<(&Utf8Path, &str), ConfigError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| ConfigError::Io {
        path: path.to_path_buf(),
        message: String::from("path is missing a file name"),
    })?;
    Ok((parent, file_name))
}

fn path_exists(path: &Utf8Path) -> Result<bool, ConfigError> {
    let (parent, file_name) = split(path)?;
    match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir.try_exists(file_name).map_err(|err| ConfigError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(ConfigError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        }),
    }
}

/// Reads a whole file through a capability handle on its directory.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when the directory or file cannot be read.
pub fn read_file(path: &Utf8Path) -> Result<Vec<u8>, ConfigError> {
    let (parent, file_name) = split(path)?;
    let io_error = |err: io::Error| ConfigError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    };
    Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(io_error)?
        .read(file_name)
        .map_err(io_error)
}

fn read_to_string(path: &Utf8Path) -> Result<String, ConfigError> {
    String::from_utf8(read_file(path)?).map_err(|err| ConfigError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}
