//! Volume drivers and the table that picks one per call-out.
//!
//! The executable is installed under several names (`oci`, `oci-bvs`,
//! `oci-fss`, each possibly prefixed with `oracle~`, or its own name). [`DriverTable`] maps
//! the invoked name to a [`Route`]; the generic route picks a driver from
//! the volume identifier the call-out carries.

mod block;
mod filestorage;

use std::env;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{error, info};

use crate::attachment::{AttachmentError, PollPolicy};
use crate::bridge::{BridgeError, DeviceWait, Host, Mounter};
use crate::cloud::{
    CloudClient, CloudError, HttpCloudClient, HttpSettings, RequestSigner, UnsignedRequests,
};
use crate::config::{ConfigError, ConfigLoader, DriverPaths, OciConfig, read_file};
use crate::filestorage::ExportError;
use crate::flexvolume::{CallOut, CallOutError, Capabilities, Driver, DriverStatus};
use crate::metadata::MetadataSource;
use crate::resolver::{ResolveError, ResolverScope};
use crate::volume_id::VolumeKind;

pub use block::BlockVolumeDriver;
pub use filestorage::FileStorageDriver;

/// Environment variable naming a proxy for control-plane requests.
pub const PROXY_ENV: &str = "OCI_PROXY";
/// Environment variable naming an extra CA certificate to trust.
pub const TRUSTED_CA_ENV: &str = "TRUSTED_CA_CERT_PATH";
const EXECUTABLE_PREFIX: &str = "oracle~";

/// Capabilities every driver reports from `init`.
pub const CAPABILITIES: Capabilities = Capabilities {
    attach: true,
    can_get_volume_name: false,
};

/// Errors surfaced by drivers, rendered into a `Failure` status.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Wrapper for configuration failures.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Wrapper for control-plane failures outside the state machines.
    #[error(transparent)]
    Cloud(#[from] CloudError),
    /// Wrapper for node name resolution failures.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// Wrapper for volume attachment failures.
    #[error(transparent)]
    Attachment(#[from] AttachmentError),
    /// Wrapper for export failures.
    #[error(transparent)]
    Export(#[from] ExportError),
    /// Wrapper for node-side failures.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    /// Wrapper for malformed call-outs.
    #[error(transparent)]
    CallOut(#[from] CallOutError),
    /// Raised when the options carry no volume name.
    #[error("options do not name a volume (kubernetes.io/pvOrVolumeName)")]
    MissingVolumeName,
    /// Raised when the executable name matches no driver.
    #[error("No driver found for {name}")]
    UnknownDriver {
        /// Executable name after prefix stripping.
        name: String,
    },
    /// Raised when no driver claims the volume identifier.
    #[error("no driver claims volume {volume}")]
    Unclaimed {
        /// Identifier that was offered.
        volume: String,
    },
}

/// Renders a driver result, logging failures.
pub(crate) fn into_status(result: Result<DriverStatus, DriverError>) -> DriverStatus {
    result.unwrap_or_else(|err| {
        error!(error = %err, "call-out failed");
        DriverStatus::failure(err)
    })
}

/// Status for `init`: success when configuration loads or is absent.
pub(crate) fn init_status<C>(session: Result<CloudSession<C>, DriverError>) -> DriverStatus {
    match session {
        Ok(_) => DriverStatus::success().with_capabilities(CAPABILITIES),
        Err(DriverError::Config(ConfigError::NotFound { path })) => {
            info!(%path, "config file does not exist; assuming worker node");
            DriverStatus::success().with_capabilities(CAPABILITIES)
        }
        Err(err) => into_status(Err(err)),
    }
}

/// Storage family served by a driver.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DriverKind {
    /// Block volumes over iSCSI.
    Block,
    /// File-storage file systems over NFS.
    FileStorage,
}

impl From<VolumeKind> for DriverKind {
    fn from(kind: VolumeKind) -> Self {
        match kind {
            VolumeKind::Block => Self::Block,
            VolumeKind::FileSystem => Self::FileStorage,
        }
    }
}

/// How an executable name selects a driver.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Route {
    /// Pick the driver claiming the call-out's volume identifier.
    Claim,
    /// Always use the given driver.
    Fixed(DriverKind),
}

impl Route {
    /// Chooses the driver for `call_out`.
    ///
    /// `unmountdevice` carries no volume identifier, so the generic route
    /// looks at what `host` has mounted at the directory: an NFS mount goes
    /// to the file-storage driver. Other call-outs without an identifier go
    /// to the block driver.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Unclaimed`] when the identifier belongs to no
    /// known storage family, or [`DriverError::Bridge`] when the mount table
    /// cannot be read.
    pub fn select<M>(self, call_out: &CallOut, host: &M) -> Result<DriverKind, DriverError>
    where
        M: Mounter + ?Sized,
    {
        match (self, call_out) {
            (Self::Fixed(kind), _) => Ok(kind),
            (Self::Claim, CallOut::UnmountDevice { mount_dir }) => {
                let nfs = host.mount_at(mount_dir)?.is_some_and(|entry| entry.is_nfs());
                Ok(if nfs {
                    DriverKind::FileStorage
                } else {
                    DriverKind::Block
                })
            }
            (Self::Claim, _) => call_out.volume_name().map_or(Ok(DriverKind::Block), |volume| {
                VolumeKind::claim(volume)
                    .map(DriverKind::from)
                    .ok_or_else(|| DriverError::Unclaimed {
                        volume: volume.to_owned(),
                    })
            }),
        }
    }
}

/// Immutable mapping from executable names to routes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DriverTable {
    entries: &'static [(&'static str, Route)],
}

impl DriverTable {
    /// The names the driver is installed under.
    pub const STANDARD: Self = Self::new(&[
        ("oci", Route::Claim),
        ("oci-flexvolume", Route::Claim),
        ("oci-bvs", Route::Fixed(DriverKind::Block)),
        ("oci-fss", Route::Fixed(DriverKind::FileStorage)),
    ]);

    /// Builds a table from fixed entries.
    #[must_use]
    pub const fn new(entries: &'static [(&'static str, Route)]) -> Self {
        Self { entries }
    }

    /// Resolves the route for the executable at `program`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::UnknownDriver`] when no entry matches.
    pub fn lookup(&self, program: &str) -> Result<Route, DriverError> {
        let base = Utf8Path::new(program).file_name().unwrap_or(program);
        let name = base.strip_prefix(EXECUTABLE_PREFIX).unwrap_or(base);
        self.entries
            .iter()
            .find(|(entry, _)| *entry == name)
            .map(|(_, route)| *route)
            .ok_or_else(|| DriverError::UnknownDriver {
                name: name.to_owned(),
            })
    }
}

/// A loaded configuration with a client for it.
#[derive(Debug)]
pub struct CloudSession<C> {
    /// Control-plane client.
    pub client: C,
    /// Validated configuration.
    pub config: OciConfig,
    /// Shared VNIC cache file.
    pub cache_path: Utf8PathBuf,
}

impl<C> CloudSession<C> {
    /// Compartment holding the cluster's resources.
    #[must_use]
    pub fn compartment_id(&self) -> &str {
        &self.config.auth.compartment
    }

    /// Short region key used to derive volume identifiers.
    #[must_use]
    pub fn region_key(&self) -> &str {
        &self.config.auth.region_key
    }

    /// Search scope for node name resolution.
    #[must_use]
    pub fn resolver_scope(&self) -> ResolverScope {
        ResolverScope {
            compartment_id: self.config.auth.compartment.clone(),
            vcn_id: self.config.auth.vcn.clone(),
            cache_path: self.cache_path.clone(),
        }
    }
}

/// Future returned by [`Connector::connect`].
pub type SessionFuture<'a, C> =
    Pin<Box<dyn Future<Output = Result<CloudSession<C>, DriverError>> + Send + 'a>>;

/// Opens control-plane sessions on demand.
///
/// Mount call-outs run on worker nodes without configuration, so drivers
/// only connect when a call-out needs the control plane.
pub trait Connector: Send + Sync {
    /// Client type produced by this connector.
    type Client: CloudClient;

    /// Loads configuration and builds a client.
    fn connect(&self) -> SessionFuture<'_, Self::Client>;
}

/// [`Connector`] reading `config.toml` and talking HTTP to the OCI APIs.
#[derive(Clone)]
pub struct HttpConnector {
    paths: DriverPaths,
    loader: ConfigLoader,
    metadata: Arc<dyn MetadataSource>,
    signer: Arc<dyn RequestSigner>,
}

impl std::fmt::Debug for HttpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnector")
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

impl HttpConnector {
    /// Creates a connector for `paths` sending unsigned requests.
    #[must_use]
    pub fn new(paths: DriverPaths, metadata: Arc<dyn MetadataSource>) -> Self {
        Self {
            loader: ConfigLoader::new(&paths),
            paths,
            metadata,
            signer: Arc::new(UnsignedRequests),
        }
    }

    /// Replaces the request signer.
    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = signer;
        self
    }

    fn settings(config: &OciConfig) -> Result<HttpSettings, DriverError> {
        let non_empty = |key: &str| env::var(key).ok().filter(|value| !value.trim().is_empty());
        let trusted_ca_pem = non_empty(TRUSTED_CA_ENV)
            .map(|path| read_file(Utf8Path::new(&path)))
            .transpose()?;
        Ok(HttpSettings {
            region: config.auth.region.clone(),
            endpoint: config.endpoint.clone(),
            proxy: non_empty(PROXY_ENV),
            trusted_ca_pem,
        })
    }
}

impl Connector for HttpConnector {
    type Client = HttpCloudClient;

    fn connect(&self) -> SessionFuture<'_, Self::Client> {
        Box::pin(async move {
            let (path, config) = self.loader.load(self.metadata.as_ref()).await?;
            let settings = Self::settings(&config)?;
            let client = HttpCloudClient::new(&settings, Arc::clone(&self.signer))?;
            info!(%path, region = %config.auth.region, "control plane session ready");
            Ok(CloudSession {
                client,
                config,
                cache_path: self.paths.cache_file(),
            })
        })
    }
}

/// One instance of every driver, sharing a connector and a host.
#[derive(Debug)]
pub struct DriverSet<K, H> {
    host: H,
    block: BlockVolumeDriver<K, H>,
    file_storage: FileStorageDriver<K, H>,
}

impl<K, H> DriverSet<K, H>
where
    K: Connector + Clone,
    H: Host + Clone,
{
    /// Builds both drivers.
    #[must_use]
    pub fn new(connector: K, host: H) -> Self {
        Self {
            block: BlockVolumeDriver::new(connector.clone(), host.clone()),
            file_storage: FileStorageDriver::new(connector, host.clone()),
            host,
        }
    }

    /// Overrides polling for both drivers.
    #[must_use]
    pub fn with_timing(self, policy: PollPolicy, device_wait: DeviceWait) -> Self {
        Self {
            host: self.host,
            block: self.block.with_timing(policy, device_wait),
            file_storage: self.file_storage.with_policy(policy),
        }
    }

    /// The driver for `kind`.
    #[must_use]
    pub fn driver(&self, kind: DriverKind) -> &dyn Driver {
        match kind {
            DriverKind::Block => &self.block,
            DriverKind::FileStorage => &self.file_storage,
        }
    }

    /// Runs the call-out in `args` (program name first) through the driver
    /// `table` selects.
    pub async fn execute(&self, table: &DriverTable, args: &[String]) -> DriverStatus {
        let program = args.first().map_or("", String::as_str);
        let selected = table.lookup(program).and_then(|route| {
            let call_out = CallOut::parse(args)?;
            let kind = route.select(&call_out, &self.host)?;
            Ok((kind, call_out))
        });
        match selected {
            Ok((kind, call_out)) => {
                info!(?kind, verb = call_out.verb(), "selected driver");
                call_out.dispatch(self.driver(kind)).await
            }
            Err(err) => into_status(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests;
