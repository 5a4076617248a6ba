//! Connector handing out sessions on a [`FakeCloud`].

use camino::Utf8PathBuf;

use super::FakeCloud;
use crate::config::{AuthConfig, ConfigError, OciConfig};
use crate::driver::{CloudSession, Connector, SessionFuture};

/// Compartment used by [`sample_config`].
pub const TEST_COMPARTMENT: &str = "ocid1.compartment.oc1..test";
/// VCN used by [`sample_config`].
pub const TEST_VCN: &str = "ocid1.vcn.oc1.phx.test";
/// Region key used by [`sample_config`].
pub const TEST_REGION_KEY: &str = "phx";

/// A validated configuration for the Phoenix region.
#[must_use]
pub fn sample_config() -> OciConfig {
    OciConfig {
        auth: AuthConfig {
            region: String::from("us-phoenix-1"),
            region_key: String::from(TEST_REGION_KEY),
            compartment: String::from(TEST_COMPARTMENT),
            vcn: String::from(TEST_VCN),
            ..AuthConfig::default()
        },
        use_instance_principals: true,
        endpoint: None,
    }
}

/// [`Connector`] sharing one [`FakeCloud`] between sessions.
///
/// Without a configuration every connect fails with
/// [`ConfigError::NotFound`], as on a worker node.
#[derive(Clone, Debug)]
pub struct FakeConnector {
    cloud: FakeCloud,
    config: Option<OciConfig>,
    cache_path: Utf8PathBuf,
}

impl FakeConnector {
    /// Connector for a configured master node.
    #[must_use]
    pub const fn new(cloud: FakeCloud, config: OciConfig, cache_path: Utf8PathBuf) -> Self {
        Self {
            cloud,
            config: Some(config),
            cache_path,
        }
    }

    /// Connector for a node without configuration.
    #[must_use]
    pub const fn unconfigured(cloud: FakeCloud, cache_path: Utf8PathBuf) -> Self {
        Self {
            cloud,
            config: None,
            cache_path,
        }
    }
}

impl Connector for FakeConnector {
    type Client = FakeCloud;

    fn connect(&self) -> SessionFuture<'_, Self::Client> {
        Box::pin(async move {
            let config = self.config.clone().ok_or_else(|| ConfigError::NotFound {
                path: self.cache_path.with_file_name("config.toml"),
            })?;
            Ok(CloudSession {
                client: self.cloud.clone(),
                config,
                cache_path: self.cache_path.clone(),
            })
        })
    }
}
