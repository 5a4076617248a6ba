//! Instance metadata service client.
//!
//! Only the fields used to default configuration values are decoded.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

/// Metadata endpoint reachable from every compute instance.
pub const METADATA_URL: &str = "http://169.254.169.254/opc/v1/instance/";
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised while querying instance metadata.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MetadataError {
    /// Raised when the metadata service cannot be reached.
    #[error("failed to get instance metadata: {0}")]
    Request(String),
    /// Raised when the response is not the expected JSON document.
    #[error("failed to unmarshal instance metadata: {0}")]
    Decode(String),
}

/// The subset of instance metadata the driver consumes.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceMetadata {
    /// Compartment the instance lives in.
    #[serde(default)]
    pub compartment_id: String,
    /// Short region key, for example `phx`.
    #[serde(default, rename = "region")]
    pub region_key: String,
    /// Full region name, for example `us-phoenix-1`.
    #[serde(default, rename = "canonicalRegionName")]
    pub region: String,
}

/// Future returned by [`MetadataSource::fetch`].
pub type MetadataFuture<'a> =
    Pin<Box<dyn Future<Output = Result<InstanceMetadata, MetadataError>> + Send + 'a>>;

/// Source of instance metadata.
pub trait MetadataSource: Send + Sync {
    /// Fetches metadata for the current instance.
    fn fetch(&self) -> MetadataFuture<'_>;
}

/// [`MetadataSource`] backed by the link-local metadata endpoint.
#[derive(Clone, Debug)]
pub struct HttpMetadata {
    http: Client,
    url: String,
}

impl HttpMetadata {
    /// Creates a client for the standard metadata endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Request`] when the HTTP client cannot be
    /// built.
    pub fn new() -> Result<Self, MetadataError> {
        Self::with_url(METADATA_URL)
    }

    /// Creates a client for a custom endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Request`] when the HTTP client cannot be
    /// built.
    pub fn with_url(url: impl Into<String>) -> Result<Self, MetadataError> {
        let http = Client::builder()
            .timeout(METADATA_TIMEOUT)
            .build()
            .map_err(|err| MetadataError::Request(err.to_string()))?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

impl MetadataSource for HttpMetadata {
    fn fetch(&self) -> MetadataFuture<'_> {
        Box::pin(async move {
            let response = self
                .http
                .get(&self.url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|err| MetadataError::Request(err.to_string()))?;
            response
                .json::<InstanceMetadata>()
                .await
                .map_err(|err| MetadataError::Decode(err.to_string()))
        })
    }
}

/// Fixed metadata, for tests and hosts without a metadata service.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StaticMetadata(pub InstanceMetadata);

impl MetadataSource for StaticMetadata {
    fn fetch(&self) -> MetadataFuture<'_> {
        Box::pin(std::future::ready(Ok(self.0.clone())))
    }
}
