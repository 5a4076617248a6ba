//! `reqwest` transport for the OCI REST APIs.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Certificate, Client, Method, Proxy, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use super::{
    CloudClient, CloudError, CloudFuture, CreateExport, Export, FileSystem, Instance, MountTarget,
    Page, PrivateIp, Subnet, Vcn, Vnic, VnicAttachment, VolumeAttachment,
};

/// Upper bound on a single request/response exchange.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const CORE_API_VERSION: &str = "20160918";
const FILE_STORAGE_API_VERSION: &str = "20171215";
const NEXT_PAGE_HEADER: &str = "opc-next-page";

/// Authenticates outgoing requests.
///
/// Key-based and instance-principal signing are provided by the deployment.
/// [`UnsignedRequests`] is used when an authenticating proxy fronts the API.
pub trait RequestSigner: Send + Sync {
    /// Applies authentication to `request`.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Transport`] when the request cannot be signed.
    fn sign(&self, request: RequestBuilder) -> Result<RequestBuilder, CloudError>;
}

/// Signer that forwards requests untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnsignedRequests;

impl RequestSigner for UnsignedRequests {
    fn sign(&self, request: RequestBuilder) -> Result<RequestBuilder, CloudError> {
        Ok(request)
    }
}

/// Connection settings for [`HttpCloudClient`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HttpSettings {
    /// Region name, for example `us-phoenix-1`.
    pub region: String,
    /// Base URL replacing the regional endpoints, if set.
    pub endpoint: Option<String>,
    /// Proxy URL applied to every request.
    pub proxy: Option<String>,
    /// Extra PEM-encoded CA certificate to trust.
    pub trusted_ca_pem: Option<Vec<u8>>,
}

impl HttpSettings {
    /// Base URL of the core services (compute and networking) API.
    #[must_use]
    pub fn core_base(&self) -> String {
        self.endpoint.as_ref().map_or_else(
            || format!("https://iaas.{}.oraclecloud.com/{CORE_API_VERSION}", self.region),
            |endpoint| format!("{}/{CORE_API_VERSION}", endpoint.trim_end_matches('/')),
        )
    }

    /// Base URL of the file storage API.
    #[must_use]
    pub fn file_storage_base(&self) -> String {
        self.endpoint.as_ref().map_or_else(
            || {
                format!(
                    "https://filestorage.{}.oraclecloud.com/{FILE_STORAGE_API_VERSION}",
                    self.region
                )
            },
            |endpoint| format!("{}/{FILE_STORAGE_API_VERSION}", endpoint.trim_end_matches('/')),
        )
    }
}

/// [`CloudClient`] backed by the OCI REST APIs.
#[derive(Clone)]
pub struct HttpCloudClient {
    http: Client,
    core_base: String,
    file_storage_base: String,
    signer: Arc<dyn RequestSigner>,
}

impl std::fmt::Debug for HttpCloudClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCloudClient")
            .field("core_base", &self.core_base)
            .field("file_storage_base", &self.file_storage_base)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl HttpCloudClient {
    /// Builds a client for the given settings.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Transport`] when the proxy URL or the CA
    /// certificate is invalid, or the HTTP client cannot be built.
    pub fn new(
        settings: &HttpSettings,
        signer: Arc<dyn RequestSigner>,
    ) -> Result<Self, CloudError> {
        let transport = |message: String| CloudError::Transport {
            operation: String::from("client setup"),
            message,
        };

        let mut builder = Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(proxy) = &settings.proxy {
            builder = builder.proxy(Proxy::all(proxy).map_err(|err| transport(err.to_string()))?);
        }
        if let Some(pem) = &settings.trusted_ca_pem {
            let certificate =
                Certificate::from_pem(pem).map_err(|err| transport(err.to_string()))?;
            builder = builder.add_root_certificate(certificate);
        }
        let http = builder.build().map_err(|err| transport(err.to_string()))?;

        Ok(Self {
            http,
            core_base: settings.core_base(),
            file_storage_base: settings.file_storage_base(),
            signer,
        })
    }

    async fn execute(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, CloudError> {
        let response = self
            .signer
            .sign(request)?
            .send()
            .await
            .map_err(|err| CloudError::Transport {
                operation: operation.to_owned(),
                message: err.to_string(),
            })?;

        let status = response.status();
        debug!(operation, status = status.as_u16(), "control plane responded");
        if status.is_success() {
            return Ok(response);
        }

        let body = response.json::<ApiErrorBody>().await.unwrap_or_default();
        Err(CloudError::Api {
            operation: operation.to_owned(),
            status: status.as_u16(),
            code: body.code,
            message: body.message,
        })
    }

    async fn decode<T: DeserializeOwned>(
        operation: &'static str,
        response: Response,
    ) -> Result<T, CloudError> {
        response.json::<T>().await.map_err(|err| CloudError::Decode {
            operation: operation.to_owned(),
            message: err.to_string(),
        })
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        url: String,
    ) -> Result<T, CloudError> {
        let response = self
            .execute(operation, self.http.request(Method::GET, url))
            .await?;
        Self::decode(operation, response).await
    }

    async fn list<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        url: String,
        query: &[(&str, &str)],
        page: Option<&str>,
    ) -> Result<Page<T>, CloudError> {
        let mut request = self.http.get(url).query(query);
        if let Some(token) = page {
            request = request.query(&[("page", token)]);
        }
        let response = self.execute(operation, request).await?;
        let next_page = response
            .headers()
            .get(NEXT_PAGE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let items = Self::decode(operation, response).await?;
        Ok(Page { items, next_page })
    }

    async fn delete(&self, operation: &'static str, url: String) -> Result<(), CloudError> {
        self.execute(operation, self.http.delete(url)).await?;
        Ok(())
    }
}

impl CloudClient for HttpCloudClient {
    fn attach_volume<'a>(
        &'a self,
        instance_id: &'a str,
        volume_id: &'a str,
    ) -> CloudFuture<'a, VolumeAttachment> {
        Box::pin(async move {
            let body = json!({
                "type": "iscsi",
                "instanceId": instance_id,
                "volumeId": volume_id,
            });
            let request = self
                .http
                .post(format!("{}/volumeAttachments/", self.core_base))
                .json(&body);
            let response = self.execute("AttachVolume", request).await?;
            Self::decode::<VolumeAttachment>("AttachVolume", response).await
        })
    }

    fn get_volume_attachment<'a>(
        &'a self,
        attachment_id: &'a str,
    ) -> CloudFuture<'a, VolumeAttachment> {
        Box::pin(self.fetch::<VolumeAttachment>(
            "GetVolumeAttachment",
            format!("{}/volumeAttachments/{attachment_id}", self.core_base),
        ))
    }

    fn list_volume_attachments<'a>(
        &'a self,
        compartment_id: &'a str,
        volume_id: &'a str,
        page: Option<&'a str>,
    ) -> CloudFuture<'a, Page<VolumeAttachment>> {
        Box::pin(async move {
            self.list::<VolumeAttachment>(
                "ListVolumeAttachments",
                format!("{}/volumeAttachments/", self.core_base),
                &[("compartmentId", compartment_id), ("volumeId", volume_id)],
                page,
            )
            .await
        })
    }

    fn detach_volume<'a>(&'a self, attachment_id: &'a str) -> CloudFuture<'a, ()> {
        Box::pin(self.delete(
            "DetachVolume",
            format!("{}/volumeAttachments/{attachment_id}", self.core_base),
        ))
    }

    fn get_instance<'a>(&'a self, instance_id: &'a str) -> CloudFuture<'a, Instance> {
        Box::pin(self.fetch::<Instance>(
            "GetInstance",
            format!("{}/instances/{instance_id}", self.core_base),
        ))
    }

    fn list_instances<'a>(
        &'a self,
        compartment_id: &'a str,
        display_name: Option<&'a str>,
        page: Option<&'a str>,
    ) -> CloudFuture<'a, Page<Instance>> {
        Box::pin(async move {
            let mut query = vec![("compartmentId", compartment_id)];
            if let Some(name) = display_name {
                query.push(("displayName", name));
            }
            self.list::<Instance>(
                "ListInstances",
                format!("{}/instances/", self.core_base),
                &query,
                page,
            )
            .await
        })
    }

    fn get_vcn<'a>(&'a self, vcn_id: &'a str) -> CloudFuture<'a, Vcn> {
        Box::pin(self.fetch::<Vcn>("GetVcn", format!("{}/vcns/{vcn_id}", self.core_base)))
    }

    fn list_subnets<'a>(
        &'a self,
        compartment_id: &'a str,
        vcn_id: &'a str,
        page: Option<&'a str>,
    ) -> CloudFuture<'a, Page<Subnet>> {
        Box::pin(async move {
            self.list::<Subnet>(
                "ListSubnets",
                format!("{}/subnets", self.core_base),
                &[("compartmentId", compartment_id), ("vcnId", vcn_id)],
                page,
            )
            .await
        })
    }

    fn list_vnic_attachments<'a>(
        &'a self,
        compartment_id: &'a str,
        page: Option<&'a str>,
    ) -> CloudFuture<'a, Page<VnicAttachment>> {
        Box::pin(async move {
            self.list::<VnicAttachment>(
                "ListVnicAttachments",
                format!("{}/vnicAttachments/", self.core_base),
                &[("compartmentId", compartment_id)],
                page,
            )
            .await
        })
    }

    fn get_vnic<'a>(&'a self, vnic_id: &'a str) -> CloudFuture<'a, Vnic> {
        Box::pin(self.fetch::<Vnic>("GetVnic", format!("{}/vnics/{vnic_id}", self.core_base)))
    }

    fn get_file_system<'a>(&'a self, file_system_id: &'a str) -> CloudFuture<'a, FileSystem> {
        Box::pin(self.fetch::<FileSystem>(
            "GetFileSystem",
            format!("{}/fileSystems/{file_system_id}", self.file_storage_base),
        ))
    }

    fn list_mount_targets<'a>(
        &'a self,
        compartment_id: &'a str,
        availability_domain: &'a str,
        page: Option<&'a str>,
    ) -> CloudFuture<'a, Page<MountTarget>> {
        Box::pin(async move {
            self.list::<MountTarget>(
                "ListMountTargets",
                format!("{}/mountTargets", self.file_storage_base),
                &[
                    ("compartmentId", compartment_id),
                    ("availabilityDomain", availability_domain),
                ],
                page,
            )
            .await
        })
    }

    fn get_private_ip<'a>(&'a self, private_ip_id: &'a str) -> CloudFuture<'a, PrivateIp> {
        Box::pin(self.fetch::<PrivateIp>(
            "GetPrivateIp",
            format!("{}/privateIps/{private_ip_id}", self.core_base),
        ))
    }

    fn list_exports<'a>(
        &'a self,
        export_set_id: &'a str,
        file_system_id: &'a str,
        page: Option<&'a str>,
    ) -> CloudFuture<'a, Page<Export>> {
        Box::pin(async move {
            self.list::<Export>(
                "ListExports",
                format!("{}/exports", self.file_storage_base),
                &[
                    ("exportSetId", export_set_id),
                    ("fileSystemId", file_system_id),
                ],
                page,
            )
            .await
        })
    }

    fn create_export<'a>(&'a self, request: &'a CreateExport) -> CloudFuture<'a, Export> {
        Box::pin(async move {
            let builder = self
                .http
                .post(format!("{}/exports", self.file_storage_base))
                .json(request);
            let response = self.execute("CreateExport", builder).await?;
            Self::decode::<Export>("CreateExport", response).await
        })
    }

    fn get_export<'a>(&'a self, export_id: &'a str) -> CloudFuture<'a, Export> {
        Box::pin(self.fetch::<Export>(
            "GetExport",
            format!("{}/exports/{export_id}", self.file_storage_base),
        ))
    }

    fn delete_export<'a>(&'a self, export_id: &'a str) -> CloudFuture<'a, ()> {
        Box::pin(self.delete(
            "DeleteExport",
            format!("{}/exports/{export_id}", self.file_storage_base),
        ))
    }
}
