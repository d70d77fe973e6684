//! Compute Engine v1 resources and the REST client that manages them.
//!
//! Only the handful of calls a node's lifecycle needs are here: insert, get
//! (with ETag change detection), delete, and listing of instances and images.

use async_trait::async_trait;
use log::debug;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{Error, Result};

const API_BASE: &str = "https://compute.googleapis.com/compute/v1";

pub const SCOPE_COMPUTE: &str = "https://www.googleapis.com/auth/compute";
pub const SCOPE_DEVSTORAGE_FULL: &str = "https://www.googleapis.com/auth/devstorage.full_control";
pub const SCOPE_CLOUD_PLATFORM: &str = "https://www.googleapis.com/auth/cloud-platform";

pub const STATUS_RUNNING: &str = "RUNNING";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub machine_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<AttachedDisk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_interfaces: Vec<NetworkInterface>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_accounts: Vec<ServiceAccount>,
}

impl Instance {
    pub fn is_running(&self) -> bool {
        self.status.as_deref() == Some(STATUS_RUNNING)
    }

    /// First NAT address on any interface.
    pub fn external_ip(&self) -> Option<&str> {
        self.network_interfaces
            .iter()
            .flat_map(|ni| ni.access_configs.iter())
            .filter_map(|ac| ac.nat_ip.as_deref())
            .find(|ip| !ip.is_empty())
    }

    pub fn metadata_keys(&self) -> Vec<&str> {
        self.metadata
            .iter()
            .flat_map(|m| m.items.iter())
            .map(|item| item.key.as_str())
            .collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDisk {
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub boot: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub disk_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialize_params: Option<DiskInitializeParams>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiskInitializeParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_name: Option<String>,
    /// Serialized as a string, which is how the API represents int64.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "int64_string"
    )]
    pub disk_size_gb: Option<u64>,
    pub source_image: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    #[serde(default)]
    pub items: Vec<MetadataItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MetadataItem {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "networkIP")]
    pub network_ip: Option<String>,
    #[serde(default)]
    pub access_configs: Vec<AccessConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfig {
    #[serde(rename = "type", default)]
    pub config_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "natIP")]
    pub nat_ip: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ServiceAccount {
    pub email: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Image {
    pub name: String,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<serde_json::Value>,
    #[serde(default, rename = "selfLink")]
    pub self_link: Option<String>,
}

impl Image {
    pub fn is_deprecated(&self) -> bool {
        self.deprecated.is_some()
    }
}

/// A long-running operation handle, as returned by insert and delete.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    /// The response's ETag header.
    #[serde(skip)]
    pub etag: Option<String>,
}

/// Result of a conditional get.
#[derive(Debug, Clone)]
pub enum Fetched {
    Changed { instance: Instance, etag: Option<String> },
    NotModified,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
}

/// The cloud calls a node's lifecycle depends on.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn insert_instance(&self, project: &str, zone: &str, instance: &Instance)
        -> Result<Operation>;

    async fn get_instance(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        etag: Option<&str>,
    ) -> Result<Fetched>;

    /// A missing instance is `Error::NotFound`.
    async fn delete_instance(&self, project: &str, zone: &str, name: &str) -> Result<()>;

    async fn list_instances(&self, project: &str, zone: &str) -> Result<Vec<Instance>>;

    /// Every image in an image project, deprecated ones included.
    async fn list_images(&self, project: &str) -> Result<Vec<Image>>;
}

pub struct GceClient {
    http: Client,
    token: String,
    base: String,
}

impl GceClient {
    pub fn new(token: String) -> Result<Self> {
        Self::with_base(token, API_BASE)
    }

    pub fn with_base(token: String, base: &str) -> Result<Self> {
        let http = Client::builder().gzip(true).build()?;
        Ok(Self {
            http,
            token,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    fn instances_url(&self, project: &str, zone: &str) -> String {
        format!("{}/projects/{}/zones/{}/instances", self.base, project, zone)
    }

    fn instance_url(&self, project: &str, zone: &str, name: &str) -> String {
        format!("{}/{}", self.instances_url(project, zone), name)
    }

    fn images_url(&self, project: &str) -> String {
        format!("{}/projects/{}/global/images", self.base, project)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.token)
    }

    async fn list_all<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>> {
        let mut all = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self.authed(self.http.get(url));
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: Page<T> = check(request.send().await?).await?.json().await?;
            all.extend(page.items);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => return Ok(all),
            }
        }
    }
}

fn etag_of(response: &Response) -> Option<String> {
    response
        .headers()
        .get(header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.error.message)
        .unwrap_or(body);
    if status == StatusCode::NOT_FOUND {
        return Err(Error::NotFound(url));
    }
    Err(Error::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ComputeApi for GceClient {
    async fn insert_instance(
        &self,
        project: &str,
        zone: &str,
        instance: &Instance,
    ) -> Result<Operation> {
        let url = self.instances_url(project, zone);
        debug!("POST {}", url);
        let response = check(self.authed(self.http.post(&url)).json(instance).send().await?).await?;
        let etag = etag_of(&response);
        let mut op: Operation = response.json().await?;
        op.etag = etag;
        Ok(op)
    }

    async fn get_instance(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        etag: Option<&str>,
    ) -> Result<Fetched> {
        let mut request = self.authed(self.http.get(self.instance_url(project, zone, name)));
        if let Some(etag) = etag {
            request = request.header(header::IF_NONE_MATCH, etag);
        }
        let response = request.send().await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(Fetched::NotModified);
        }
        let response = check(response).await?;
        let etag = etag_of(&response);
        let instance = response.json().await?;
        Ok(Fetched::Changed { instance, etag })
    }

    async fn delete_instance(&self, project: &str, zone: &str, name: &str) -> Result<()> {
        let url = self.instance_url(project, zone, name);
        debug!("DELETE {}", url);
        check(self.authed(self.http.delete(&url)).send().await?).await?;
        Ok(())
    }

    async fn list_instances(&self, project: &str, zone: &str) -> Result<Vec<Instance>> {
        self.list_all(&self.instances_url(project, zone)).await
    }

    async fn list_images(&self, project: &str) -> Result<Vec<Image>> {
        self.list_all(&self.images_url(project)).await
    }
}

mod int64_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u64>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => s.serialize_str(&v.to_string()),
            None => s.serialize_none(),
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        match Option::<Raw>::deserialize(d)? {
            None => Ok(None),
            Some(Raw::Num(n)) => Ok(Some(n)),
            Some(Raw::Str(s)) => s.parse().map(Some).map_err(de::Error::custom),
        }
    }
}
