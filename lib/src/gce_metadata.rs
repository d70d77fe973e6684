//! The instance metadata server, seen from the node itself or through an
//! ssh tunnel into it.

use std::time::Duration;

use hyper::client::conn;
use hyper::header::{CONNECTION, HOST};
use hyper::{Body, Request, StatusCode};
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, Result};

pub const METADATA_HOST: &str = "metadata.google.internal";
const METADATA_BASE: &str = "/computeMetadata/v1";
const ATTRIBUTES: &str = "/computeMetadata/v1/instance/attributes/";

/// Fetches one custom attribute over an already-open byte stream to the
/// metadata server, such as an ssh `-W` tunnel. Only a 200 yields a value.
pub async fn read_attribute<T>(io: T, key: &str) -> Result<String>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = conn::handshake(io).await.map_err(|e| tunnel_err(key, e))?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!("metadata tunnel closed: {}", e);
        }
    });

    let request = Request::get(format!("{}{}", ATTRIBUTES, key))
        .header(HOST, METADATA_HOST)
        .header("Metadata-Flavor", "Google")
        .header(CONNECTION, "close")
        .body(Body::empty())
        .map_err(|e| Error::Metadata(format!("bad request for {}: {}", key, e)))?;
    let response = sender
        .send_request(request)
        .await
        .map_err(|e| tunnel_err(key, e))?;
    if response.status() != StatusCode::OK {
        return Err(Error::Metadata(format!(
            "server said {} for {}",
            response.status(),
            key
        )));
    }
    let body = hyper::body::to_bytes(response.into_body())
        .await
        .map_err(|e| tunnel_err(key, e))?;
    String::from_utf8(body.to_vec())
        .map_err(|_| Error::Metadata(format!("{} is not utf-8", key)))
}

fn tunnel_err(key: &str, e: hyper::Error) -> Error {
    Error::Metadata(format!("can't read {}: {}", key, e))
}

#[derive(Deserialize)]
struct AccessTokenBody {
    access_token: String,
}

/// Client for the metadata server on the local node.
pub struct MetadataServer {
    http: Client,
    base: String,
}

impl MetadataServer {
    pub fn new() -> Result<Self> {
        Self::with_base(&format!("http://{}", METADATA_HOST))
    }

    pub fn with_base(base: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(500))
            .build()?;
        Ok(Self {
            http,
            base: format!("{}{}", base.trim_end_matches('/'), METADATA_BASE),
        })
    }

    async fn get(&self, path: &str) -> Result<String> {
        let url = format!("{}/{}", self.base, path);
        let response = self
            .http
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| Error::Metadata(format!("can't fetch {}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(Error::Metadata(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        Ok(response.text().await?)
    }

    pub async fn on_gce(&self) -> bool {
        self.project_id().await.is_ok()
    }

    pub async fn project_id(&self) -> Result<String> {
        self.get("project/project-id").await
    }

    /// Zone name, without the `projects/N/zones/` prefix.
    pub async fn zone(&self) -> Result<String> {
        let full = self.get("instance/zone").await?;
        Ok(full.rsplit('/').next().unwrap_or_default().to_string())
    }

    pub async fn instance_name(&self) -> Result<String> {
        self.get("instance/name").await
    }

    pub async fn attribute(&self, key: &str) -> Result<String> {
        self.get(&format!("instance/attributes/{}", key)).await
    }

    pub async fn access_token(&self) -> Result<String> {
        let body = self
            .get("instance/service-accounts/default/token")
            .await?;
        let token: AccessTokenBody = serde_json::from_str(&body)?;
        Ok(token.access_token)
    }
}
