use crate::backend::error::{FetchError, PinError};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub enum PinContent {
    Json(Value),
    File { name: String, bytes: Vec<u8> },
}

/// Pin/read access to content-addressed storage.
///
/// Pinning is not deduplicated here: two pins of the same content are two
/// billed requests and may come back as two different ids.
#[async_trait]
pub trait Pinner: Send + Sync {
    async fn pin(&self, content: PinContent) -> Result<String, PinError>;
    async fn fetch(&self, cid: &str) -> Result<Value, FetchError>;

    fn gateway_url(&self, cid: &str) -> String;
}

#[derive(Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: Option<String>,
}

#[derive(Clone)]
pub struct PinataClient {
    http: reqwest::Client,
    api_url: String,
    gateway_url: String,
    api_key: String,
}

impl PinataClient {
    pub fn new(http: reqwest::Client, api_url: &str, gateway_url: &str, api_key: &str) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl Pinner for PinataClient {
    async fn pin(&self, content: PinContent) -> Result<String, PinError> {
        let request = match content {
            PinContent::Json(data) => self
                .http
                .post(format!("{}/pinning/pinJSONToIPFS", self.api_url))
                .json(&data),
            PinContent::File { name, bytes } => {
                let size = bytes.len();
                let part = Part::bytes(bytes).file_name(name.clone());
                tracing::debug!(file = %name, size, "pinning file");
                self.http
                    .post(format!("{}/pinning/pinFileToIPFS", self.api_url))
                    .multipart(Form::new().part("file", part))
            }
        };

        let resp = request.bearer_auth(&self.api_key).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PinError::Status { status: status.as_u16(), body });
        }

        let parsed: PinResponse = resp.json().await?;
        match parsed.ipfs_hash {
            Some(cid) if !cid.is_empty() => Ok(cid),
            _ => Err(PinError::MissingHash),
        }
    }

    async fn fetch(&self, cid: &str) -> Result<Value, FetchError> {
        let resp = self.http.get(self.gateway_url(cid)).send().await?;
        match resp.status() {
            s if s.is_success() => Ok(resp.json().await?),
            StatusCode::NOT_FOUND => Err(FetchError::NotFound(cid.to_string())),
            s => Err(FetchError::Status { cid: cid.to_string(), status: s.as_u16() }),
        }
    }

    fn gateway_url(&self, cid: &str) -> String {
        format!("{}/ipfs/{}", self.gateway_url, cid)
    }
}
