use crate::backend::config::is_hex_address;
use crate::backend::error::SignerError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Signing capability held on behalf of one user. The service never sees
/// key material; it asks the signer for the account address and hands it
/// calldata to sign and submit.
#[async_trait]
pub trait Signer: Send + Sync {
    /// On-chain identity of the account this signer controls.
    async fn address(&self) -> Result<String, SignerError>;

    /// Sign and submit a contract call, returning the transaction hash once
    /// the signer has one. Does not wait for the transaction to be mined.
    async fn send_call(&self, to: &str, calldata: &[u8]) -> Result<String, SignerError>;
}

/// Hands out a signer for an opaque key handle supplied by the device.
pub trait SignerProvider: Send + Sync {
    fn signer_for(&self, key_handle: &str) -> Arc<dyn Signer>;
}

/// Client for a custodial signing service.
///
/// `GET  {base}/keys/{handle}/address` -> `{"address": "0x.."}`
/// `POST {base}/keys/{handle}/calls`   `{"to", "data"}` -> `{"txHash": "0x.."}`
#[derive(Clone)]
pub struct RemoteSigner {
    http: reqwest::Client,
    base_url: String,
    key_handle: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct AddressResponse {
    address: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallResponse {
    tx_hash: String,
}

impl RemoteSigner {
    pub fn new(http: reqwest::Client, base_url: &str, key_handle: &str, token: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            key_handle: key_handle.to_string(),
            token,
        }
    }

    fn key_url(&self, suffix: &str) -> String {
        format!("{}/keys/{}/{}", self.base_url, self.key_handle, suffix)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, SignerError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        let body = resp.text().await.unwrap_or_default();
        Err(SignerError::Status { status: status.as_u16(), body })
    }
}

#[async_trait]
impl Signer for RemoteSigner {
    async fn address(&self) -> Result<String, SignerError> {
        let resp = self.authorize(self.http.get(self.key_url("address"))).send().await?;
        let parsed: AddressResponse = check_status(resp).await?.json().await?;
        if !is_hex_address(&parsed.address) {
            return Err(SignerError::Malformed(format!("not an address: {}", parsed.address)));
        }
        Ok(parsed.address)
    }

    async fn send_call(&self, to: &str, calldata: &[u8]) -> Result<String, SignerError> {
        let body = json!({ "to": to, "data": format!("0x{}", hex::encode(calldata)) });
        let resp = self.authorize(self.http.post(self.key_url("calls")).json(&body)).send().await?;
        let parsed: CallResponse = check_status(resp).await?.json().await?;
        if parsed.tx_hash.is_empty() {
            return Err(SignerError::Malformed("empty transaction hash".into()));
        }
        Ok(parsed.tx_hash)
    }
}

#[derive(Clone)]
pub struct RemoteSignerProvider {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl RemoteSignerProvider {
    pub fn new(http: reqwest::Client, base_url: &str, token: Option<String>) -> Self {
        Self { http, base_url: base_url.to_string(), token }
    }
}

impl SignerProvider for RemoteSignerProvider {
    fn signer_for(&self, key_handle: &str) -> Arc<dyn Signer> {
        Arc::new(RemoteSigner::new(self.http.clone(), &self.base_url, key_handle, self.token.clone()))
    }
}
