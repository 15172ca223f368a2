use crate::backend::abi::{self, Token};
use crate::backend::error::{ChainReadError, ChainWriteError};
use crate::backend::records::FallRecord;
use crate::backend::signer::Signer;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

const GET_POINTER: &str = "getIPFSFileName(address)";
const SET_FALL_DATA: &str = "setFallData(address,string,string)";

/// Reads and writes against the single MetaSave contract.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Profile pointer stored for `identity`. Empty when nothing is stored.
    async fn read_profile_pointer(&self, identity: &str) -> Result<String, ChainReadError>;

    async fn write_fall_record(&self, record: &FallRecord, signer: &dyn Signer) -> Result<String, ChainWriteError>;
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

pub struct RpcChain {
    http: reqwest::Client,
    rpc_url: String,
    contract: String,
    next_id: AtomicU64,
}

impl RpcChain {
    pub fn new(http: reqwest::Client, rpc_url: &str, contract: &str) -> Self {
        Self {
            http,
            rpc_url: rpc_url.to_string(),
            contract: contract.to_string(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ChainReadError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        let resp: RpcResponse = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = resp.error {
            return Err(ChainReadError::Rpc { code: err.code, message: err.message });
        }
        resp.result.ok_or_else(|| ChainReadError::Decode("response has neither result nor error".into()))
    }
}

#[async_trait]
impl ChainClient for RpcChain {
    async fn read_profile_pointer(&self, identity: &str) -> Result<String, ChainReadError> {
        let data = abi::encode_call(GET_POINTER, &[Token::Address(identity.to_string())])
            .map_err(ChainReadError::Decode)?;
        let params = json!([{ "to": self.contract, "data": format!("0x{}", hex::encode(data)) }, "latest"]);

        let result = self.call("eth_call", params).await?;
        let raw = result
            .as_str()
            .ok_or_else(|| ChainReadError::Decode(format!("expected hex string, got {}", result)))?;
        let bytes = hex::decode(raw.trim_start_matches("0x")).map_err(|e| ChainReadError::Decode(e.to_string()))?;

        abi::decode_string(&bytes).map_err(ChainReadError::Decode)
    }

    async fn write_fall_record(&self, record: &FallRecord, signer: &dyn Signer) -> Result<String, ChainWriteError> {
        let data = abi::encode_call(
            SET_FALL_DATA,
            &[
                Token::Address(record.identity.clone()),
                Token::String(record.image_cid.clone()),
                Token::String(record.data_cid.clone()),
            ],
        )
        .map_err(ChainWriteError::Encode)?;

        let tx_hash = signer.send_call(&self.contract, &data).await?;
        tracing::info!(identity = %record.identity, tx = %tx_hash, "fall record submitted");
        Ok(tx_hash)
    }
}
