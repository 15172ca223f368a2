pub mod abi;
pub mod chain;
pub mod config;
pub mod error;
pub mod identity;
pub mod ipfs;
pub mod notify;
pub mod pipeline;
pub mod records;
pub mod signer;
#[cfg(test)]
pub(crate) mod testing;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chain::{ChainClient, RpcChain};
use config::{is_hex_address, Config};
use identity::{is_valid_username, IdentityLocks, Session};
use ipfs::{PinataClient, Pinner};
use notify::{Notifier, WhatsAppClient};
use pipeline::FallPipeline;
use records::FallEvent;
use serde::Deserialize;
use serde_json::{json, Value};
use signer::{RemoteSignerProvider, SignerProvider};
use std::path::PathBuf;
use std::sync::Arc;

/// Inbound body from the fall detection device.
#[derive(Debug, Deserialize)]
pub struct FallRequest {
    #[serde(rename = "USERNAME")]
    pub username: String,
    #[serde(rename = "SIGNER_KEY", default)]
    pub signer_key: Option<String>,
    #[serde(rename = "PREDICTION_DATA")]
    pub prediction_data: Value,
    #[serde(rename = "PRIV_KEY", default)]
    pub priv_key: Option<Value>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    fn internal(message: impl ToString) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: message.to_string() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Everything a request handler needs, built once from `Config` and shared
/// by reference. Per-user state lives in `Session`, never here.
pub struct Backend {
    pipeline: Arc<FallPipeline>,
    chain: Arc<dyn ChainClient>,
    signers: Arc<dyn SignerProvider>,
}

impl Backend {
    pub fn new(
        ipfs: Arc<dyn Pinner>,
        chain: Arc<dyn ChainClient>,
        notifier: Arc<dyn Notifier>,
        signers: Arc<dyn SignerProvider>,
        upload_dir: PathBuf,
    ) -> Self {
        let pipeline = FallPipeline::new(ipfs, chain.clone(), notifier, IdentityLocks::new(), upload_dir);
        Self { pipeline: Arc::new(pipeline), chain, signers }
    }

    pub fn from_config(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let http = config.http_client()?;

        let ipfs = PinataClient::new(
            http.clone(),
            &config.pinata_api_url,
            &config.gateway_url,
            &config.pinata_api_key,
        );
        let chain = RpcChain::new(http.clone(), &config.rpc_url, &config.contract_address);
        let notifier = WhatsAppClient::new(
            http.clone(),
            &config.whatsapp_api_url,
            &config.whatsapp_phone_number_id,
            &config.whatsapp_token,
            &config.whatsapp_template,
            &config.whatsapp_language,
        );
        let signers = RemoteSignerProvider::new(http, &config.signer_url, config.signer_token.clone());

        Ok(Self::new(
            Arc::new(ipfs),
            Arc::new(chain),
            Arc::new(notifier),
            Arc::new(signers),
            config.upload_dir.clone(),
        ))
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/fall", post(insert_fall))
            .route("/identity/:address", get(identity_status))
            .with_state(self)
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn parse_event(req: FallRequest) -> Result<(FallEvent, String), ApiError> {
    if req.priv_key.is_some() {
        return Err(ApiError::bad_request(
            "PRIV_KEY is not accepted; send SIGNER_KEY for a delegated signing key",
        ));
    }
    let signer_key = req
        .signer_key
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("SIGNER_KEY is required"))?;
    if !is_valid_username(&req.username) {
        return Err(ApiError::bad_request(format!("invalid USERNAME: {:?}", req.username)));
    }

    let prediction = match req.prediction_data {
        Value::String(raw) => serde_json::from_str(&raw)
            .map_err(|e| ApiError::bad_request(format!("PREDICTION_DATA is not valid JSON: {}", e)))?,
        other => other,
    };
    if !prediction.is_object() {
        return Err(ApiError::bad_request("PREDICTION_DATA must be a JSON object or a string encoding one"));
    }

    Ok((FallEvent { username: req.username, prediction }, signer_key))
}

async fn insert_fall(
    State(backend): State<Arc<Backend>>,
    payload: Result<Json<FallRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let (event, signer_key) = parse_event(req)?;
    tracing::info!(user = %event.username, "fall event received");

    let session = Session::new(event.username.clone(), backend.signers.signer_for(&signer_key));

    // Detached so a client hanging up cannot stop a run halfway through.
    let pipeline = backend.pipeline.clone();
    let run = tokio::spawn(async move { pipeline.run(&session, event).await });
    let receipt = run
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "fall ingestion task aborted");
            ApiError::internal(e)
        })?
        .map_err(ApiError::internal)?;

    Ok(Json(receipt).into_response())
}

async fn identity_status(
    State(backend): State<Arc<Backend>>,
    Path(address): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !is_hex_address(&address) {
        return Err(ApiError::bad_request(format!("not an address: {}", address)));
    }
    let pointer = backend.chain.read_profile_pointer(&address).await.map_err(|e| {
        tracing::error!(identity = %address, error = %e, "pointer lookup failed");
        ApiError::internal(e)
    })?;

    Ok(Json(json!({
        "identity": address,
        "profilePointer": pointer,
        "registered": !pointer.is_empty(),
    })))
}

pub async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let backend = Arc::new(Backend::from_config(&config)?);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "metasave backend listening");
    axum::serve(listener, backend.router()).await?;
    Ok(())
}
