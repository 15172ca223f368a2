//! In-memory doubles and throwaway HTTP services shared by the unit tests.

use crate::backend::chain::ChainClient;
use crate::backend::error::{ChainReadError, ChainWriteError, FetchError, PinError, SignerError};
use crate::backend::ipfs::{PinContent, Pinner};
use crate::backend::notify::Notifier;
use crate::backend::records::{Contact, FallAlert, FallRecord};
use crate::backend::signer::{Signer, SignerProvider};
use async_trait::async_trait;
use axum::extract::{Multipart, Path, State};
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Shared<T> = Arc<Mutex<T>>;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn mint_cid(counter: usize, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(counter.to_be_bytes());
    hasher.update(body);
    format!("Qm{}", &hex::encode(hasher.finalize())[..44])
}

fn bearer_matches(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v == format!("Bearer {}", token))
}

// ---- content storage ----

#[derive(Default)]
pub struct MemoryPinnerState {
    json: HashMap<String, Value>,
    files: HashMap<String, Vec<u8>>,
    pins: usize,
    fetches: usize,
    fail_pins: bool,
}

#[derive(Default)]
pub struct MemoryPinner {
    state: Mutex<MemoryPinnerState>,
}

impl MemoryPinner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed content without counting it as a pin.
    pub fn insert(&self, value: Value) -> String {
        let mut s = self.state.lock().unwrap();
        let cid = mint_cid(usize::MAX - s.json.len(), value.to_string().as_bytes());
        s.json.insert(cid.clone(), value);
        cid
    }

    pub fn get(&self, cid: &str) -> Option<Value> {
        self.state.lock().unwrap().json.get(cid).cloned()
    }

    pub fn file_bytes(&self, cid: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(cid).cloned()
    }

    pub fn pin_count(&self) -> usize {
        self.state.lock().unwrap().pins
    }

    pub fn fetch_count(&self) -> usize {
        self.state.lock().unwrap().fetches
    }

    pub fn fail_pins(&self) {
        self.state.lock().unwrap().fail_pins = true;
    }
}

#[async_trait]
impl Pinner for MemoryPinner {
    async fn pin(&self, content: PinContent) -> Result<String, PinError> {
        let mut s = self.state.lock().unwrap();
        if s.fail_pins {
            return Err(PinError::Status { status: 503, body: "unavailable".into() });
        }
        s.pins += 1;
        let n = s.pins;
        match content {
            PinContent::Json(value) => {
                let cid = mint_cid(n, value.to_string().as_bytes());
                s.json.insert(cid.clone(), value);
                Ok(cid)
            }
            PinContent::File { bytes, .. } => {
                let cid = mint_cid(n, &bytes);
                s.files.insert(cid.clone(), bytes);
                Ok(cid)
            }
        }
    }

    async fn fetch(&self, cid: &str) -> Result<Value, FetchError> {
        let mut s = self.state.lock().unwrap();
        s.fetches += 1;
        s.json.get(cid).cloned().ok_or_else(|| FetchError::NotFound(cid.to_string()))
    }

    fn gateway_url(&self, cid: &str) -> String {
        format!("http://gateway.test/ipfs/{}", cid)
    }
}

// ---- chain ----

#[derive(Default)]
struct FakeChainState {
    pointers: HashMap<String, String>,
    writes: Vec<FallRecord>,
    fail_reads: bool,
    fail_writes: bool,
    in_flight: usize,
    max_in_flight: usize,
    read_delay: Option<Duration>,
}

#[derive(Default)]
pub struct FakeChain {
    state: Mutex<FakeChainState>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pointer(&self, identity: &str, cid: &str) {
        self.state.lock().unwrap().pointers.insert(identity.to_string(), cid.to_string());
    }

    pub fn writes(&self) -> Vec<FallRecord> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn fail_reads(&self) {
        self.state.lock().unwrap().fail_reads = true;
    }

    /// Stall every pointer read, standing in for a slow node.
    pub fn delay_reads(&self, delay: Duration) {
        self.state.lock().unwrap().read_delay = Some(delay);
    }

    pub fn fail_writes(&self) {
        self.state.lock().unwrap().fail_writes = true;
    }

    /// Highest number of runs seen between pointer read and record write.
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn read_profile_pointer(&self, identity: &str) -> Result<String, ChainReadError> {
        let (pointer, delay) = {
            let mut s = self.state.lock().unwrap();
            if s.fail_reads {
                return Err(ChainReadError::Rpc { code: -32000, message: "node unavailable".into() });
            }
            s.in_flight += 1;
            s.max_in_flight = s.max_in_flight.max(s.in_flight);
            (s.pointers.get(identity).cloned().unwrap_or_default(), s.read_delay)
        };
        match delay {
            Some(d) => tokio::time::sleep(d).await,
            None => tokio::task::yield_now().await,
        }
        Ok(pointer)
    }

    async fn write_fall_record(&self, record: &FallRecord, _signer: &dyn Signer) -> Result<String, ChainWriteError> {
        tokio::task::yield_now().await;
        let mut s = self.state.lock().unwrap();
        s.in_flight = s.in_flight.saturating_sub(1);
        if s.fail_writes {
            return Err(SignerError::Status { status: 500, body: "replacement underpriced".into() }.into());
        }
        s.writes.push(record.clone());
        Ok(format!("0xtx{}", s.writes.len()))
    }
}

pub struct FakeSigner {
    address: String,
    sent: Mutex<Vec<(String, Vec<u8>)>>,
    fail_address: bool,
}

impl FakeSigner {
    pub fn new(address: &str) -> Self {
        Self { address: address.to_string(), sent: Mutex::new(Vec::new()), fail_address: false }
    }

    pub fn unreachable() -> Self {
        Self { fail_address: true, ..Self::new("") }
    }

    pub fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Signer for FakeSigner {
    async fn address(&self) -> Result<String, SignerError> {
        if self.fail_address {
            return Err(SignerError::Status { status: 404, body: "unknown key".into() });
        }
        Ok(self.address.clone())
    }

    async fn send_call(&self, to: &str, calldata: &[u8]) -> Result<String, SignerError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.to_string(), calldata.to_vec()));
        Ok(format!("0xtx{}", sent.len()))
    }
}

/// Maps key handles to fixed addresses; unknown handles fail to resolve.
pub struct FakeSignerProvider {
    pub keys: HashMap<String, String>,
}

impl SignerProvider for FakeSignerProvider {
    fn signer_for(&self, key_handle: &str) -> Arc<dyn Signer> {
        match self.keys.get(key_handle) {
            Some(addr) => Arc::new(FakeSigner::new(addr)),
            None => Arc::new(FakeSigner::unreachable()),
        }
    }
}

// ---- notifications ----

pub struct FakeNotifier {
    failing: Vec<String>,
    attempts: Mutex<Vec<(Contact, FallAlert)>>,
}

impl FakeNotifier {
    pub fn failing_for(phones: &[&str]) -> Self {
        Self {
            failing: phones.iter().map(|p| p.to_string()).collect(),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> Vec<(Contact, FallAlert)> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, contact: &Contact, alert: &FallAlert) -> bool {
        self.attempts.lock().unwrap().push((contact.clone(), alert.clone()));
        !self.failing.contains(&contact.phone_number)
    }
}

// ---- pinning service over HTTP ----

#[derive(Default)]
struct PinataState {
    key: String,
    content: HashMap<String, Value>,
    files: Vec<(String, usize)>,
    pins: usize,
}

pub struct FakePinata {
    pub url: String,
    state: Shared<PinataState>,
}

impl FakePinata {
    pub fn pin_count(&self) -> usize {
        self.state.lock().unwrap().pins
    }

    pub fn files(&self) -> Vec<(String, usize)> {
        self.state.lock().unwrap().files.clone()
    }
}

async fn pinata_pin_json(
    State(state): State<Shared<PinataState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut s = state.lock().unwrap();
    if !bearer_matches(&headers, &s.key) {
        return (StatusCode::UNAUTHORIZED, "invalid credentials").into_response();
    }
    s.pins += 1;
    let cid = mint_cid(s.pins, body.to_string().as_bytes());
    s.content.insert(cid.clone(), body);
    Json(json!({ "IpfsHash": cid, "PinSize": 1 })).into_response()
}

async fn pinata_pin_file(
    State(state): State<Shared<PinataState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let key = state.lock().unwrap().key.clone();
    if !bearer_matches(&headers, &key) {
        return (StatusCode::UNAUTHORIZED, "invalid credentials").into_response();
    }
    let mut pinned = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.unwrap_or_default();
        let mut s = state.lock().unwrap();
        s.pins += 1;
        s.files.push((name, bytes.len()));
        pinned = Some(mint_cid(s.pins, &bytes));
    }
    match pinned {
        Some(cid) => Json(json!({ "IpfsHash": cid })).into_response(),
        None => (StatusCode::BAD_REQUEST, "no file").into_response(),
    }
}

async fn pinata_gateway(State(state): State<Shared<PinataState>>, Path(cid): Path<String>) -> Response {
    match state.lock().unwrap().content.get(&cid) {
        Some(value) => Json(value.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

/// Pinning API and gateway on one address.
pub async fn spawn_fake_pinata(api_key: &str) -> FakePinata {
    let state: Shared<PinataState> = Arc::new(Mutex::new(PinataState { key: api_key.to_string(), ..Default::default() }));
    let app = Router::new()
        .route("/pinning/pinJSONToIPFS", post(pinata_pin_json))
        .route("/pinning/pinFileToIPFS", post(pinata_pin_file))
        .route("/ipfs/:cid", get(pinata_gateway))
        .with_state(state.clone());
    FakePinata { url: serve(app).await, state }
}

// ---- custodial signer over HTTP ----

#[derive(Default)]
struct SignerServiceState {
    address: String,
    token: Option<String>,
    calls: Vec<(String, Value)>,
}

pub struct FakeSignerService {
    pub url: String,
    state: Shared<SignerServiceState>,
}

impl FakeSignerService {
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.state.lock().unwrap().calls.clone()
    }
}

fn signer_authorized(state: &SignerServiceState, headers: &HeaderMap) -> bool {
    match &state.token {
        Some(token) => bearer_matches(headers, token),
        None => true,
    }
}

async fn signer_address(
    State(state): State<Shared<SignerServiceState>>,
    Path(_handle): Path<String>,
    headers: HeaderMap,
) -> Response {
    let s = state.lock().unwrap();
    if !signer_authorized(&s, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({ "address": s.address })).into_response()
}

async fn signer_calls(
    State(state): State<Shared<SignerServiceState>>,
    Path(handle): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut s = state.lock().unwrap();
    if !signer_authorized(&s, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    s.calls.push((handle, body));
    Json(json!({ "txHash": format!("0x{:064x}", s.calls.len()) })).into_response()
}

pub async fn spawn_fake_signer(address: &str, token: Option<&str>) -> FakeSignerService {
    let state = Arc::new(Mutex::new(SignerServiceState {
        address: address.to_string(),
        token: token.map(str::to_string),
        calls: Vec::new(),
    }));
    let app = Router::new()
        .route("/keys/:handle/address", get(signer_address))
        .route("/keys/:handle/calls", post(signer_calls))
        .with_state(state.clone());
    FakeSignerService { url: serve(app).await, state }
}

// ---- JSON-RPC node ----

#[derive(Default)]
struct RpcState {
    pointer: Option<String>,
    failure: Option<String>,
    requests: Vec<Value>,
}

pub struct FakeRpc {
    pub url: String,
    state: Shared<RpcState>,
}

impl FakeRpc {
    pub fn last_request(&self) -> Option<Value> {
        self.state.lock().unwrap().requests.last().cloned()
    }

    pub fn fail_with(&self, message: &str) {
        self.state.lock().unwrap().failure = Some(message.to_string());
    }
}

fn abi_string_return(value: &str) -> String {
    let mut out = Vec::new();
    let mut word = [0u8; 32];
    word[31] = 32;
    out.extend_from_slice(&word);
    let mut len = [0u8; 32];
    len[24..].copy_from_slice(&(value.len() as u64).to_be_bytes());
    out.extend_from_slice(&len);
    out.extend_from_slice(value.as_bytes());
    out.resize(64 + value.len().div_ceil(32) * 32, 0);
    format!("0x{}", hex::encode(out))
}

async fn rpc_handler(State(state): State<Shared<RpcState>>, Json(body): Json<Value>) -> Json<Value> {
    let mut s = state.lock().unwrap();
    let id = body["id"].clone();
    s.requests.push(body);
    if let Some(message) = &s.failure {
        return Json(json!({ "jsonrpc": "2.0", "id": id, "error": { "code": 3, "message": message } }));
    }
    let result = match &s.pointer {
        Some(p) => abi_string_return(p),
        None => "0x".to_string(),
    };
    Json(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

pub async fn spawn_fake_rpc(pointer: Option<&str>) -> FakeRpc {
    let state = Arc::new(Mutex::new(RpcState { pointer: pointer.map(str::to_string), ..Default::default() }));
    let app = Router::new().route("/", post(rpc_handler)).with_state(state.clone());
    FakeRpc { url: serve(app).await, state }
}

// ---- messaging provider ----

#[derive(Default)]
struct WhatsAppState {
    reject: Vec<String>,
    messages: Vec<Value>,
}

pub struct FakeWhatsApp {
    pub url: String,
    state: Shared<WhatsAppState>,
}

impl FakeWhatsApp {
    pub fn messages(&self) -> Vec<Value> {
        self.state.lock().unwrap().messages.clone()
    }
}

async fn whatsapp_messages(
    State(state): State<Shared<WhatsAppState>>,
    Path(_phone_id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut s = state.lock().unwrap();
    let to = body["to"].as_str().unwrap_or_default().to_string();
    s.messages.push(body);
    if s.reject.contains(&to) {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": { "message": "invalid recipient" } }))).into_response();
    }
    Json(json!({ "messages": [{ "id": "wamid.1" }] })).into_response()
}

pub async fn spawn_fake_whatsapp(reject: Vec<String>) -> FakeWhatsApp {
    let state = Arc::new(Mutex::new(WhatsAppState { reject, messages: Vec::new() }));
    let app = Router::new()
        .route("/:phone_id/messages", post(whatsapp_messages))
        .with_state(state.clone());
    FakeWhatsApp { url: serve(app).await, state }
}
