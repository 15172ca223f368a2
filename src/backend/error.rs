use thiserror::Error;

#[derive(Debug, Error)]
pub enum PinError {
    #[error("pinning service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("pinning request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("pinning response missing IpfsHash")]
    MissingHash,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("content {0} not found on gateway")]
    NotFound(String),
    #[error("gateway returned {status} for {cid}")]
    Status { cid: String, status: u16 },
    #[error("gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("no profile pointer registered for identity {0}")]
    NoPointer(String),
}

#[derive(Debug, Error)]
pub enum ChainReadError {
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("rpc request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed call result: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("signer returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("signer request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("signer response malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum ChainWriteError {
    #[error(transparent)]
    Signer(#[from] SignerError),
    #[error("invalid call argument: {0}")]
    Encode(String),
}

/// Fatal outcomes of a fall ingestion run. Notification failures never show
/// up here; the dispatcher reports them as `false` and the run continues.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not resolve identity: {0}")]
    Identity(#[source] SignerError),
    #[error("failed to read profile pointer: {0}")]
    ChainRead(#[from] ChainReadError),
    #[error("failed to read image: {0}")]
    Image(#[from] std::io::Error),
    #[error("failed to upload to IPFS: {0}")]
    Pin(#[from] PinError),
    #[error("failed to fetch profile: {0}")]
    Fetch(#[from] FetchError),
    #[error("profile is malformed: {0}")]
    Profile(#[source] serde_json::Error),
    #[error("failed to write fall record: {0}")]
    ChainWrite(#[from] ChainWriteError),
}
