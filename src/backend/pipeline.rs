use crate::backend::chain::ChainClient;
use crate::backend::error::{FetchError, PipelineError};
use crate::backend::identity::{IdentityLocks, Session};
use crate::backend::ipfs::{PinContent, Pinner};
use crate::backend::notify::Notifier;
use crate::backend::records::{FallAlert, FallEvent, FallReceipt, FallRecord, ProfileRecord};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

const IMAGE_FILE: &str = "image.jpg";

/// Steps of one ingestion run, in order. There is no way back to an earlier
/// stage; any fatal error ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ResolveIdentity,
    ReadPointer,
    UploadImage,
    FetchProfile,
    NotifyContacts,
    UploadData,
    WriteRecord,
    Respond,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ResolveIdentity => "resolve_identity",
            Stage::ReadPointer => "read_pointer",
            Stage::UploadImage => "upload_image",
            Stage::FetchProfile => "fetch_profile",
            Stage::NotifyContacts => "notify_contacts",
            Stage::UploadData => "upload_data",
            Stage::WriteRecord => "write_record",
            Stage::Respond => "respond",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct StageError {
    pub stage: Stage,
    pub source: PipelineError,
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, StageError>;
}

impl<T, E: Into<PipelineError>> AtStage<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|e| StageError { stage, source: e.into() })
    }
}

pub struct FallPipeline {
    ipfs: Arc<dyn Pinner>,
    chain: Arc<dyn ChainClient>,
    notifier: Arc<dyn Notifier>,
    locks: IdentityLocks,
    upload_dir: PathBuf,
}

impl FallPipeline {
    pub fn new(
        ipfs: Arc<dyn Pinner>,
        chain: Arc<dyn ChainClient>,
        notifier: Arc<dyn Notifier>,
        locks: IdentityLocks,
        upload_dir: PathBuf,
    ) -> Self {
        Self { ipfs, chain, notifier, locks, upload_dir }
    }

    pub async fn run(&self, session: &Session, event: FallEvent) -> Result<FallReceipt, StageError> {
        let result = self.execute(session, &event).await;
        if let Err(e) = &result {
            tracing::error!(user = %event.username, stage = %e.stage, error = %e, "fall ingestion failed");
        }
        result
    }

    async fn execute(&self, session: &Session, event: &FallEvent) -> Result<FallReceipt, StageError> {
        tracing::debug!(user = %session.username, stage = %Stage::ResolveIdentity);
        let identity = session
            .resolve_identity()
            .await
            .map_err(PipelineError::Identity)
            .at(Stage::ResolveIdentity)?;

        let _guard = self.locks.acquire(&identity).await;

        tracing::debug!(%identity, stage = %Stage::ReadPointer);
        let pointer = self.chain.read_profile_pointer(&identity).await.at(Stage::ReadPointer)?;
        tracing::info!(%identity, pointer = %pointer, "profile pointer read");

        let image_cid = self.upload_image(&event.username).await.at(Stage::UploadImage)?;

        tracing::debug!(%identity, stage = %Stage::FetchProfile);
        let profile = self.fetch_profile(&identity, &pointer).await.at(Stage::FetchProfile)?;

        let alert = FallAlert {
            media_url: image_cid.as_deref().map(|cid| self.ipfs.gateway_url(cid)),
            subject_name: profile.name.clone(),
            timestamp: event.timestamp(),
            date: event.date(),
        };
        let delivered = self.notify_contacts(&profile, &alert).await;
        tracing::info!(%identity, delivered, total = profile.contacts.len(), stage = %Stage::NotifyContacts);

        tracing::debug!(%identity, stage = %Stage::UploadData);
        let data_cid = self
            .ipfs
            .pin(PinContent::Json(event.prediction.clone()))
            .await
            .at(Stage::UploadData)?;
        tracing::info!(%identity, cid = %data_cid, "prediction data pinned");

        let record = FallRecord {
            identity: identity.clone(),
            image_cid: image_cid.unwrap_or_default(),
            data_cid,
        };
        tracing::debug!(%identity, stage = %Stage::WriteRecord);
        let tx_hash = self
            .chain
            .write_fall_record(&record, session.signer())
            .await
            .at(Stage::WriteRecord)?;

        tracing::info!(%identity, tx = %tx_hash, stage = %Stage::Respond);
        Ok(FallReceipt { image_cid: record.image_cid, data_cid: record.data_cid, tx_hash })
    }

    async fn upload_image(&self, username: &str) -> Result<Option<String>, PipelineError> {
        let path = self.upload_dir.join(username).join(IMAGE_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no captured image, continuing without one");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let cid = self
            .ipfs
            .pin(PinContent::File { name: IMAGE_FILE.to_string(), bytes })
            .await?;
        tracing::info!(cid = %cid, "image pinned");
        Ok(Some(cid))
    }

    async fn fetch_profile(&self, identity: &str, pointer: &str) -> Result<ProfileRecord, PipelineError> {
        if pointer.is_empty() {
            return Err(FetchError::NoPointer(identity.to_string()).into());
        }
        let raw = self.ipfs.fetch(pointer).await?;
        serde_json::from_value(raw).map_err(PipelineError::Profile)
    }

    async fn notify_contacts(&self, profile: &ProfileRecord, alert: &FallAlert) -> usize {
        let mut delivered = 0;
        for contact in &profile.contacts {
            if self.notifier.notify(contact, alert).await {
                delivered += 1;
            } else {
                tracing::warn!(phone = %contact.phone_number, "could not notify contact");
            }
        }
        delivered
    }
}
