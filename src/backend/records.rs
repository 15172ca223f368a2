use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One inbound fall detection. Lives for a single pipeline run.
#[derive(Debug, Clone)]
pub struct FallEvent {
    pub username: String,
    pub prediction: Value,
}

impl FallEvent {
    /// Event time as reported by the device, or now when the payload has none.
    pub fn timestamp(&self) -> String {
        field_as_string(&self.prediction, "timestamp")
            .unwrap_or_else(|| Utc::now().format("%H:%M:%S").to_string())
    }

    pub fn date(&self) -> String {
        field_as_string(&self.prediction, "date")
            .unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string())
    }
}

fn field_as_string(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Profile JSON stored on IPFS and referenced by the on-chain pointer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileRecord {
    pub name: String,
    #[serde(default)]
    pub contacts: Vec<Contact>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub phone_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// What gets written to the contract for one identity.
#[derive(Debug, Clone, PartialEq)]
pub struct FallRecord {
    pub identity: String,
    pub image_cid: String,
    pub data_cid: String,
}

/// Message content sent to every contact of a profile.
#[derive(Debug, Clone, PartialEq)]
pub struct FallAlert {
    pub media_url: Option<String>,
    pub subject_name: String,
    pub timestamp: String,
    pub date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FallReceipt {
    #[serde(rename = "imgIPFSid")]
    pub image_cid: String,
    #[serde(rename = "dataIPFSid")]
    pub data_cid: String,
    #[serde(rename = "txHash")]
    pub tx_hash: String,
}
