use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Service configuration. Built once at startup and handed to the backend;
/// nothing reads the environment after that.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub pinata_api_url: String,
    pub gateway_url: String,
    pub pinata_api_key: String,
    pub rpc_url: String,
    pub contract_address: String,
    pub signer_url: String,
    pub signer_token: Option<String>,
    pub whatsapp_api_url: String,
    pub whatsapp_phone_number_id: String,
    pub whatsapp_token: String,
    pub whatsapp_template: String,
    pub whatsapp_language: String,
    pub upload_dir: PathBuf,
    pub http_timeout: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));
        let or_default = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let listen_addr = or_default("LISTEN_ADDR", "0.0.0.0:3000")
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                var: "LISTEN_ADDR",
                reason: e.to_string(),
            })?;

        let http_timeout = match get("HTTP_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.parse().map_err(|_| ConfigError::Invalid {
                    var: "HTTP_TIMEOUT_SECS",
                    reason: format!("not a number: {}", raw),
                })?;
                Some(Duration::from_secs(secs))
            }
            None => None,
        };

        let contract_address = required("METASAVE_CONTRACT")?;
        if !is_hex_address(&contract_address) {
            return Err(ConfigError::Invalid {
                var: "METASAVE_CONTRACT",
                reason: "expected a 0x-prefixed 20 byte address".into(),
            });
        }

        Ok(Self {
            listen_addr,
            pinata_api_url: trim_slash(or_default("PINATA_API_URL", "https://api.pinata.cloud")),
            gateway_url: trim_slash(required("PINATA_BASE_URL")?),
            pinata_api_key: required("PINATA_API_KEY")?,
            rpc_url: required("ALCHEMY_API_URL")?,
            contract_address,
            signer_url: trim_slash(required("SIGNER_URL")?),
            signer_token: get("SIGNER_TOKEN"),
            whatsapp_api_url: trim_slash(or_default("WHATSAPP_API_URL", "https://graph.facebook.com/v19.0")),
            whatsapp_phone_number_id: required("WHATSAPP_PHONE_NUMBER_ID")?,
            whatsapp_token: required("WHATSAPP_TOKEN")?,
            whatsapp_template: or_default("WHATSAPP_TEMPLATE", "fall_alert"),
            whatsapp_language: or_default("WHATSAPP_LANGUAGE", "en"),
            upload_dir: PathBuf::from(or_default("UPLOAD_DIR", "./uploads")),
            http_timeout,
        })
    }

    /// Shared outbound HTTP client. Without `HTTP_TIMEOUT_SECS` the transport
    /// defaults apply.
    pub fn http_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.http_timeout {
            builder = builder.timeout(timeout);
        }
        builder.build()
    }
}

fn trim_slash(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}

pub(crate) fn is_hex_address(value: &str) -> bool {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(rest) => rest.len() == 40 && rest.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}
