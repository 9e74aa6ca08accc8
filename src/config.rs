//! Engine Configuration
//!
//! Defaults match the public MetaID services. A JSON file may override any
//! subset of fields, and `METAID_*` environment variables override the file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::api::DEFAULT_METALET_HOST;
use crate::chunked::DEFAULT_UPLOADER_URL;
use crate::consolidation::{DEFAULT_BALANCE_TOLERANCE, DEFAULT_CONFIRMATION_TIMEOUT};
use crate::error::{EngineError, EngineResult};
use crate::fees::{DEFAULT_DOGE_INSCRIPTION_FEE_RATE, DEFAULT_DOGE_TRANSFER_FEE_RATE, DEFAULT_MVC_FEE_RATE};
use crate::tx::BroadcastConfig;
use crate::types::Network;
use crate::wallet::{KeyNotFoundPolicy, DERIVE_MAX_DEPTH};

const HARDENED_OFFSET: u32 = 0x8000_0000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub network: Network,
    /// Metalet wallet API host
    pub api_host: String,
    pub uploader_url: String,
    pub mvc_fee_rate: u64,
    pub doge_inscription_fee_rate: u64,
    pub doge_transfer_fee_rate: u64,
    /// Addresses indexed per chain when matching inputs to keys
    pub derivation_depth: u32,
    /// Receiving index of the wallet's own address (`m/44'/10001'/0'/0/<i>`)
    pub address_index: u32,
    pub consolidation_tolerance: f64,
    pub consolidation_timeout_secs: u64,
    pub consolidation_key_policy: KeyNotFoundPolicy,
    pub http_timeout_secs: u64,
    pub broadcast_retries: u32,
    pub broadcast_retry_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            api_host: DEFAULT_METALET_HOST.to_string(),
            uploader_url: DEFAULT_UPLOADER_URL.to_string(),
            mvc_fee_rate: DEFAULT_MVC_FEE_RATE,
            doge_inscription_fee_rate: DEFAULT_DOGE_INSCRIPTION_FEE_RATE,
            doge_transfer_fee_rate: DEFAULT_DOGE_TRANSFER_FEE_RATE,
            derivation_depth: DERIVE_MAX_DEPTH,
            address_index: 0,
            consolidation_tolerance: DEFAULT_BALANCE_TOLERANCE,
            consolidation_timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT.as_secs(),
            consolidation_key_policy: KeyNotFoundPolicy::FallbackToPrimary,
            http_timeout_secs: 30,
            broadcast_retries: 3,
            broadcast_retry_delay_ms: 800,
        }
    }
}

impl EngineConfig {
    /// Load a JSON file; missing fields keep their defaults
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::config(format!("Cannot read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| EngineError::config(format!("Invalid config {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `METAID_*` overrides read through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> EngineResult<()> {
        if let Some(v) = lookup("METAID_NETWORK") {
            self.network = v.parse()?;
        }
        if let Some(v) = lookup("METAID_API_HOST") {
            self.api_host = v;
        }
        if let Some(v) = lookup("METAID_UPLOADER_URL") {
            self.uploader_url = v;
        }
        if let Some(v) = lookup("METAID_MVC_FEE_RATE") {
            self.mvc_fee_rate = parse_number("METAID_MVC_FEE_RATE", &v)?;
        }
        if let Some(v) = lookup("METAID_DOGE_FEE_RATE") {
            self.doge_inscription_fee_rate = parse_number("METAID_DOGE_FEE_RATE", &v)?;
        }
        if let Some(v) = lookup("METAID_DERIVATION_DEPTH") {
            self.derivation_depth = parse_number("METAID_DERIVATION_DEPTH", &v)?;
        }
        if let Some(v) = lookup("METAID_ADDRESS_INDEX") {
            self.address_index = parse_number("METAID_ADDRESS_INDEX", &v)?;
        }
        if let Some(v) = lookup("METAID_HTTP_TIMEOUT") {
            self.http_timeout_secs = parse_number("METAID_HTTP_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("METAID_BROADCAST_RETRIES") {
            self.broadcast_retries = parse_number("METAID_BROADCAST_RETRIES", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> EngineResult<()> {
        validate_endpoint("apiHost", &self.api_host)?;
        validate_endpoint("uploaderUrl", &self.uploader_url)?;
        if self.derivation_depth == 0 || self.derivation_depth > DERIVE_MAX_DEPTH {
            return Err(EngineError::config(format!(
                "derivationDepth must be within 1..={}",
                DERIVE_MAX_DEPTH
            )));
        }
        if self.address_index >= HARDENED_OFFSET {
            return Err(EngineError::config("addressIndex must be a non-hardened index"));
        }
        if !(0.0..1.0).contains(&self.consolidation_tolerance) {
            return Err(EngineError::config("consolidationTolerance must be a fraction below 1"));
        }
        if self.mvc_fee_rate == 0 || self.doge_inscription_fee_rate == 0 || self.doge_transfer_fee_rate == 0 {
            return Err(EngineError::config("Fee rates must be positive"));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn consolidation_timeout(&self) -> Duration {
        Duration::from_secs(self.consolidation_timeout_secs)
    }

    pub fn broadcast(&self) -> BroadcastConfig {
        BroadcastConfig {
            retries: self.broadcast_retries,
            retry_delay: Duration::from_millis(self.broadcast_retry_delay_ms),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> EngineResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| EngineError::config(format!("{} must be a number, got '{}'", key, value)))
}

/// HTTPS everywhere except loopback
fn validate_endpoint(field: &str, raw: &str) -> EngineResult<()> {
    let url = Url::parse(raw).map_err(|e| EngineError::config(format!("{} is not a valid URL: {}", field, e)))?;
    match url.scheme() {
        "https" => Ok(()),
        "http" if matches!(url.host_str(), Some("localhost") | Some("127.0.0.1")) => Ok(()),
        scheme => Err(EngineError::config(format!(
            "{} must use https (got {}://{})",
            field,
            scheme,
            url.host_str().unwrap_or_default()
        ))),
    }
}
