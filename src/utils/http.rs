//! HTTP Client
//!
//! Blocking `reqwest` client shared by the wallet API and the file uploader.
//! Both services wrap their payload in a `{code, message, data}` envelope.

use reqwest::blocking::multipart::Form;
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{EngineError, EngineResult};

const USER_AGENT: &str = "metaid-engine/0.1";

/// Thin wrapper around a configured blocking client
#[derive(Clone)]
pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> EngineResult<Self> {
        let inner = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(5)
            .tcp_nodelay(true)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| EngineError::network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { inner })
    }

    /// GET with query parameters, decoding the JSON body
    pub fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> EngineResult<T> {
        let response = self
            .inner
            .get(url)
            .query(query)
            .send()
            .map_err(|e| EngineError::network(format!("GET {} failed: {}", url, e)))?;
        decode_response(url, response)
    }

    /// POST a JSON body, decoding the JSON response
    pub fn post_json<B: Serialize, T: DeserializeOwned>(&self, url: &str, body: &B) -> EngineResult<T> {
        let response = self
            .inner
            .post(url)
            .json(body)
            .send()
            .map_err(|e| EngineError::network(format!("POST {} failed: {}", url, e)))?;
        decode_response(url, response)
    }

    /// POST a multipart form, decoding the JSON response
    pub fn post_form<T: DeserializeOwned>(&self, url: &str, form: Form) -> EngineResult<T> {
        let response = self
            .inner
            .post(url)
            .multipart(form)
            .send()
            .map_err(|e| EngineError::network(format!("POST {} failed: {}", url, e)))?;
        decode_response(url, response)
    }
}

fn decode_response<T: DeserializeOwned>(url: &str, response: reqwest::blocking::Response) -> EngineResult<T> {
    let status = response.status();
    let body = response.text()?;
    if !status.is_success() {
        return Err(EngineError::provider(format!("{} returned HTTP {}", url, status.as_u16()))
            .with_details(truncate(&body, 256)));
    }
    serde_json::from_str(&body).map_err(|e| {
        EngineError::parse_error(format!("Unexpected response from {}: {}", url, e))
            .with_details(truncate(&body, 256))
    })
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Standard `{code, message, data}` response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Unwrap `data`, treating code 0 (wallet API) or 200 (uploader) as success
    pub fn into_data(self, context: &str) -> EngineResult<T> {
        if self.code != 0 && self.code != 200 {
            return Err(EngineError::provider(format!(
                "{} failed: {} (code {})",
                context, self.message, self.code
            )));
        }
        self.data
            .ok_or_else(|| EngineError::provider(format!("{} returned no data", context)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_success() {
        let env: ApiEnvelope<u32> = serde_json::from_str(r#"{"code":0,"message":"ok","data":7}"#).unwrap();
        assert_eq!(env.into_data("fee").unwrap(), 7);

        let env: ApiEnvelope<u32> = serde_json::from_str(r#"{"code":200,"data":9}"#).unwrap();
        assert_eq!(env.into_data("upload").unwrap(), 9);
    }

    #[test]
    fn test_envelope_failure() {
        let env: ApiEnvelope<u32> =
            serde_json::from_str(r#"{"code":40001,"message":"bad address","data":null}"#).unwrap();
        let err = env.into_data("utxo-list").unwrap_err();
        assert!(err.message.contains("bad address"));

        let env: ApiEnvelope<u32> = serde_json::from_str(r#"{"code":0,"message":"","data":null}"#).unwrap();
        assert!(env.into_data("utxo-list").is_err());
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let s = "ééééé";
        let t = truncate(s, 3);
        assert!(t.ends_with("..."));
    }
}
