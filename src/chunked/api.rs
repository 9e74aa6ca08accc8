//! Metafile uploader API
//!
//! Multipart storage, fee estimation and task submission, plus the
//! single-request direct upload for small files. The engine only talks to
//! the service through `MetafileApi`.

use reqwest::blocking::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::EngineResult;
use crate::utils::{ApiEnvelope, HttpClient};

pub const DEFAULT_UPLOADER_URL: &str = "https://file.metaid.io/metafile-uploader";

/// Bytes per multipart part before base64
pub const MULTIPART_CHUNK_SIZE: usize = 1024 * 1024;

/// Largest file sent in a single direct-upload request
pub const DIRECT_UPLOAD_MAX_SIZE: u64 = 5 * 1024 * 1024;

/// Whether a file of `size` bytes takes the direct route
pub fn fits_direct_upload(size: u64) -> bool {
    size > 0 && size <= DIRECT_UPLOAD_MAX_SIZE
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    pub file_name: String,
    pub file_size: u64,
    pub meta_id: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartUpload {
    pub upload_id: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPartRequest {
    pub upload_id: String,
    pub key: String,
    pub part_number: u32,
    /// Base64 of the part's bytes
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedPart {
    pub part_number: u32,
    pub etag: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub upload_id: String,
    pub key: String,
    pub parts: Vec<UploadedPart>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateRequest {
    pub file_name: String,
    pub path: String,
    pub content_type: String,
    pub chain: String,
    pub fee_rate: u64,
    pub storage_key: String,
}

/// Service quote for the two pre-transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkedEstimate {
    pub chunk_pre_tx_fee: u64,
    pub index_pre_tx_fee: u64,
    #[serde(default)]
    pub chunk_number: u64,
    #[serde(default)]
    pub total_fee: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub meta_id: String,
    pub address: String,
    pub file_name: String,
    pub path: String,
    pub operation: String,
    pub content_type: String,
    pub chain: String,
    pub fee_rate: u64,
    pub chunk_pre_tx_hex: String,
    pub index_pre_tx_hex: String,
    pub merge_tx_hex: String,
    pub storage_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReceipt {
    pub task_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
}

/// One-shot upload: the file plus a pre-transaction the service completes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectUploadRequest {
    pub file_name: String,
    pub content: Vec<u8>,
    pub path: String,
    pub operation: String,
    pub content_type: String,
    pub meta_id: String,
    pub address: String,
    pub fee_rate: u64,
    pub pre_tx_hex: String,
    pub total_input_amount: u64,
}

impl DirectUploadRequest {
    /// Text fields of the multipart form, in submission order
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("path", self.path.clone()),
            ("preTxHex", self.pre_tx_hex.clone()),
            ("operation", self.operation.clone()),
            ("contentType", binary_content_type(&self.content_type)),
            ("metaId", self.meta_id.clone()),
            ("address", self.address.clone()),
            ("changeAddress", self.address.clone()),
            ("feeRate", self.fee_rate.to_string()),
            ("totalInputAmount", self.total_input_amount.to_string()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectUploadReceipt {
    pub tx_id: String,
    pub pin_id: String,
    #[serde(default)]
    pub status: String,
}

pub trait MetafileApi: Send + Sync {
    fn initiate(&self, request: &InitiateRequest) -> EngineResult<MultipartUpload>;
    /// Returns the part's etag
    fn upload_part(&self, request: &UploadPartRequest) -> EngineResult<String>;
    /// Returns the storage key of the assembled file
    fn complete(&self, request: &CompleteRequest) -> EngineResult<String>;
    fn estimate(&self, request: &EstimateRequest) -> EngineResult<ChunkedEstimate>;
    fn submit_task(&self, request: &TaskRequest) -> EngineResult<TaskReceipt>;
    fn direct_upload(&self, request: &DirectUploadRequest) -> EngineResult<DirectUploadReceipt>;
}

/// Content types sent to the uploader always carry the binary marker
pub fn binary_content_type(content_type: &str) -> String {
    if content_type.contains(";binary") {
        content_type.to_string()
    } else {
        format!("{};binary", content_type)
    }
}

#[derive(Deserialize)]
struct EtagData {
    etag: String,
}

#[derive(Deserialize)]
struct KeyData {
    key: String,
}

/// HTTP client for the metafile uploader
#[derive(Clone)]
pub struct MetafileClient {
    http: HttpClient,
    base: String,
}

impl MetafileClient {
    pub fn new(base: impl Into<String>, timeout: Duration) -> EngineResult<Self> {
        Ok(Self {
            http: HttpClient::new(timeout)?,
            base: base.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/files/{}", self.base, path)
    }

    fn post<B: Serialize, T: serde::de::DeserializeOwned>(&self, path: &str, body: &B) -> EngineResult<T> {
        let envelope: ApiEnvelope<T> = self.http.post_json(&self.url(path), body)?;
        envelope.into_data(path)
    }
}

impl MetafileApi for MetafileClient {
    fn initiate(&self, request: &InitiateRequest) -> EngineResult<MultipartUpload> {
        self.post("multipart/initiate", request)
    }

    fn upload_part(&self, request: &UploadPartRequest) -> EngineResult<String> {
        let data: EtagData = self.post("multipart/upload-part", request)?;
        Ok(data.etag)
    }

    fn complete(&self, request: &CompleteRequest) -> EngineResult<String> {
        let data: KeyData = self.post("multipart/complete", request)?;
        Ok(data.key)
    }

    fn estimate(&self, request: &EstimateRequest) -> EngineResult<ChunkedEstimate> {
        self.post("estimate-chunked-upload", request)
    }

    fn submit_task(&self, request: &TaskRequest) -> EngineResult<TaskReceipt> {
        self.post("chunked-upload-task", request)
    }

    fn direct_upload(&self, request: &DirectUploadRequest) -> EngineResult<DirectUploadReceipt> {
        let mut form = Form::new().part(
            "file",
            Part::bytes(request.content.clone()).file_name(request.file_name.clone()),
        );
        for (name, value) in request.form_fields() {
            form = form.text(name, value);
        }
        let envelope: ApiEnvelope<DirectUploadReceipt> = self.http.post_form(&self.url("direct-upload"), form)?;
        envelope.into_data("direct-upload")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let client = MetafileClient::new(format!("{}/", DEFAULT_UPLOADER_URL), Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.url("multipart/initiate"),
            "https://file.metaid.io/metafile-uploader/api/v1/files/multipart/initiate"
        );
    }

    #[test]
    fn test_direct_upload_threshold() {
        assert!(!fits_direct_upload(0));
        assert!(fits_direct_upload(1));
        assert!(fits_direct_upload(5 * 1024 * 1024));
        assert!(!fits_direct_upload(5 * 1024 * 1024 + 1));
    }

    #[test]
    fn test_direct_upload_form() {
        let request = DirectUploadRequest {
            file_name: "cat.png".into(),
            content: vec![1, 2, 3],
            path: "/file".into(),
            operation: "create".into(),
            content_type: "image/png".into(),
            meta_id: "m".into(),
            address: "1Addr".into(),
            fee_rate: 1,
            pre_tx_hex: "0a00".into(),
            total_input_amount: 120_000,
        };
        let fields = request.form_fields();
        let get = |name: &str| fields.iter().find(|(k, _)| *k == name).map(|(_, v)| v.as_str());
        assert_eq!(get("contentType"), Some("image/png;binary"));
        assert_eq!(get("changeAddress"), Some("1Addr"));
        assert_eq!(get("totalInputAmount"), Some("120000"));
        assert_eq!(get("preTxHex"), Some("0a00"));
        assert_eq!(get("file"), None);

        let receipt: DirectUploadReceipt =
            serde_json::from_str(r#"{"txId":"ab","pinId":"abi0"}"#).unwrap();
        assert_eq!(receipt.pin_id, "abi0");
        assert!(receipt.status.is_empty());
    }

    #[test]
    fn test_binary_content_type() {
        assert_eq!(binary_content_type("image/png"), "image/png;binary");
        assert_eq!(binary_content_type("image/png;binary"), "image/png;binary");
    }

    #[test]
    fn test_estimate_shape() {
        let estimate: ChunkedEstimate =
            serde_json::from_str(r#"{"chunkPreTxFee":50000,"indexPreTxFee":70000,"chunkNumber":3}"#).unwrap();
        assert_eq!(estimate.chunk_pre_tx_fee, 50_000);
        assert_eq!(estimate.total_fee, 0);

        let task = TaskRequest {
            meta_id: "m".into(),
            address: "a".into(),
            file_name: "f.png".into(),
            path: "/file".into(),
            operation: "create".into(),
            content_type: "image/png;binary".into(),
            chain: "mvc".into(),
            fee_rate: 1,
            chunk_pre_tx_hex: "01".into(),
            index_pre_tx_hex: "02".into(),
            merge_tx_hex: "03".into(),
            storage_key: "k".into(),
        };
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["chunkPreTxHex"], "01");
        assert_eq!(json["storageKey"], "k");
    }
}
