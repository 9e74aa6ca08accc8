//! Resumable chunked upload
//!
//! The upload runs initiate → parts → complete → estimate → sign → submit.
//! Progress lives in `UploadSaga`, which is serde-persistable: after a crash
//! the saved JSON is loaded and `run` continues from the last finished step.
//! Parts already acknowledged are never sent again.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{EngineError, EngineResult};
use crate::tx::SIGHASH_NONE_ANYONECANPAY_FORKID;
use crate::utils::sha256_hex;
use crate::{log_debug, log_info};

use super::api::{
    binary_content_type, ChunkedEstimate, CompleteRequest, EstimateRequest, InitiateRequest, MetafileApi,
    MultipartUpload, TaskReceipt, TaskRequest, UploadPartRequest, UploadedPart, MULTIPART_CHUNK_SIZE,
};
use super::cosigner::CoSignedUpload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaState {
    New,
    Initiated,
    PartsUploaded,
    Completed,
    Estimated,
    Signed,
    Submitted,
}

fn default_pre_tx_sighash() -> u32 {
    SIGHASH_NONE_ANYONECANPAY_FORKID
}

/// What is being uploaded, fixed when the saga starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDescriptor {
    pub file_name: String,
    pub file_size: u64,
    pub content_sha256: String,
    pub path: String,
    pub content_type: String,
    pub address: String,
    pub meta_id: String,
    pub fee_rate: u64,
    #[serde(default = "default_pre_tx_sighash")]
    pub pre_tx_sighash: u32,
}

impl UploadDescriptor {
    pub fn new(
        file_name: impl Into<String>,
        content: &[u8],
        path: impl Into<String>,
        content_type: impl Into<String>,
        address: impl Into<String>,
        fee_rate: u64,
    ) -> EngineResult<Self> {
        if content.is_empty() {
            return Err(EngineError::invalid_input("Cannot upload an empty file"));
        }
        let address = address.into();
        Ok(Self {
            file_name: file_name.into(),
            file_size: content.len() as u64,
            content_sha256: sha256_hex(content),
            path: path.into(),
            content_type: content_type.into(),
            meta_id: sha256_hex(address.as_bytes()),
            address,
            fee_rate: fee_rate.max(1),
            pre_tx_sighash: default_pre_tx_sighash(),
        })
    }

    pub fn part_count(&self) -> u32 {
        self.file_size.div_ceil(MULTIPART_CHUNK_SIZE as u64) as u32
    }
}

/// Builds and re-checks the co-signed funding for the saga
pub trait UploadFunder {
    fn cosign(&self, descriptor: &UploadDescriptor, estimate: &ChunkedEstimate) -> EngineResult<CoSignedUpload>;

    /// Called right before submission; fails if the funding was spent elsewhere
    fn verify(&self, descriptor: &UploadDescriptor, signed: &CoSignedUpload) -> EngineResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSaga {
    pub descriptor: UploadDescriptor,
    pub state: SagaState,
    #[serde(default)]
    pub upload: Option<MultipartUpload>,
    #[serde(default)]
    pub parts: Vec<UploadedPart>,
    #[serde(default)]
    pub storage_key: Option<String>,
    #[serde(default)]
    pub estimate: Option<ChunkedEstimate>,
    #[serde(default)]
    pub signed: Option<CoSignedUpload>,
    #[serde(default)]
    pub receipt: Option<TaskReceipt>,
}

impl UploadSaga {
    pub fn new(descriptor: UploadDescriptor) -> Self {
        Self {
            descriptor,
            state: SagaState::New,
            upload: None,
            parts: Vec::new(),
            storage_key: None,
            estimate: None,
            signed: None,
            receipt: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == SagaState::Submitted
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, self.to_json()?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    fn check_content(&self, content: &[u8]) -> EngineResult<()> {
        if content.len() as u64 != self.descriptor.file_size {
            return Err(EngineError::invalid_input(format!(
                "File is {} bytes but the upload was started with {}",
                content.len(),
                self.descriptor.file_size
            )));
        }
        if sha256_hex(content) != self.descriptor.content_sha256 {
            return Err(EngineError::invalid_input("File content does not match the saved upload"));
        }
        Ok(())
    }

    fn multipart(&self) -> EngineResult<&MultipartUpload> {
        self.upload
            .as_ref()
            .ok_or_else(|| EngineError::internal("Upload state has no multipart session"))
    }

    /// Advance one step. Uploading parts takes one step per part.
    /// `content` must be the file the saga was started with.
    pub fn step(&mut self, api: &dyn MetafileApi, content: &[u8], funder: &dyn UploadFunder) -> EngineResult<SagaState> {
        self.check_content(content)?;
        self.advance(api, content, funder)
    }

    fn advance(&mut self, api: &dyn MetafileApi, content: &[u8], funder: &dyn UploadFunder) -> EngineResult<SagaState> {
        let d = &self.descriptor;
        match self.state {
            SagaState::New => {
                let upload = api.initiate(&InitiateRequest {
                    file_name: d.file_name.clone(),
                    file_size: d.file_size,
                    meta_id: d.meta_id.clone(),
                    address: d.address.clone(),
                })?;
                log_debug!("chunked", "Multipart upload initiated", key = upload.key, parts = d.part_count());
                self.upload = Some(upload);
                self.state = SagaState::Initiated;
            }
            SagaState::Initiated => {
                let next = self.parts.len() as u32 + 1;
                if next > d.part_count() {
                    self.state = SagaState::PartsUploaded;
                    return Ok(self.state);
                }
                let start = (next as usize - 1) * MULTIPART_CHUNK_SIZE;
                let end = (start + MULTIPART_CHUNK_SIZE).min(content.len());
                let bytes = &content[start..end];
                let upload = self.multipart()?;
                let etag = api.upload_part(&UploadPartRequest {
                    upload_id: upload.upload_id.clone(),
                    key: upload.key.clone(),
                    part_number: next,
                    content: BASE64.encode(bytes),
                })?;
                self.parts.push(UploadedPart {
                    part_number: next,
                    etag,
                    size: bytes.len() as u64,
                });
                if next == d.part_count() {
                    self.state = SagaState::PartsUploaded;
                }
            }
            SagaState::PartsUploaded => {
                let upload = self.multipart()?;
                let key = api.complete(&CompleteRequest {
                    upload_id: upload.upload_id.clone(),
                    key: upload.key.clone(),
                    parts: self.parts.clone(),
                })?;
                self.storage_key = Some(key);
                self.state = SagaState::Completed;
            }
            SagaState::Completed => {
                let storage_key = self.storage_key.clone().unwrap_or_default();
                let estimate = api.estimate(&EstimateRequest {
                    file_name: d.file_name.clone(),
                    path: d.path.clone(),
                    content_type: binary_content_type(&d.content_type),
                    chain: "mvc".into(),
                    fee_rate: d.fee_rate,
                    storage_key,
                })?;
                self.estimate = Some(estimate);
                self.state = SagaState::Estimated;
            }
            SagaState::Estimated => {
                let estimate = self
                    .estimate
                    .as_ref()
                    .ok_or_else(|| EngineError::internal("Upload state has no estimate"))?;
                self.signed = Some(funder.cosign(d, estimate)?);
                self.state = SagaState::Signed;
            }
            SagaState::Signed => {
                let signed = self
                    .signed
                    .as_ref()
                    .ok_or_else(|| EngineError::internal("Upload state has no signed funding"))?;
                funder.verify(d, signed)?;
                let receipt = api.submit_task(&TaskRequest {
                    meta_id: d.meta_id.clone(),
                    address: d.address.clone(),
                    file_name: d.file_name.clone(),
                    path: d.path.clone(),
                    operation: "create".into(),
                    content_type: binary_content_type(&d.content_type),
                    chain: "mvc".into(),
                    fee_rate: d.fee_rate,
                    chunk_pre_tx_hex: signed.chunk_pre_tx.raw_hex.clone(),
                    index_pre_tx_hex: signed.index_pre_tx.raw_hex.clone(),
                    merge_tx_hex: signed.merge_tx.raw_hex.clone(),
                    storage_key: self.storage_key.clone().unwrap_or_default(),
                })?;
                log_info!("chunked", "Upload task submitted", task_id = receipt.task_id, status = receipt.status);
                self.receipt = Some(receipt);
                self.state = SagaState::Submitted;
            }
            SagaState::Submitted => {}
        }
        Ok(self.state)
    }

    /// Run to completion, handing every new state to `persist`
    pub fn run(
        &mut self,
        api: &dyn MetafileApi,
        content: &[u8],
        funder: &dyn UploadFunder,
        persist: &mut dyn FnMut(&UploadSaga) -> EngineResult<()>,
    ) -> EngineResult<TaskReceipt> {
        // Hashed once per run; a resumed run checks again before sending anything
        self.check_content(content)?;
        while !self.is_finished() {
            self.advance(api, content, funder)?;
            persist(self)?;
        }
        self.receipt
            .clone()
            .ok_or_else(|| EngineError::internal("Finished upload has no receipt"))
    }
}
