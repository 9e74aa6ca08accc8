//! MetaID records
//!
//! A record is one protocol entry (`init`, `create`, `modify`, `revoke`).
//! Records are normalized once on entry: the path is lowercased and
//! `modify`/`revoke` must name their target as `@<pinId>/protocols/<name>`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{EngineError, EngineResult};
use crate::types::Receiver;

pub const PROTOCOL_MARKER: &str = "metaid";

// =============================================================================
// Operation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Init,
    Create,
    Modify,
    Revoke,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Init => "init",
            Operation::Create => "create",
            Operation::Modify => "modify",
            Operation::Revoke => "revoke",
        }
    }

    /// Operations that act on an existing pin
    pub fn targets_existing(&self) -> bool {
        matches!(self, Operation::Modify | Operation::Revoke)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "init" => Ok(Operation::Init),
            "create" => Ok(Operation::Create),
            "modify" => Ok(Operation::Modify),
            "revoke" => Ok(Operation::Revoke),
            other => Err(EngineError::invalid_input(format!("Unknown operation '{}'", other))),
        }
    }
}

// =============================================================================
// Body encoding
// =============================================================================

/// How the textual `body` field maps to bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    Utf8,
    Hex,
    Base64,
}

// =============================================================================
// Record
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaidRecord {
    pub operation: Option<Operation>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub encryption: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    /// Defaults to hex for `*binary` content types, utf-8 otherwise
    #[serde(default)]
    pub encoding: Option<BodyEncoding>,
    /// Inscription destination on DOGE; the wallet address when absent
    #[serde(default)]
    pub reveal_address: Option<String>,
}

impl MetaidRecord {
    pub fn new(operation: Operation, path: impl Into<String>) -> Self {
        Self {
            operation: Some(operation),
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn operation(&self) -> Operation {
        self.operation.unwrap_or(Operation::Create)
    }

    /// Lowercase the path and check that targeted operations name their pin
    pub fn normalized(&self) -> EngineResult<Self> {
        let mut record = self.clone();
        record.operation = Some(self.operation());
        if let Some(ref path) = record.path {
            record.path = Some(path.trim().to_lowercase());
        }

        let op = record.operation();
        if op.targets_existing() {
            let path = record.path.as_deref().unwrap_or("");
            if !is_targeted_path(path) {
                return Err(EngineError::invalid_operation_path(format!(
                    "Operation \"{}\" requires the target pin id in the path, e.g. \"@<pinId>/protocols/simplenote\"",
                    op
                ))
                .with_details(path.to_string()));
            }
        }
        Ok(record)
    }

    pub fn is_binary(&self) -> bool {
        self.body_encoding() != BodyEncoding::Utf8
    }

    pub fn body_encoding(&self) -> BodyEncoding {
        match self.encoding {
            Some(encoding) => encoding,
            None if self
                .content_type
                .as_deref()
                .map(|ct| ct.trim().to_ascii_lowercase().ends_with("binary"))
                .unwrap_or(false) =>
            {
                BodyEncoding::Hex
            }
            None => BodyEncoding::Utf8,
        }
    }

    /// Body as it goes on chain; empty when absent
    pub fn body_bytes(&self) -> EngineResult<Vec<u8>> {
        let body = match self.body {
            Some(ref body) => body,
            None => return Ok(Vec::new()),
        };
        match self.body_encoding() {
            BodyEncoding::Utf8 => Ok(body.as_bytes().to_vec()),
            BodyEncoding::Hex => Ok(hex::decode(body.trim())?),
            BodyEncoding::Base64 => BASE64
                .decode(body.trim())
                .map_err(|e| EngineError::invalid_input(format!("Body is not valid base64: {}", e))),
        }
    }

    /// MVC OP_RETURN pushes: marker, operation, path, encryption, version,
    /// content type, body. `init` carries only marker and operation.
    pub fn data_carrier_fields(&self) -> EngineResult<Vec<Vec<u8>>> {
        let op = self.operation();
        let mut fields = vec![PROTOCOL_MARKER.as_bytes().to_vec(), op.as_str().as_bytes().to_vec()];
        if op == Operation::Init {
            return Ok(fields);
        }
        fields.push(self.path.clone().unwrap_or_default().into_bytes());
        fields.push(or_default(&self.encryption, "0"));
        fields.push(or_default(&self.version, "1.0.0"));
        fields.push(or_default(&self.content_type, "text/plain;utf-8"));
        fields.push(self.body_bytes()?);
        Ok(fields)
    }

    /// DOGE inscription header pushes: marker, operation, content type,
    /// encryption, version, path. Body chunks follow.
    pub fn inscription_header(&self) -> Vec<Vec<u8>> {
        vec![
            PROTOCOL_MARKER.as_bytes().to_vec(),
            self.operation().as_str().as_bytes().to_vec(),
            or_default(&self.content_type, "text/plain"),
            or_default(&self.encryption, "0"),
            or_default(&self.version, "0.0.1"),
            self.path.clone().unwrap_or_default().into_bytes(),
        ]
    }
}

fn or_default(value: &Option<String>, default: &str) -> Vec<u8> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => v.as_bytes().to_vec(),
        _ => default.as_bytes().to_vec(),
    }
}

/// `@<pinId>/protocols/<name>...`
pub fn is_targeted_path(path: &str) -> bool {
    let rest = match path.strip_prefix('@') {
        Some(rest) => rest,
        None => return false,
    };
    let mut parts = rest.splitn(3, '/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(id), Some("protocols"), Some(name)) => !id.is_empty() && !name.is_empty() && !name.starts_with('/'),
        _ => false,
    }
}

// =============================================================================
// Batch entries
// =============================================================================

/// Extra outputs and cross-references for one record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PinOptions {
    /// Additional payments carried by the same transaction
    #[serde(default)]
    pub outputs: Vec<Receiver>,
    /// Service fee paid to the indexer
    #[serde(default)]
    pub service: Option<Receiver>,
    /// Placeholder text in the body → index of an earlier record in the batch
    #[serde(default)]
    pub refs: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinDetail {
    pub metaid_data: MetaidRecord,
    #[serde(default)]
    pub options: PinOptions,
}

impl PinDetail {
    pub fn new(record: MetaidRecord) -> Self {
        Self {
            metaid_data: record,
            options: PinOptions::default(),
        }
    }
}

/// Replace each placeholder with the id of the draft it points at.
/// Placeholders pointing past the ids known so far are left alone.
pub fn replace_refs(body: &str, refs: &BTreeMap<String, usize>, ids: &[String]) -> String {
    let mut out = body.to_string();
    for (placeholder, index) in refs {
        if placeholder.is_empty() {
            continue;
        }
        if let Some(id) = ids.get(*index) {
            out = out.replace(placeholder.as_str(), id);
        }
    }
    out
}

/// Pin id of output 0 of `txid`
pub fn pin_id(txid: &str) -> String {
    format!("{}i0", txid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_targeted_paths() {
        assert!(is_targeted_path("@abc123/protocols/x"));
        assert!(is_targeted_path("@abc123i0/protocols/simplenote/extra"));
        assert!(!is_targeted_path("/protocols/x"));
        assert!(!is_targeted_path("@/protocols/x"));
        assert!(!is_targeted_path("@abc/protocol/x"));
        assert!(!is_targeted_path("@abc/protocols/"));
    }

    #[test]
    fn test_modify_requires_target() {
        let err = MetaidRecord::new(Operation::Modify, "/protocols/x").normalized().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidOperationPath);

        let err = MetaidRecord::new(Operation::Revoke, "/info/name").normalized().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidOperationPath);

        let ok = MetaidRecord::new(Operation::Modify, "@ABC123/Protocols/X").normalized().unwrap();
        assert_eq!(ok.path.as_deref(), Some("@abc123/protocols/x"));
    }

    #[test]
    fn test_data_carrier_defaults() {
        let record = MetaidRecord::new(Operation::Create, "/protocols/simplebuzz").with_body("hi");
        let fields = record.data_carrier_fields().unwrap();
        let text: Vec<String> = fields.iter().map(|f| String::from_utf8_lossy(f).into_owned()).collect();
        assert_eq!(
            text,
            vec!["metaid", "create", "/protocols/simplebuzz", "0", "1.0.0", "text/plain;utf-8", "hi"]
        );

        let init = MetaidRecord {
            operation: Some(Operation::Init),
            ..MetaidRecord::default()
        };
        assert_eq!(init.data_carrier_fields().unwrap().len(), 2);
    }

    #[test]
    fn test_absent_body_is_empty_push() {
        let record = MetaidRecord::new(Operation::Create, "/info/name");
        assert_eq!(record.data_carrier_fields().unwrap()[6], Vec::<u8>::new());
    }

    #[test]
    fn test_binary_body() {
        let record = MetaidRecord::new(Operation::Create, "/file")
            .with_content_type("image/png;binary")
            .with_body("89504e47");
        assert!(record.is_binary());
        assert_eq!(record.body_bytes().unwrap(), vec![0x89, 0x50, 0x4e, 0x47]);

        let bad = record.clone().with_body("zz");
        assert!(bad.body_bytes().is_err());
    }

    #[test]
    fn test_replace_refs() {
        let mut refs = BTreeMap::new();
        refs.insert("{{0}}".to_string(), 0);
        refs.insert("{{5}}".to_string(), 5);
        let out = replace_refs("see {{0}} and {{0}}, not {{5}}", &refs, &["aaaa".to_string()]);
        assert_eq!(out, "see aaaa and aaaa, not {{5}}");
    }

    #[test]
    fn test_detail_json() {
        let detail: PinDetail = serde_json::from_str(
            r#"{"metaidData":{"operation":"create","path":"/protocols/simplebuzz","body":"x","contentType":"application/json"},
               "options":{"service":{"address":"1abc","amount":1999},"refs":{"$ref0":0}}}"#,
        )
        .unwrap();
        assert_eq!(detail.metaid_data.operation(), Operation::Create);
        assert_eq!(detail.options.service.unwrap().amount, 1999);
        assert_eq!(detail.options.refs["$ref0"], 0);
    }
}
