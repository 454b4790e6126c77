//! 错误类型
//!
//! 生产端 (构建 / 导出 / 存储) 与客户端的错误都在这里定义。
//! 校验器不使用这些错误：它把每一个问题记录为报告里的 `Finding`，永远输出完整报告。

use std::time::Duration;
use thiserror::Error;

/// 规范化序列化失败
#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("number `{0}` cannot be represented canonically")]
    UnsupportedNumber(String),
}

/// 证据链构建失败 (整个构建终止)
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("severity {0} is outside the allowed range 1..=10")]
    SeverityOutOfRange(u8),

    #[error("required summary field `{0}` is missing or empty")]
    MissingSummaryField(&'static str),

    #[error("evidence item id `{0}` appears more than once")]
    DuplicateItem(String),

    #[error("source id `{source_id}` appears more than once in item `{item_id}`")]
    DuplicateSource { item_id: String, source_id: String },

    #[error("deepfake confidence {0} is outside the allowed range 0..=1")]
    ConfidenceOutOfRange(f64),

    #[error("hashing failed: {0}")]
    Canonical(#[from] CanonicalError),
}

/// 没有来源的证据条目。可恢复：条目被剔除，构建继续。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("evidence item `{item_id}` has no sources and was excluded from the report")]
pub struct IncompleteEvidenceError {
    pub item_id: String,
}

/// 导出失败。一次导出尝试整体失败，不会返回半成品压缩包。
#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("required field `{0}` is missing or empty")]
    MissingField(&'static str),

    #[error("provenance field `{0}` is missing or empty")]
    MissingProvenanceField(&'static str),

    #[error("report hash `{0}` is not a SHA-256 hex digest")]
    InvalidReportHash(String),

    #[error("failed to serialize {file}: {source}")]
    Serialize {
        file: &'static str,
        #[source]
        source: CanonicalError,
    },

    #[error("failed to write archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("I/O error while packaging: {0}")]
    Io(#[from] std::io::Error),
}

/// 报告仓库错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("stored report could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("report `{0}` already exists; reports are never overwritten")]
    AlreadyExists(String),
}

/// 拉取证据包时的网络错误。客户端在本地降级处理，不会作为硬失败抛给调用方。
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("invalid export endpoint `{0}`")]
    InvalidEndpoint(String),

    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("producer answered HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },
}
