//! 证据包完整性链
//!
//! 生产端：[`chain`] 构建报告 → [`package`] 导出 5 文件证据包；
//! 消费端：[`verify`] 离线校验，[`client`] 拉取证据包 (失败时降级)。

pub mod api;
pub mod canonical;
pub mod chain;
pub mod client;
pub mod config;
pub mod error;
pub mod evidence;
pub mod package;
pub mod redaction;
pub mod store;
pub mod verify;

pub use chain::{audit_chain, build_report, hash_source, ChainAudit, ChainBuild};
pub use client::{BundleFetcher, DownloadOutcome, ExportClient, HttpBundleFetcher, RequestContext};
pub use error::{
    CanonicalError, ChainError, IncompleteEvidenceError, NetworkError, PackagingError, StoreError,
};
pub use evidence::{
    DeepfakeAnalysis, DeepfakeVerdict, EvidenceItem, EvidenceReport, EvidenceSource, EvidenceType,
    ReportSummary, Severity, SourceInput,
};
pub use package::{export_package, Integrity, Manifest, Provenance};
pub use verify::{verify, verify_path, CheckId, CheckStatus, Finding, VerificationReport, Verdict};
