//! 模块：证据包导出 (Package Exporter)
//!
//! 证据包是一个固定 5 个文件的 ZIP：
//!
//! ```text
//!   report.json      完整报告 (含 report_hash / chain_valid)
//!   sources.json     按报告顺序展开的来源列表
//!   provenance.json  导出审计信息
//!   manifest.json    { 上面三个文件名: SHA-256 }
//!   integrity.json   { packageHash: SHA256(manifest.json), reportHash }
//! ```
//!
//! manifest 不包含 integrity.json (它依赖 manifest 的哈希) 也不包含自己，
//! 这两者通过 packageHash 绑定。

use std::collections::BTreeMap;
use std::io::{Cursor, Write};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::canonical::{self, timestamp};
use crate::error::PackagingError;
use crate::evidence::{EvidenceReport, EvidenceSource};

pub const REPORT_FILE: &str = "report.json";
pub const SOURCES_FILE: &str = "sources.json";
pub const PROVENANCE_FILE: &str = "provenance.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const INTEGRITY_FILE: &str = "integrity.json";

/// 证据包必须且只能包含的文件
pub const REQUIRED_FILES: [&str; 5] = [
    REPORT_FILE,
    SOURCES_FILE,
    PROVENANCE_FILE,
    MANIFEST_FILE,
    INTEGRITY_FILE,
];

/// manifest 中登记哈希的文件 (按键排序)
pub const MANIFESTED_FILES: [&str; 3] = [PROVENANCE_FILE, REPORT_FILE, SOURCES_FILE];

/// 文件名 → SHA-256。BTreeMap 保证键有序。
pub type Manifest = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Integrity {
    pub package_hash: String,
    pub report_hash: String,
}

/// 导出审计信息。必须存在，但除文件级哈希外不做校验。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(with = "timestamp")]
    pub exported_at: DateTime<Utc>,
    pub exported_by: String,
    pub request_id: String,
    pub environment: String,
}

impl Provenance {
    pub fn new(
        exported_by: impl Into<String>,
        request_id: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            exported_at: timestamp::normalize(Utc::now()),
            exported_by: exported_by.into(),
            request_id: request_id.into(),
            environment: environment.into(),
        }
    }

    /// 为空 (或只有空白) 的必填字段
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("exported_by", &self.exported_by),
            ("request_id", &self.request_id),
            ("environment", &self.environment),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

#[derive(Serialize)]
struct SourceRecord<'a> {
    item_id: &'a str,
    #[serde(flatten)]
    source: &'a EvidenceSource,
}

/// 证据包中每个文件的字节 (尚未压缩)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFiles {
    pub report: Vec<u8>,
    pub sources: Vec<u8>,
    pub provenance: Vec<u8>,
    pub manifest: Vec<u8>,
    pub integrity: Vec<u8>,
    pub package_hash: String,
}

impl PackageFiles {
    /// 按文件名字典序排列，写入顺序固定
    pub fn entries(&self) -> [(&'static str, &[u8]); 5] {
        [
            (INTEGRITY_FILE, self.integrity.as_slice()),
            (MANIFEST_FILE, self.manifest.as_slice()),
            (PROVENANCE_FILE, self.provenance.as_slice()),
            (REPORT_FILE, self.report.as_slice()),
            (SOURCES_FILE, self.sources.as_slice()),
        ]
    }
}

/// 序列化 5 个文件并计算 manifest / packageHash
pub fn build_files(report: &EvidenceReport, provenance: &Provenance) -> Result<PackageFiles, PackagingError> {
    validate(report, provenance)?;

    let report_bytes = serialize(REPORT_FILE, report)?;
    let source_records: Vec<SourceRecord<'_>> = report
        .sources()
        .map(|(item, source)| SourceRecord { item_id: &item.id, source })
        .collect();
    let sources_bytes = serialize(SOURCES_FILE, &source_records)?;
    let provenance_bytes = serialize(PROVENANCE_FILE, provenance)?;

    let manifest: Manifest = [
        (PROVENANCE_FILE, &provenance_bytes),
        (REPORT_FILE, &report_bytes),
        (SOURCES_FILE, &sources_bytes),
    ]
    .into_iter()
    .map(|(name, bytes)| (name.to_string(), canonical::sha256_hex(bytes)))
    .collect();
    let manifest_bytes = serialize(MANIFEST_FILE, &manifest)?;
    let package_hash = canonical::sha256_hex(&manifest_bytes);

    let integrity = Integrity {
        package_hash: package_hash.clone(),
        report_hash: report.report_hash().to_string(),
    };
    let integrity_bytes = serialize(INTEGRITY_FILE, &integrity)?;

    Ok(PackageFiles {
        report: report_bytes,
        sources: sources_bytes,
        provenance: provenance_bytes,
        manifest: manifest_bytes,
        integrity: integrity_bytes,
        package_hash,
    })
}

/// 导出证据包 (ZIP 字节)。相同输入产生逐字节相同的输出；失败时不返回任何部分结果。
pub fn export_package(report: &EvidenceReport, provenance: &Provenance) -> Result<Vec<u8>, PackagingError> {
    let files = build_files(report, provenance)?;
    let archive = write_archive(&files.entries())?;

    tracing::info!(
        report_id = %report.report_id(),
        package_hash = %files.package_hash,
        bytes = archive.len(),
        "📦 证据包导出完成"
    );
    Ok(archive)
}

/// 以确定性方式写 ZIP：固定时间戳 1980-01-01、DEFLATE、0644、无注释。
/// 调用方负责条目顺序。
pub fn write_archive(entries: &[(&str, &[u8])]) -> Result<Vec<u8>, PackagingError> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in entries {
        zip.start_file(*name, options)?;
        zip.write_all(bytes)?;
    }
    Ok(zip.finish()?.into_inner())
}

fn validate(report: &EvidenceReport, provenance: &Provenance) -> Result<(), PackagingError> {
    if report.report_id().trim().is_empty() {
        return Err(PackagingError::MissingField("report_id"));
    }
    if report.executive_summary().trim().is_empty() {
        return Err(PackagingError::MissingField("executive_summary"));
    }
    if report.report_hash().is_empty() {
        return Err(PackagingError::MissingField("report_hash"));
    }
    if !canonical::is_sha256_hex(report.report_hash()) {
        return Err(PackagingError::InvalidReportHash(report.report_hash().to_string()));
    }
    match provenance.missing_fields().first().copied() {
        Some(field) => Err(PackagingError::MissingProvenanceField(field)),
        None => Ok(()),
    }
}

fn serialize<T: Serialize + ?Sized>(file: &'static str, value: &T) -> Result<Vec<u8>, PackagingError> {
    canonical::canonical_bytes(value).map_err(|source| PackagingError::Serialize { file, source })
}
