//! 模块：离线校验器 (Package Verifier)
//!
//! 只使用证据包自身的字节：不联网、不共享密钥、不访问生产端。
//! 检查顺序固定 (报告顺序也固定)：
//!
//! 1. Structure      5 个必需文件齐全、没有多余或同名重复条目；失败则中止，其余步骤记为 skipped
//! 2. File hashes    重算 manifest 登记的每个文件
//! 3. Package hash   SHA256(manifest.json) 对比 integrity.json.packageHash
//! 4. Report hash    integrity.json.reportHash 对比 report.json.report_hash
//! 5. Provenance     四个字段存在且非空
//! 6. Evidence chain 回显 chain_valid (生产端自评，离线无法重算)
//!
//! 第 2–5 步互不依赖：前一步失败不影响后一步执行。

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use zip::read::read_zipfile_from_stream;
use zip::ZipArchive;

use crate::canonical;
use crate::package::{
    INTEGRITY_FILE, MANIFESTED_FILES, MANIFEST_FILE, PROVENANCE_FILE, REPORT_FILE, REQUIRED_FILES,
};

pub const VERIFIER: &str = concat!("verify_evidence_package ", env!("CARGO_PKG_VERSION"));

const PROVENANCE_FIELDS: [&str; 4] = ["exported_at", "exported_by", "request_id", "environment"];

const CHAIN_LIMITATION: &str = "chain_valid is the producer's self-assessment. Source and item \
hashes cannot be re-derived offline; this verifier checks file, package and report-level \
consistency only.";

/// 文本报告的内容宽度
const WIDTH: usize = 76;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckId {
    Structure,
    FileHashes,
    PackageHash,
    ReportHash,
    Provenance,
    EvidenceChain,
}

impl CheckId {
    pub const ORDER: [CheckId; 6] = [
        CheckId::Structure,
        CheckId::FileHashes,
        CheckId::PackageHash,
        CheckId::ReportHash,
        CheckId::Provenance,
        CheckId::EvidenceChain,
    ];

    pub fn title(self) -> &'static str {
        match self {
            CheckId::Structure => "Structure",
            CheckId::FileHashes => "File hashes",
            CheckId::PackageHash => "Package hash",
            CheckId::ReportHash => "Report hash",
            CheckId::Provenance => "Provenance",
            CheckId::EvidenceChain => "Evidence chain",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    Skipped,
    /// 仅提示，不影响结论
    Info,
}

impl CheckStatus {
    fn label(self) -> &'static str {
        match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Skipped => "SKIP",
            CheckStatus::Info => "INFO",
        }
    }
}

/// 一条具体问题。JSON 中保留完整哈希，文本中截断显示。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    MissingFile { file: String },
    UnexpectedFile { file: String },
    /// 同名条目出现多次 (中央目录只保留最后一个，解压工具的行为各不相同)
    DuplicateFile { file: String, copies: usize },
    /// 本地文件头与中央目录的条目数不一致
    EntryCountMismatch { local: usize, central: usize },
    HashMismatch { file: String, expected: String, actual: String },
    MissingManifestEntry { file: String },
    UnexpectedManifestEntry { file: String },
    ReportHashMismatch { integrity: String, report: String },
    MissingField { file: String, field: String },
    ProvenanceMissingField { field: String },
    Unreadable { file: String, reason: String },
}

impl Finding {
    pub fn describe(&self) -> String {
        match self {
            Finding::MissingFile { file } => format!("missing required file {file}"),
            Finding::UnexpectedFile { file } => format!("unexpected entry {file}"),
            Finding::DuplicateFile { file, copies } => format!("{file} appears {copies} times"),
            Finding::EntryCountMismatch { local, central } => {
                format!("{local} local entries but {central} in the central directory")
            }
            Finding::HashMismatch { file, expected, actual } => format!(
                "{file}: expected {} actual {}",
                short(expected),
                short(actual)
            ),
            Finding::MissingManifestEntry { file } => format!("{file}: not listed in {MANIFEST_FILE}"),
            Finding::UnexpectedManifestEntry { file } => {
                format!("{MANIFEST_FILE} lists unexpected file {file}")
            }
            Finding::ReportHashMismatch { integrity, report } => format!(
                "{INTEGRITY_FILE} reportHash {} != {REPORT_FILE} report_hash {}",
                short(integrity),
                short(report)
            ),
            Finding::MissingField { file, field } => format!("{file}: field `{field}` missing"),
            Finding::ProvenanceMissingField { field } => {
                format!("{PROVENANCE_FILE}: field `{field}` missing or empty")
            }
            Finding::Unreadable { file, reason } => format!("{file}: unreadable ({reason})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub check: CheckId,
    pub status: CheckStatus,
    pub summary: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
}

impl CheckResult {
    fn pass(check: CheckId, summary: impl Into<String>) -> Self {
        Self { check, status: CheckStatus::Pass, summary: summary.into(), findings: Vec::new() }
    }

    fn fail(check: CheckId, summary: impl Into<String>, findings: Vec<Finding>) -> Self {
        Self { check, status: CheckStatus::Fail, summary: summary.into(), findings }
    }

    fn info(check: CheckId, summary: impl Into<String>) -> Self {
        Self { check, status: CheckStatus::Info, summary: summary.into(), findings: Vec::new() }
    }

    fn skipped(check: CheckId) -> Self {
        Self {
            check,
            status: CheckStatus::Skipped,
            summary: "skipped: structure check failed".to_string(),
            findings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
    Error,
}

impl Verdict {
    /// 0 = PASS，1 = FAIL (结构完好但有检查失败)，2 = ERROR (无法读取或结构不全)
    pub fn exit_code(self) -> u8 {
        match self {
            Verdict::Pass => 0,
            Verdict::Fail => 1,
            Verdict::Error => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::Error => "ERROR",
        }
    }
}

/// 校验报告。不含任何墙上时间，对同一字节重复校验得到完全相同的结果。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub verifier: String,
    pub archive: Option<String>,
    pub verdict: Verdict,
    pub exit_code: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub report_id: Option<String>,
    pub package_hash: Option<String>,
    pub report_hash: Option<String>,
    pub chain_valid: Option<bool>,
    pub checks: Vec<CheckResult>,
    pub limitations: Vec<String>,
}

impl VerificationReport {
    fn new(verdict: Verdict, checks: Vec<CheckResult>) -> Self {
        Self {
            verifier: VERIFIER.to_string(),
            archive: None,
            verdict,
            exit_code: verdict.exit_code(),
            error: None,
            report_id: None,
            package_hash: None,
            report_hash: None,
            chain_valid: None,
            checks,
            limitations: vec![CHAIN_LIMITATION.to_string()],
        }
    }

    /// 结构检查失败：后续步骤全部 skipped
    fn aborted(structure: CheckResult, error: String) -> Self {
        let mut checks = vec![structure];
        checks.extend(CheckId::ORDER[1..].iter().map(|id| CheckResult::skipped(*id)));
        let mut report = Self::new(Verdict::Error, checks);
        report.error = Some(error);
        report
    }

    /// 不是 ZIP / 无法读取
    fn unreadable(reason: String) -> Self {
        let structure = CheckResult::fail(
            CheckId::Structure,
            "archive could not be read",
            vec![Finding::Unreadable { file: "<archive>".to_string(), reason: reason.clone() }],
        );
        Self::aborted(structure, reason)
    }

    pub fn check(&self, id: CheckId) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.check == id)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// 人类可读的方框报告
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        rule(&mut out, '╔', '╗');
        boxed(&mut out, "EVIDENCE PACKAGE VERIFICATION", 0);
        boxed(&mut out, &self.verifier, 0);
        rule(&mut out, '╠', '╣');
        if let Some(archive) = &self.archive {
            boxed(&mut out, &format!("Archive      : {archive}"), 15);
        }
        let unknown = || "-".to_string();
        boxed(&mut out, &format!("Report ID    : {}", self.report_id.clone().unwrap_or_else(unknown)), 15);
        boxed(
            &mut out,
            &format!("Report hash  : {}", self.report_hash.as_deref().map(short).unwrap_or_else(unknown)),
            15,
        );
        boxed(
            &mut out,
            &format!("Package hash : {}", self.package_hash.as_deref().map(short).unwrap_or_else(unknown)),
            15,
        );
        rule(&mut out, '╠', '╣');
        for (n, check) in self.checks.iter().enumerate() {
            boxed(
                &mut out,
                &format!(
                    "[{}] {}. {:<15} {}",
                    check.status.label(),
                    n + 1,
                    check.check.title(),
                    check.summary
                ),
                26,
            );
            for finding in &check.findings {
                boxed(&mut out, &format!("         - {}", finding.describe()), 11);
            }
        }
        rule(&mut out, '╠', '╣');
        boxed(
            &mut out,
            &format!("RESULT: {} (exit code {})", self.verdict.as_str(), self.exit_code),
            0,
        );
        if let Some(error) = &self.error {
            boxed(&mut out, &format!("Error: {error}"), 7);
        }
        for limitation in &self.limitations {
            boxed(&mut out, &format!("Note: {limitation}"), 6);
        }
        rule(&mut out, '╚', '╝');
        out
    }
}

/// 校验内存中的证据包
pub fn verify(bytes: &[u8]) -> VerificationReport {
    verify_reader(Cursor::new(bytes))
}

/// 校验磁盘上的证据包，按条目流式读取
pub fn verify_path(path: &Path) -> VerificationReport {
    let mut report = match File::open(path) {
        Ok(file) => verify_reader(BufReader::new(file)),
        Err(err) => VerificationReport::unreadable(format!("cannot open {}: {err}", path.display())),
    };
    report.archive = Some(path.display().to_string());
    report
}

pub fn verify_reader<R: Read + Seek>(mut reader: R) -> VerificationReport {
    let local = local_entry_names(&mut reader);
    if let Err(err) = reader.seek(SeekFrom::Start(0)) {
        return VerificationReport::unreadable(format!("cannot rewind archive: {err}"));
    }
    let archive = match ZipArchive::new(reader) {
        Ok(archive) => archive,
        Err(err) => {
            tracing::warn!(error = %err, "❌ 无法读取证据包");
            return VerificationReport::unreadable(format!("not a readable ZIP archive: {err}"));
        }
    };
    let mut bundle = Bundle { archive };

    let structure = check_structure(&bundle.names(), bundle.archive.len(), &local);
    if structure.status == CheckStatus::Fail {
        tracing::warn!("❌ 证据包结构不完整，终止后续检查");
        return VerificationReport::aborted(structure, "structure check failed".to_string());
    }

    let manifest = bundle.json::<BTreeMap<String, String>>(MANIFEST_FILE);
    let integrity = bundle.json::<IntegrityDoc>(INTEGRITY_FILE);
    let report = bundle.json::<ReportHeader>(REPORT_FILE);
    let provenance = bundle.json::<serde_json::Value>(PROVENANCE_FILE);

    let checks = vec![
        structure,
        check_file_hashes(&mut bundle, &manifest),
        check_package_hash(&mut bundle, &integrity),
        check_report_hash(&integrity, &report),
        check_provenance(&provenance),
        echo_chain(&report),
    ];

    let verdict = if checks.iter().any(|c| c.status == CheckStatus::Fail) {
        Verdict::Fail
    } else {
        Verdict::Pass
    };

    let mut out = VerificationReport::new(verdict, checks);
    if let Ok(header) = &report {
        out.report_id = header.report_id.clone();
        out.report_hash = header.report_hash.clone();
        out.chain_valid = header.chain_valid;
    }
    if let Ok(integrity) = &integrity {
        out.package_hash = integrity.package_hash.clone();
    }

    tracing::info!(verdict = verdict.as_str(), report_id = ?out.report_id, "🔍 证据包校验完成");
    out
}

#[derive(Deserialize)]
struct ReportHeader {
    report_id: Option<String>,
    report_hash: Option<String>,
    chain_valid: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntegrityDoc {
    package_hash: Option<String>,
    report_hash: Option<String>,
}

struct Bundle<R> {
    archive: ZipArchive<R>,
}

impl<R: Read + Seek> Bundle<R> {
    fn names(&self) -> BTreeSet<String> {
        self.archive.file_names().map(str::to_string).collect()
    }

    fn hash(&mut self, name: &str) -> Result<String, String> {
        let entry = self.archive.by_name(name).map_err(|e| e.to_string())?;
        canonical::sha256_reader(entry).map_err(|e| e.to_string())
    }

    fn json<T: DeserializeOwned>(&mut self, name: &str) -> Result<T, String> {
        let entry = self.archive.by_name(name).map_err(|e| e.to_string())?;
        serde_json::from_reader(BufReader::new(entry)).map_err(|e| e.to_string())
    }
}

/// 按本地文件头顺序读出全部条目名 (包括中央目录里被同名条目覆盖掉的那些)
fn local_entry_names<R: Read>(reader: &mut R) -> Result<Vec<String>, String> {
    let mut names = Vec::new();
    while let Some(entry) = read_zipfile_from_stream(reader).map_err(|e| e.to_string())? {
        names.push(entry.name().to_string());
    }
    Ok(names)
}

fn check_structure(
    names: &BTreeSet<String>,
    central: usize,
    local: &Result<Vec<String>, String>,
) -> CheckResult {
    let mut findings: Vec<Finding> = REQUIRED_FILES
        .iter()
        .filter(|file| !names.contains(**file))
        .map(|file| Finding::MissingFile { file: file.to_string() })
        .collect();

    let mut all_names = names.clone();
    let mut copies: BTreeMap<&str, usize> = BTreeMap::new();
    match local {
        Ok(local) => {
            for name in local {
                *copies.entry(name.as_str()).or_default() += 1;
                all_names.insert(name.clone());
            }
        }
        Err(reason) => findings.push(Finding::Unreadable {
            file: "<local headers>".to_string(),
            reason: reason.clone(),
        }),
    }
    findings.extend(
        all_names
            .iter()
            .filter(|name| !REQUIRED_FILES.contains(&name.as_str()))
            .map(|name| Finding::UnexpectedFile { file: name.clone() }),
    );
    findings.extend(
        copies
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(name, count)| Finding::DuplicateFile { file: name.to_string(), copies: *count }),
    );
    if let Ok(local) = local {
        if local.len() != central {
            findings.push(Finding::EntryCountMismatch { local: local.len(), central });
        }
    }

    if findings.is_empty() {
        CheckResult::pass(CheckId::Structure, format!("all {} required files present", REQUIRED_FILES.len()))
    } else {
        CheckResult::fail(CheckId::Structure, "bundle layout is invalid", findings)
    }
}

fn check_file_hashes<R: Read + Seek>(
    bundle: &mut Bundle<R>,
    manifest: &Result<BTreeMap<String, String>, String>,
) -> CheckResult {
    let manifest = match manifest {
        Ok(manifest) => manifest,
        Err(reason) => {
            return CheckResult::fail(
                CheckId::FileHashes,
                format!("{MANIFEST_FILE} could not be parsed"),
                vec![Finding::Unreadable { file: MANIFEST_FILE.to_string(), reason: reason.clone() }],
            )
        }
    };

    let mut findings = Vec::new();
    for file in MANIFESTED_FILES {
        let Some(expected) = manifest.get(file) else {
            findings.push(Finding::MissingManifestEntry { file: file.to_string() });
            continue;
        };
        match bundle.hash(file) {
            Ok(actual) if actual.eq_ignore_ascii_case(expected) => {}
            Ok(actual) => findings.push(Finding::HashMismatch {
                file: file.to_string(),
                expected: expected.clone(),
                actual,
            }),
            Err(reason) => findings.push(Finding::Unreadable { file: file.to_string(), reason }),
        }
    }
    findings.extend(
        manifest
            .keys()
            .filter(|name| !MANIFESTED_FILES.contains(&name.as_str()))
            .map(|name| Finding::UnexpectedManifestEntry { file: name.clone() }),
    );

    if findings.is_empty() {
        CheckResult::pass(
            CheckId::FileHashes,
            format!("{} files match {MANIFEST_FILE}", MANIFESTED_FILES.len()),
        )
    } else {
        CheckResult::fail(
            CheckId::FileHashes,
            format!("{} problem(s) against {MANIFEST_FILE}", findings.len()),
            findings,
        )
    }
}

fn check_package_hash<R: Read + Seek>(
    bundle: &mut Bundle<R>,
    integrity: &Result<IntegrityDoc, String>,
) -> CheckResult {
    let expected = match integrity {
        Ok(IntegrityDoc { package_hash: Some(hash), .. }) => hash,
        Ok(_) => {
            return CheckResult::fail(
                CheckId::PackageHash,
                "no packageHash recorded",
                vec![Finding::MissingField {
                    file: INTEGRITY_FILE.to_string(),
                    field: "packageHash".to_string(),
                }],
            )
        }
        Err(reason) => {
            return CheckResult::fail(
                CheckId::PackageHash,
                format!("{INTEGRITY_FILE} could not be parsed"),
                vec![Finding::Unreadable { file: INTEGRITY_FILE.to_string(), reason: reason.clone() }],
            )
        }
    };

    match bundle.hash(MANIFEST_FILE) {
        Ok(actual) if actual.eq_ignore_ascii_case(expected) => {
            CheckResult::pass(CheckId::PackageHash, format!("{MANIFEST_FILE} matches packageHash"))
        }
        Ok(actual) => CheckResult::fail(
            CheckId::PackageHash,
            format!("{MANIFEST_FILE} does not match packageHash"),
            vec![Finding::HashMismatch {
                file: MANIFEST_FILE.to_string(),
                expected: expected.clone(),
                actual,
            }],
        ),
        Err(reason) => CheckResult::fail(
            CheckId::PackageHash,
            format!("{MANIFEST_FILE} could not be read"),
            vec![Finding::Unreadable { file: MANIFEST_FILE.to_string(), reason }],
        ),
    }
}

fn check_report_hash(
    integrity: &Result<IntegrityDoc, String>,
    report: &Result<ReportHeader, String>,
) -> CheckResult {
    let mut findings = Vec::new();

    let recorded = match integrity {
        Ok(doc) => doc.report_hash.as_deref(),
        Err(reason) => {
            findings.push(Finding::Unreadable { file: INTEGRITY_FILE.to_string(), reason: reason.clone() });
            None
        }
    };
    let embedded = match report {
        Ok(header) => header.report_hash.as_deref(),
        Err(reason) => {
            findings.push(Finding::Unreadable { file: REPORT_FILE.to_string(), reason: reason.clone() });
            None
        }
    };
    if integrity.is_ok() && recorded.is_none() {
        findings.push(Finding::MissingField {
            file: INTEGRITY_FILE.to_string(),
            field: "reportHash".to_string(),
        });
    }
    if report.is_ok() && embedded.is_none() {
        findings.push(Finding::MissingField {
            file: REPORT_FILE.to_string(),
            field: "report_hash".to_string(),
        });
    }

    match (recorded, embedded) {
        (Some(a), Some(b)) if a.eq_ignore_ascii_case(b) => {
            CheckResult::pass(CheckId::ReportHash, format!("{INTEGRITY_FILE} and {REPORT_FILE} agree"))
        }
        (Some(a), Some(b)) => CheckResult::fail(
            CheckId::ReportHash,
            "reportHash differs between files",
            vec![Finding::ReportHashMismatch { integrity: a.to_string(), report: b.to_string() }],
        ),
        _ => CheckResult::fail(CheckId::ReportHash, "report hash cannot be cross-checked", findings),
    }
}

fn check_provenance(provenance: &Result<serde_json::Value, String>) -> CheckResult {
    let doc = match provenance {
        Ok(doc) => doc,
        Err(reason) => {
            return CheckResult::fail(
                CheckId::Provenance,
                format!("{PROVENANCE_FILE} could not be parsed"),
                vec![Finding::Unreadable { file: PROVENANCE_FILE.to_string(), reason: reason.clone() }],
            )
        }
    };

    let findings: Vec<Finding> = PROVENANCE_FIELDS
        .iter()
        .filter(|field| {
            !matches!(doc.get(**field), Some(serde_json::Value::String(s)) if !s.trim().is_empty())
        })
        .map(|field| Finding::ProvenanceMissingField { field: field.to_string() })
        .collect();

    if findings.is_empty() {
        CheckResult::pass(CheckId::Provenance, format!("all {} fields present", PROVENANCE_FIELDS.len()))
    } else {
        CheckResult::fail(
            CheckId::Provenance,
            format!("{} required field(s) missing", findings.len()),
            findings,
        )
    }
}

fn echo_chain(report: &Result<ReportHeader, String>) -> CheckResult {
    let recorded = report.as_ref().ok().and_then(|header| header.chain_valid);
    match recorded {
        Some(flag) => CheckResult::info(
            CheckId::EvidenceChain,
            format!("producer recorded chain_valid = {flag} (self-assessment, not re-derived)"),
        ),
        None => CheckResult::info(CheckId::EvidenceChain, format!("chain_valid not recorded in {REPORT_FILE}")),
    }
}

/// 截断哈希用于显示
fn short(hash: &str) -> String {
    if hash.chars().count() > 16 {
        let head: String = hash.chars().take(16).collect();
        format!("{head}…")
    } else {
        hash.to_string()
    }
}

fn rule(out: &mut String, left: char, right: char) {
    out.push(left);
    out.push_str(&"═".repeat(WIDTH + 2));
    out.push(right);
    out.push('\n');
}

/// 写入一行 (过长时按词折行，续行缩进 `indent`)
fn boxed(out: &mut String, text: &str, indent: usize) {
    for line in wrap(text, indent) {
        let pad = WIDTH.saturating_sub(line.chars().count());
        out.push_str("║ ");
        out.push_str(&line);
        out.push_str(&" ".repeat(pad));
        out.push_str(" ║\n");
    }
}

fn wrap(text: &str, indent: usize) -> Vec<String> {
    let indent = " ".repeat(indent.min(WIDTH / 2));
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut has_word = false;
    for (i, word) in text.split(' ').enumerate() {
        let needed = current.chars().count() + usize::from(i > 0) + word.chars().count();
        if has_word && !word.is_empty() && needed > WIDTH {
            lines.push(std::mem::take(&mut current));
            current.push_str(&indent);
        } else if i > 0 {
            current.push(' ');
        }
        current.push_str(word);
        has_word |= !word.is_empty();
        // 单个超长词直接截断
        if current.chars().count() > WIDTH {
            current = current.chars().take(WIDTH - 1).collect::<String>() + "…";
        }
    }
    lines.push(current);
    lines
}
