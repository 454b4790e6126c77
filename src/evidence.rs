use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::timestamp;
use crate::chain;
use crate::error::ChainError;
use crate::redaction::RedactionPolicy;

/// 证据类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    Defamation,
    Deepfake,
    Violation,
    Other,
}

/// 严重程度，取值 1..=10。
/// 领域上保证是整数，所以规范化输出里它永远是整数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Severity(u8);

impl Severity {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    pub fn new(value: u8) -> Result<Self, ChainError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ChainError::SeverityOutOfRange(value))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Severity {
    type Error = ChainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Severity> for u8 {
    fn from(severity: Severity) -> Self {
        severity.0
    }
}

/// 合成媒体检测结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeepfakeVerdict {
    Authentic,
    Manipulated,
    Synthetic,
    Inconclusive,
}

/// 深度伪造分析注解
///
/// 来自外部检测服务 (异步任务)，可能晚于来源本身到达。
/// 它是可变注解：不参与 source_hash，但会进入 report.json。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeepfakeAnalysis {
    pub job_id: String,
    pub verdict: DeepfakeVerdict,
    /// 0.0 到 1.0，规范化输出固定 6 位小数
    pub confidence: f64,
    pub model: String,
    #[serde(with = "timestamp")]
    pub analyzed_at: DateTime<Utc>,
}

impl DeepfakeAnalysis {
    /// confidence 必须是 [0, 1] 内的有限值 (NaN 也会被拒绝)
    pub fn validate(&self) -> Result<(), ChainError> {
        if (0.0..=1.0).contains(&self.confidence) {
            Ok(())
        } else {
            Err(ChainError::ConfidenceOutOfRange(self.confidence))
        }
    }
}

/// 采集器交来的原始来源 (尚未计算哈希)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInput {
    pub id: String,
    pub platform: String,
    pub url: String,
    #[serde(with = "timestamp")]
    pub collected_at: DateTime<Utc>,
    pub raw_snippet: String,
    #[serde(default)]
    pub screenshot_ref: Option<String>,
}

/// source_hash 的原像：只包含不可变字段
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ImmutableSourceFields<'a> {
    pub platform: &'a str,
    pub url: &'a str,
    #[serde(serialize_with = "timestamp::serialize")]
    pub collected_at: DateTime<Utc>,
    pub raw_snippet: &'a str,
    pub screenshot_ref: Option<&'a str>,
}

/// 一条证据来源
///
/// `source_hash` 在创建时计算一次 (脱敏之前，基于原始字段)，之后不再重算。
/// 这样校验结果与展示层的脱敏策略无关。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSource {
    pub id: String,
    pub platform: String,
    pub url: String,
    #[serde(with = "timestamp")]
    pub collected_at: DateTime<Utc>,
    pub raw_snippet: String,
    pub redacted_snippet: String,
    #[serde(default)]
    pub screenshot_ref: Option<String>,
    #[serde(default)]
    pub deepfake_analysis: Option<DeepfakeAnalysis>,
    source_hash: String,
}

impl EvidenceSource {
    /// 创建来源：规范化时间戳、计算 source_hash、生成脱敏片段
    pub fn new(input: SourceInput, policy: RedactionPolicy) -> Result<Self, ChainError> {
        let collected_at = timestamp::normalize(input.collected_at);
        let source_hash = chain::hash_source(&ImmutableSourceFields {
            platform: &input.platform,
            url: &input.url,
            collected_at,
            raw_snippet: &input.raw_snippet,
            screenshot_ref: input.screenshot_ref.as_deref(),
        })?;

        Ok(Self {
            redacted_snippet: policy.apply(&input.raw_snippet),
            id: input.id,
            platform: input.platform,
            url: input.url,
            collected_at,
            raw_snippet: input.raw_snippet,
            screenshot_ref: input.screenshot_ref,
            deepfake_analysis: None,
            source_hash,
        })
    }

    /// 附加检测注解 (报告生成之前)
    pub fn with_deepfake_analysis(mut self, analysis: DeepfakeAnalysis) -> Self {
        self.deepfake_analysis = Some(analysis);
        self
    }

    /// 按新策略重新生成展示片段；source_hash 不变
    pub fn apply_redaction(&mut self, policy: RedactionPolicy) {
        self.redacted_snippet = policy.apply(&self.raw_snippet);
    }

    pub fn source_hash(&self) -> &str {
        &self.source_hash
    }

    pub fn immutable_fields(&self) -> ImmutableSourceFields<'_> {
        ImmutableSourceFields {
            platform: &self.platform,
            url: &self.url,
            collected_at: self.collected_at,
            raw_snippet: &self.raw_snippet,
            screenshot_ref: self.screenshot_ref.as_deref(),
        }
    }
}

/// 一条证据 (一个指控 + 支撑它的来源)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EvidenceType,
    pub severity: Severity,
    pub claim_text: String,
    /// 构建报告时按 (collected_at, id) 升序排列
    pub sources: Vec<EvidenceSource>,
}

impl EvidenceItem {
    pub fn new(
        id: impl Into<String>,
        kind: EvidenceType,
        severity: Severity,
        claim_text: impl Into<String>,
        sources: Vec<EvidenceSource>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            severity,
            claim_text: claim_text.into(),
            sources,
        }
    }
}

/// 报告的摘要字段 (由调用方提供，参与 report_hash)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub report_id: String,
    #[serde(with = "timestamp")]
    pub generated_at: DateTime<Utc>,
    pub executive_summary: String,
    #[serde(default)]
    pub pattern_analysis: Option<String>,
    #[serde(default)]
    pub potential_legal_violations: Vec<String>,
    #[serde(default)]
    pub recommended_next_steps: Vec<String>,
}

/// 证据报告
///
/// 只能由 [`chain::build_report`] 生成。`report_hash` 在生成时冻结，
/// 之后不允许原地修改；重新生成会得到新的报告。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceReport {
    pub(crate) report_id: String,
    #[serde(with = "timestamp")]
    pub(crate) generated_at: DateTime<Utc>,
    pub(crate) executive_summary: String,
    pub(crate) pattern_analysis: Option<String>,
    pub(crate) potential_legal_violations: Vec<String>,
    pub(crate) recommended_next_steps: Vec<String>,
    pub(crate) items: Vec<EvidenceItem>,
    /// 因缺少来源而被剔除的条目数，不参与 report_hash
    pub(crate) excluded_items: u32,
    pub(crate) report_hash: String,
    pub(crate) chain_valid: bool,
}

impl EvidenceReport {
    pub fn report_id(&self) -> &str {
        &self.report_id
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn executive_summary(&self) -> &str {
        &self.executive_summary
    }

    pub fn pattern_analysis(&self) -> Option<&str> {
        self.pattern_analysis.as_deref()
    }

    pub fn potential_legal_violations(&self) -> &[String] {
        &self.potential_legal_violations
    }

    pub fn recommended_next_steps(&self) -> &[String] {
        &self.recommended_next_steps
    }

    pub fn items(&self) -> &[EvidenceItem] {
        &self.items
    }

    pub fn excluded_items(&self) -> u32 {
        self.excluded_items
    }

    pub fn report_hash(&self) -> &str {
        &self.report_hash
    }

    pub fn chain_valid(&self) -> bool {
        self.chain_valid
    }

    /// 所有来源，按报告顺序展开
    pub fn sources(&self) -> impl Iterator<Item = (&EvidenceItem, &EvidenceSource)> {
        self.items
            .iter()
            .flat_map(|item| item.sources.iter().map(move |source| (item, source)))
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            report_id: self.report_id.clone(),
            generated_at: self.generated_at,
            executive_summary: self.executive_summary.clone(),
            pattern_analysis: self.pattern_analysis.clone(),
            potential_legal_violations: self.potential_legal_violations.clone(),
            recommended_next_steps: self.recommended_next_steps.clone(),
        }
    }
}
