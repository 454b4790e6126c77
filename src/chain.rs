//! 模块：证据链构建 (Evidence Chain Builder)
//!
//! 哈希依赖关系：
//!
//! ```text
//!   source_hash = SHA256(canonical(platform, url, collected_at, raw_snippet, screenshot_ref))
//!   report_hash = SHA256(canonical(summary fields,
//!                                  [(item.id, item.type, item.severity, [source_hash...]) ...]))
//! ```
//!
//! report_hash 只依赖来源的哈希而不是全文，所以展示层的脱敏、晚到的检测注解
//! 都不会改变它。离线校验器无法重算这两层哈希，只有生产端 ([`audit_chain`]) 可以。

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::Serialize;

use crate::canonical::{self, timestamp, CANONICAL_VERSION};
use crate::error::{CanonicalError, ChainError, IncompleteEvidenceError};
use crate::evidence::{
    EvidenceItem, EvidenceReport, EvidenceSource, EvidenceType, ImmutableSourceFields, ReportSummary,
};

/// 计算来源哈希。只在 [`EvidenceSource::new`] 中调用一次。
pub fn hash_source(fields: &ImmutableSourceFields<'_>) -> Result<String, CanonicalError> {
    canonical::canonical_hash(fields)
}

/// 构建结果：报告本身 + 被剔除的不完整条目
#[derive(Debug, Clone)]
pub struct ChainBuild {
    pub report: EvidenceReport,
    pub incomplete: Vec<IncompleteEvidenceError>,
}

impl ChainBuild {
    pub fn excluded_count(&self) -> usize {
        self.incomplete.len()
    }
}

#[derive(Serialize)]
struct ReportHashPreimage<'a> {
    canonical: &'static str,
    report_id: &'a str,
    generated_at: String,
    executive_summary: &'a str,
    pattern_analysis: Option<&'a str>,
    potential_legal_violations: &'a [String],
    recommended_next_steps: &'a [String],
    items: Vec<(&'a str, EvidenceType, u8, Vec<&'a str>)>,
}

/// 构建报告
///
/// 1. 剔除没有来源的条目 (记录数量，不终止构建)；
/// 2. 来源按 (collected_at, id) 升序，条目按 (最早来源时间, id) 升序；
/// 3. 计算并冻结 report_hash，`chain_valid = true`。
pub fn build_report(items: Vec<EvidenceItem>, summary: ReportSummary) -> Result<ChainBuild, ChainError> {
    if summary.report_id.trim().is_empty() {
        return Err(ChainError::MissingSummaryField("report_id"));
    }
    if summary.executive_summary.trim().is_empty() {
        return Err(ChainError::MissingSummaryField("executive_summary"));
    }

    let mut seen = HashSet::new();
    for item in &items {
        if !seen.insert(item.id.as_str()) {
            return Err(ChainError::DuplicateItem(item.id.clone()));
        }
        // 同一条目内来源 id 唯一，否则排序结果依赖输入顺序
        let mut source_ids = HashSet::new();
        if let Some(dup) = item.sources.iter().find(|s| !source_ids.insert(s.id.as_str())) {
            return Err(ChainError::DuplicateSource {
                item_id: item.id.clone(),
                source_id: dup.id.clone(),
            });
        }
    }

    let mut incomplete = Vec::new();
    let mut kept = Vec::with_capacity(items.len());
    for mut item in items {
        if item.sources.is_empty() {
            tracing::warn!(item_id = %item.id, "⚠️ 证据条目缺少来源，已剔除");
            incomplete.push(IncompleteEvidenceError { item_id: item.id });
            continue;
        }
        item.sources.sort_by(source_order);
        kept.push(item);
    }
    kept.sort_by(item_order);

    let generated_at = timestamp::normalize(summary.generated_at);
    let report_hash = compute_report_hash(&summary, generated_at, &kept)?;

    let report = EvidenceReport {
        report_id: summary.report_id,
        generated_at,
        executive_summary: summary.executive_summary,
        pattern_analysis: summary.pattern_analysis,
        potential_legal_violations: summary.potential_legal_violations,
        recommended_next_steps: summary.recommended_next_steps,
        items: kept,
        excluded_items: u32::try_from(incomplete.len()).unwrap_or(u32::MAX),
        report_hash,
        chain_valid: true,
    };

    tracing::info!(
        report_id = %report.report_id,
        items = report.items.len(),
        excluded = incomplete.len(),
        report_hash = %report.report_hash,
        "🔗 证据链构建完成"
    );

    Ok(ChainBuild { report, incomplete })
}

fn source_order(a: &EvidenceSource, b: &EvidenceSource) -> Ordering {
    a.collected_at
        .cmp(&b.collected_at)
        .then_with(|| a.id.cmp(&b.id))
}

// 调用前来源已排序，sources[0] 即最早来源
fn item_order(a: &EvidenceItem, b: &EvidenceItem) -> Ordering {
    let earliest = |item: &EvidenceItem| item.sources.first().map(|s| s.collected_at);
    earliest(a)
        .cmp(&earliest(b))
        .then_with(|| a.id.cmp(&b.id))
}

fn compute_report_hash(
    summary: &ReportSummary,
    generated_at: chrono::DateTime<chrono::Utc>,
    items: &[EvidenceItem],
) -> Result<String, CanonicalError> {
    let preimage = ReportHashPreimage {
        canonical: CANONICAL_VERSION,
        report_id: &summary.report_id,
        generated_at: timestamp::format(&generated_at),
        executive_summary: &summary.executive_summary,
        pattern_analysis: summary.pattern_analysis.as_deref(),
        potential_legal_violations: &summary.potential_legal_violations,
        recommended_next_steps: &summary.recommended_next_steps,
        items: items
            .iter()
            .map(|item| {
                (
                    item.id.as_str(),
                    item.kind,
                    item.severity.get(),
                    item.sources.iter().map(EvidenceSource::source_hash).collect(),
                )
            })
            .collect(),
    };
    canonical::canonical_hash(&preimage)
}

/// 生产端复核发现的不一致
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainDivergence {
    SourceHash {
        item_id: String,
        source_id: String,
        recorded: String,
        recomputed: String,
    },
    SourceOrder {
        item_id: String,
    },
    ItemOrder,
    EmptyItem {
        item_id: String,
    },
    ReportHash {
        recorded: String,
        recomputed: String,
    },
}

/// 证据链复核结果
#[derive(Debug, Clone, Serialize)]
pub struct ChainAudit {
    pub report_id: String,
    pub recorded_chain_valid: bool,
    pub sources_checked: usize,
    pub divergences: Vec<ChainDivergence>,
}

impl ChainAudit {
    pub fn is_valid(&self) -> bool {
        self.divergences.is_empty()
    }
}

/// 生产端独立复核：从存储的字段重算每一个 source_hash 和 report_hash。
///
/// 这是唯一能真正验证 `chain_valid` 的地方，离线校验器做不到。
pub fn audit_chain(report: &EvidenceReport) -> Result<ChainAudit, CanonicalError> {
    let mut divergences = Vec::new();
    let mut sources_checked = 0;

    for item in &report.items {
        if item.sources.is_empty() {
            divergences.push(ChainDivergence::EmptyItem { item_id: item.id.clone() });
        }
        if item.sources.windows(2).any(|w| source_order(&w[0], &w[1]) == Ordering::Greater) {
            divergences.push(ChainDivergence::SourceOrder { item_id: item.id.clone() });
        }
        for source in &item.sources {
            sources_checked += 1;
            let recomputed = hash_source(&source.immutable_fields())?;
            if recomputed != source.source_hash() {
                divergences.push(ChainDivergence::SourceHash {
                    item_id: item.id.clone(),
                    source_id: source.id.clone(),
                    recorded: source.source_hash().to_string(),
                    recomputed,
                });
            }
        }
    }
    if report.items.windows(2).any(|w| item_order(&w[0], &w[1]) == Ordering::Greater) {
        divergences.push(ChainDivergence::ItemOrder);
    }

    let recomputed = compute_report_hash(&report.summary(), report.generated_at, &report.items)?;
    if recomputed != report.report_hash {
        divergences.push(ChainDivergence::ReportHash {
            recorded: report.report_hash.clone(),
            recomputed,
        });
    }

    if !divergences.is_empty() {
        tracing::warn!(report_id = %report.report_id, count = divergences.len(), "❌ 证据链复核发现不一致");
    }

    Ok(ChainAudit {
        report_id: report.report_id.clone(),
        recorded_chain_valid: report.chain_valid,
        sources_checked,
        divergences,
    })
}
