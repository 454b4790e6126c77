#![allow(dead_code)]

use std::io::{Cursor, Read};

use chrono::{TimeZone, Utc};
use evidence_integrity::canonical::{canonical_bytes, sha256_hex};
use evidence_integrity::package::{
    write_archive, Integrity, Manifest, INTEGRITY_FILE, MANIFEST_FILE, PROVENANCE_FILE, REPORT_FILE,
    SOURCES_FILE,
};
use evidence_integrity::redaction::RedactionPolicy;
use evidence_integrity::{
    build_report, DeepfakeAnalysis, DeepfakeVerdict, EvidenceItem, EvidenceReport, EvidenceSource,
    EvidenceType, Provenance, ReportSummary, Severity, SourceInput,
};
use zip::ZipArchive;

pub fn source(id: &str, day: u32, snippet: &str) -> EvidenceSource {
    EvidenceSource::new(
        SourceInput {
            id: id.to_string(),
            platform: "social".to_string(),
            url: format!("https://social.example/p/{id}"),
            collected_at: Utc.with_ymd_and_hms(2024, 6, day, 9, 15, 0).unwrap(),
            raw_snippet: snippet.to_string(),
            screenshot_ref: Some(format!("screens/{id}.png")),
        },
        RedactionPolicy::Standard,
    )
    .unwrap()
}

pub fn sample_report() -> EvidenceReport {
    let deepfake = source("s-video", 3, "CEO \"announces\" recall, contact @recall_help")
        .with_deepfake_analysis(DeepfakeAnalysis {
            job_id: "df-100".to_string(),
            verdict: DeepfakeVerdict::Synthetic,
            confidence: 0.974,
            model: "detector-v3".to_string(),
            analyzed_at: Utc.with_ymd_and_hms(2024, 6, 4, 0, 0, 0).unwrap(),
        });

    let items = vec![
        EvidenceItem::new(
            "item-defamation",
            EvidenceType::Defamation,
            Severity::new(7).unwrap(),
            "Posts claim the product caused injuries",
            vec![
                source("s-2", 2, "this brand hurt my kid, email me at angry@parent.example"),
                source("s-1", 1, "avoid this brand, they poison people"),
            ],
        ),
        EvidenceItem::new(
            "item-deepfake",
            EvidenceType::Deepfake,
            Severity::new(9).unwrap(),
            "Synthetic video of the CEO announcing a recall",
            vec![deepfake],
        ),
        EvidenceItem::new("item-empty", EvidenceType::Other, Severity::new(2).unwrap(), "no sources yet", vec![]),
    ];

    let summary = ReportSummary {
        report_id: "rep-2024-06".to_string(),
        generated_at: Utc.with_ymd_and_hms(2024, 6, 5, 12, 0, 0).unwrap(),
        executive_summary: "Coordinated defamation and a synthetic recall video".to_string(),
        pattern_analysis: Some("Same accounts amplify both narratives".to_string()),
        potential_legal_violations: vec!["defamation".to_string(), "impersonation".to_string()],
        recommended_next_steps: vec!["preserve evidence".to_string(), "notify platform".to_string()],
    };

    build_report(items, summary).unwrap().report
}

pub fn provenance() -> Provenance {
    Provenance {
        exported_at: Utc.with_ymd_and_hms(2024, 6, 5, 12, 30, 0).unwrap(),
        exported_by: "analyst@brand.example".to_string(),
        request_id: "req-0001".to_string(),
        environment: "test".to_string(),
    }
}

/// 解出证据包中的全部条目 (保持原顺序)
pub fn read_entries(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).unwrap();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            (entry.name().to_string(), data)
        })
        .collect()
}

pub fn entry<'a>(entries: &'a [(String, Vec<u8>)], name: &str) -> &'a [u8] {
    &entries.iter().find(|(n, _)| n == name).unwrap().1
}

pub fn replace(entries: &mut [(String, Vec<u8>)], name: &str, data: Vec<u8>) {
    entries.iter_mut().find(|(n, _)| n == name).unwrap().1 = data;
}

pub fn rezip(entries: &[(String, Vec<u8>)]) -> Vec<u8> {
    let refs: Vec<(&str, &[u8])> = entries.iter().map(|(n, d)| (n.as_str(), d.as_slice())).collect();
    write_archive(&refs).unwrap()
}

/// 重新计算 manifest / integrity，使包在文件层面自洽 (reportHash 保持不变)
pub fn reseal(entries: &mut [(String, Vec<u8>)]) {
    let manifest: Manifest = [PROVENANCE_FILE, REPORT_FILE, SOURCES_FILE]
        .into_iter()
        .map(|name| (name.to_string(), sha256_hex(entry(entries, name))))
        .collect();
    let manifest_bytes = canonical_bytes(&manifest).unwrap();
    let previous: Integrity = serde_json::from_slice(entry(entries, INTEGRITY_FILE)).unwrap();
    let integrity = Integrity {
        package_hash: sha256_hex(&manifest_bytes),
        report_hash: previous.report_hash,
    };
    replace(entries, MANIFEST_FILE, manifest_bytes);
    replace(entries, INTEGRITY_FILE, canonical_bytes(&integrity).unwrap());
}

/// 原地替换所有等长字节串 (绕过 ZipWriter 的同名检查)，返回替换次数
pub fn patch_bytes(bytes: &mut [u8], from: &[u8], to: &[u8]) -> usize {
    assert_eq!(from.len(), to.len());
    let mut count = 0;
    let mut i = 0;
    while i + from.len() <= bytes.len() {
        if &bytes[i..i + from.len()] == from {
            bytes[i..i + from.len()].copy_from_slice(to);
            count += 1;
            i += from.len();
        } else {
            i += 1;
        }
    }
    count
}
