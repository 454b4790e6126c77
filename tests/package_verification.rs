mod common;

use common::{entry, patch_bytes, provenance, read_entries, replace, reseal, rezip, sample_report};
use evidence_integrity::package::{
    build_files, export_package, INTEGRITY_FILE, MANIFEST_FILE, PROVENANCE_FILE, REPORT_FILE, SOURCES_FILE,
};
use evidence_integrity::verify::{verify, verify_path, CheckId, CheckStatus, Finding, Verdict};

fn statuses(report: &evidence_integrity::VerificationReport) -> Vec<CheckStatus> {
    report.checks.iter().map(|c| c.status).collect()
}

#[test]
fn exported_package_verifies() {
    let report = sample_report();
    let bytes = export_package(&report, &provenance()).unwrap();
    let result = verify(&bytes);

    assert_eq!(result.verdict, Verdict::Pass, "{}", result.render_text());
    assert_eq!(result.exit_code, 0);
    assert_eq!(
        statuses(&result),
        [
            CheckStatus::Pass,
            CheckStatus::Pass,
            CheckStatus::Pass,
            CheckStatus::Pass,
            CheckStatus::Pass,
            CheckStatus::Info
        ]
    );
    assert_eq!(result.report_id.as_deref(), Some("rep-2024-06"));
    assert_eq!(result.report_hash.as_deref(), Some(report.report_hash()));
    assert_eq!(result.chain_valid, Some(true));
    let order: Vec<CheckId> = result.checks.iter().map(|c| c.check).collect();
    assert_eq!(order, CheckId::ORDER);
}

#[test]
fn incomplete_item_is_dropped_before_export() {
    let report = sample_report();
    assert_eq!(report.excluded_items(), 1);
    let files = build_files(&report, &provenance()).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&files.report).unwrap();
    assert_eq!(json["excluded_items"], 1);
    assert_eq!(json["items"].as_array().unwrap().len(), 2);
    // 来源按采集时间排序
    assert_eq!(json["items"][0]["sources"][0]["id"], "s-1");
    // 非整数固定 6 位小数
    let text = String::from_utf8(files.report).unwrap();
    assert!(text.contains("\"confidence\":0.974000"));
}

#[test]
fn flipped_byte_in_sources_fails_file_hashes_only() {
    let bytes = export_package(&sample_report(), &provenance()).unwrap();
    let mut entries = read_entries(&bytes);
    let mut sources = entry(&entries, SOURCES_FILE).to_vec();
    let middle = sources.len() / 2;
    sources[middle] ^= 0x01;
    replace(&mut entries, SOURCES_FILE, sources);

    let result = verify(&rezip(&entries));
    assert_eq!(result.verdict, Verdict::Fail);
    assert_eq!(result.exit_code, 1);

    let files = result.check(CheckId::FileHashes).unwrap();
    assert_eq!(files.status, CheckStatus::Fail);
    assert_eq!(files.findings.len(), 1);
    assert!(matches!(
        &files.findings[0],
        Finding::HashMismatch { file, expected, actual } if file == SOURCES_FILE && expected != actual
    ));
    assert_eq!(result.check(CheckId::PackageHash).unwrap().status, CheckStatus::Pass);
    assert_eq!(result.check(CheckId::ReportHash).unwrap().status, CheckStatus::Pass);
    assert_eq!(result.check(CheckId::Provenance).unwrap().status, CheckStatus::Pass);
}

#[test]
fn edited_manifest_fails_package_hash() {
    let bytes = export_package(&sample_report(), &provenance()).unwrap();
    let mut entries = read_entries(&bytes);

    // 同样的内容，不同的字节：文件哈希仍然对得上，packageHash 对不上
    let manifest: serde_json::Value = serde_json::from_slice(entry(&entries, MANIFEST_FILE)).unwrap();
    replace(&mut entries, MANIFEST_FILE, serde_json::to_vec_pretty(&manifest).unwrap());

    let result = verify(&rezip(&entries));
    assert_eq!(result.verdict, Verdict::Fail);
    assert_eq!(result.check(CheckId::FileHashes).unwrap().status, CheckStatus::Pass);
    let package = result.check(CheckId::PackageHash).unwrap();
    assert_eq!(package.status, CheckStatus::Fail);
    assert!(matches!(&package.findings[0], Finding::HashMismatch { file, .. } if file == MANIFEST_FILE));
}

#[test]
fn rewritten_file_with_updated_manifest_is_still_caught() {
    let bytes = export_package(&sample_report(), &provenance()).unwrap();
    let mut entries = read_entries(&bytes);
    let original_integrity = entry(&entries, INTEGRITY_FILE).to_vec();

    let softened = String::from_utf8(entry(&entries, REPORT_FILE).to_vec())
        .unwrap()
        .replace("Coordinated defamation", "Possible criticism");
    replace(&mut entries, REPORT_FILE, softened.into_bytes());
    // 攻击者同步更新了 manifest，但无法同时伪造 integrity.json 而不被发现
    reseal(&mut entries);
    replace(&mut entries, INTEGRITY_FILE, original_integrity);

    let result = verify(&rezip(&entries));
    assert_eq!(result.verdict, Verdict::Fail);
    assert_eq!(result.check(CheckId::FileHashes).unwrap().status, CheckStatus::Pass);
    assert_eq!(result.check(CheckId::PackageHash).unwrap().status, CheckStatus::Fail);
}

#[test]
fn report_hash_disagreement_fails_cross_check() {
    let bytes = export_package(&sample_report(), &provenance()).unwrap();
    let mut entries = read_entries(&bytes);
    let mut integrity: serde_json::Value = serde_json::from_slice(entry(&entries, INTEGRITY_FILE)).unwrap();
    integrity["reportHash"] = serde_json::Value::String("0".repeat(64));
    replace(&mut entries, INTEGRITY_FILE, serde_json::to_vec(&integrity).unwrap());

    let result = verify(&rezip(&entries));
    assert_eq!(result.verdict, Verdict::Fail);
    assert_eq!(result.exit_code, 1);
    assert_eq!(result.check(CheckId::FileHashes).unwrap().status, CheckStatus::Pass);
    assert_eq!(result.check(CheckId::PackageHash).unwrap().status, CheckStatus::Pass);
    let cross = result.check(CheckId::ReportHash).unwrap();
    assert_eq!(cross.status, CheckStatus::Fail);
    assert!(matches!(&cross.findings[0], Finding::ReportHashMismatch { integrity, .. } if integrity == &"0".repeat(64)));
}

#[test]
fn empty_provenance_field_fails_without_error() {
    let bytes = export_package(&sample_report(), &provenance()).unwrap();
    let mut entries = read_entries(&bytes);
    let mut doc: serde_json::Value = serde_json::from_slice(entry(&entries, PROVENANCE_FILE)).unwrap();
    doc["exported_by"] = serde_json::Value::String(String::new());
    doc.as_object_mut().unwrap().remove("environment");
    replace(&mut entries, PROVENANCE_FILE, serde_json::to_vec(&doc).unwrap());
    reseal(&mut entries);

    let result = verify(&rezip(&entries));
    assert_eq!(result.verdict, Verdict::Fail);
    assert_eq!(result.exit_code, 1);
    assert_eq!(result.check(CheckId::FileHashes).unwrap().status, CheckStatus::Pass);
    assert_eq!(result.check(CheckId::PackageHash).unwrap().status, CheckStatus::Pass);
    let check = result.check(CheckId::Provenance).unwrap();
    assert_eq!(
        check.findings,
        vec![
            Finding::ProvenanceMissingField { field: "exported_by".to_string() },
            Finding::ProvenanceMissingField { field: "environment".to_string() },
        ]
    );
}

#[test]
fn missing_provenance_is_a_structure_error() {
    let bytes = export_package(&sample_report(), &provenance()).unwrap();
    let entries: Vec<_> = read_entries(&bytes)
        .into_iter()
        .filter(|(name, _)| name != PROVENANCE_FILE)
        .collect();

    let result = verify(&rezip(&entries));
    assert_eq!(result.verdict, Verdict::Error);
    assert_eq!(result.exit_code, 2);
    let structure = result.check(CheckId::Structure).unwrap();
    assert_eq!(structure.status, CheckStatus::Fail);
    assert_eq!(
        structure.findings,
        vec![Finding::MissingFile { file: PROVENANCE_FILE.to_string() }]
    );
    assert!(result.checks[1..].iter().all(|c| c.status == CheckStatus::Skipped));
    assert_eq!(result.checks.len(), 6);
}

#[test]
fn extra_entry_is_a_structure_error() {
    let bytes = export_package(&sample_report(), &provenance()).unwrap();
    let mut entries = read_entries(&bytes);
    entries.push(("notes.txt".to_string(), b"added later".to_vec()));

    let result = verify(&rezip(&entries));
    assert_eq!(result.verdict, Verdict::Error);
    assert!(result
        .check(CheckId::Structure)
        .unwrap()
        .findings
        .contains(&Finding::UnexpectedFile { file: "notes.txt".to_string() }));
}

#[test]
fn second_entry_with_the_same_name_is_a_structure_error() {
    let bytes = export_package(&sample_report(), &provenance()).unwrap();
    let entries = read_entries(&bytes);
    let mut forged = entry(&entries, SOURCES_FILE).to_vec();
    forged[1] ^= 0x01;

    // 伪造的 sources.json 排在真实文件之前；中央目录只会保留后一个
    let mut tampered = vec![("sources.jsoq".to_string(), forged)];
    tampered.extend(entries);
    let mut zip = rezip(&tampered);
    assert_eq!(patch_bytes(&mut zip, b"sources.jsoq", SOURCES_FILE.as_bytes()), 2);

    let result = verify(&zip);
    assert_eq!(result.verdict, Verdict::Error);
    assert_eq!(result.exit_code, 2);
    assert!(result
        .check(CheckId::Structure)
        .unwrap()
        .findings
        .contains(&Finding::DuplicateFile { file: SOURCES_FILE.to_string(), copies: 2 }));
    assert!(result.checks[1..].iter().all(|c| c.status == CheckStatus::Skipped));
}

#[test]
fn verification_is_idempotent() {
    let bytes = export_package(&sample_report(), &provenance()).unwrap();
    let first = verify(&bytes);
    let second = verify(&bytes);
    assert_eq!(first, second);
    assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    assert_eq!(first.render_text(), second.render_text());
}

#[test]
fn export_is_deterministic() {
    let report = sample_report();
    let first = build_files(&report, &provenance()).unwrap();
    let second = build_files(&sample_report(), &provenance()).unwrap();
    assert_eq!(first.manifest, second.manifest);
    assert_eq!(first.package_hash, second.package_hash);
    assert_eq!(
        export_package(&report, &provenance()).unwrap(),
        export_package(&sample_report(), &provenance()).unwrap()
    );
}

#[test]
fn verifies_from_disk_and_renders_truncated_hashes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evidence-rep-2024-06.zip");
    let bytes = export_package(&sample_report(), &provenance()).unwrap();

    std::fs::write(&path, &bytes).unwrap();
    let result = verify_path(&path);
    assert_eq!(result.verdict, Verdict::Pass);
    assert_eq!(result.archive.as_deref(), Some(path.display().to_string().as_str()));

    let mut entries = read_entries(&bytes);
    let mut sources = entry(&entries, SOURCES_FILE).to_vec();
    sources[0] ^= 0x20;
    replace(&mut entries, SOURCES_FILE, sources);
    std::fs::write(&path, rezip(&entries)).unwrap();

    let result = verify_path(&path);
    let text = result.render_text();
    assert!(text.contains("[FAIL] 2. File hashes"), "{text}");
    assert!(text.contains("sources.json: expected "), "{text}");
    assert!(text.contains('…'));
    assert!(text.contains("RESULT: FAIL (exit code 1)"));

    let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
    assert_eq!(json["verdict"], "FAIL");
    assert_eq!(json["checks"][1]["findings"][0]["kind"], "hash_mismatch");
    assert_eq!(json["checks"][1]["findings"][0]["expected"].as_str().unwrap().len(), 64);
}
