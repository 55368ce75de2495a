//! Report artifact format and diff classification, end to end through the
//! file formats the CI collaborator consumes.

mod common;

use promptmgr::diff::diff;
use promptmgr::model::{
    AssertionResult, CaseResult, CaseStatus, ReportPrompt, RunReport, RunSummary,
    RAW_CASE_ID_PLACEHOLDER,
};
use promptmgr::provider::ProviderId;
use promptmgr::report::{read_report, to_json_string, write_report};
use serde_json::json;

fn case(id: &str, status: CaseStatus) -> CaseResult {
    CaseResult {
        hashed_case_id: id.to_string(),
        raw_case_id: RAW_CASE_ID_PLACEHOLDER.to_string(),
        status,
        schema_valid: status == CaseStatus::Pass,
        assertions_passed: status == CaseStatus::Pass,
        assertion_result: AssertionResult::default(),
        errors: Vec::new(),
        output: Some(json!({ "booking_status": "confirmed" })),
        redacted_output: Some(json!({ "booking_status": "confirmed" })),
        expected: json!({ "booking_status": "confirmed" }),
        latency_ms: 12,
        provider: ProviderId::OpenAI,
        model: "test-model".to_string(),
        usage: None,
        tool_trace: Vec::new(),
        tags: vec!["smoke".to_string()],
    }
}

fn report(cases: Vec<CaseResult>) -> RunReport {
    let summary = RunSummary {
        total: cases.len(),
        pass: cases.iter().filter(|c| c.status == CaseStatus::Pass).count(),
        fail: cases.iter().filter(|c| c.status == CaseStatus::Fail).count(),
        error: cases
            .iter()
            .filter(|c| c.status == CaseStatus::Error)
            .count(),
        duration_ms: 120,
    };
    RunReport {
        version: "1".to_string(),
        suite_id: "booking".to_string(),
        provider: ProviderId::OpenAI,
        model: "test-model".to_string(),
        started_at: "2026-08-01T10:00:00+00:00".to_string(),
        ended_at: "2026-08-01T10:00:02+00:00".to_string(),
        summary,
        warnings: Vec::new(),
        prompt: ReportPrompt {
            prompt_id: "booking-extractor".to_string(),
            version: "3".to_string(),
        },
        cases,
    }
}

#[test]
fn report_file_format_is_camel_case_with_trailing_newline() {
    let report = report(vec![case("a", CaseStatus::Pass)]);
    let rendered = to_json_string(&report).unwrap();

    assert!(rendered.ends_with("\n"));
    assert!(!rendered.ends_with("\n\n"));
    // Two-space indentation, camelCase keys, hashed placeholder.
    assert!(rendered.contains("\n  \"suiteId\": \"booking\","));
    assert!(rendered.contains("\"hashedCaseId\": \"a\""));
    assert!(rendered.contains("\"rawCaseId\": \"[HASHED]\""));
    assert!(rendered.contains("\"schemaValid\": true"));
    assert!(rendered.contains("\"durationMs\": 120"));
    assert!(!rendered.contains("\"suite_id\""));
}

#[test]
fn report_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("baseline.json");
    let original = report(vec![case("a", CaseStatus::Pass), case("b", CaseStatus::Fail)]);

    write_report(&path, &original).unwrap();
    let loaded = read_report(&path).unwrap();

    assert_eq!(loaded.summary.total, 2);
    assert_eq!(loaded.summary.pass, 1);
    assert_eq!(loaded.summary.fail, 1);
    assert_eq!(loaded.cases[0].hashed_case_id, "a");
    assert_eq!(loaded.cases[0].status, CaseStatus::Pass);
}

#[test]
fn diff_of_written_reports_classifies_transitions() {
    let dir = tempfile::tempdir().unwrap();
    let baseline_path = dir.path().join("baseline.json");
    let candidate_path = dir.path().join("candidate.json");

    write_report(
        &baseline_path,
        &report(vec![
            case("a", CaseStatus::Pass),
            case("b", CaseStatus::Fail),
            case("c", CaseStatus::Error),
        ]),
    )
    .unwrap();
    write_report(
        &candidate_path,
        &report(vec![
            case("a", CaseStatus::Fail),
            case("b", CaseStatus::Pass),
            case("c", CaseStatus::Error),
        ]),
    )
    .unwrap();

    let baseline = read_report(&baseline_path).unwrap();
    let candidate = read_report(&candidate_path).unwrap();
    let result = diff(&baseline, &candidate);

    assert_eq!(result.total_compared, 3);
    assert_eq!(result.unchanged, 1);
    assert_eq!(result.regressions.len(), 1);
    assert_eq!(result.regressions[0].hashed_case_id, "a");
    assert_eq!(result.improvements.len(), 1);
    assert_eq!(result.improvements[0].hashed_case_id, "b");

    // Diff artifact wire format.
    let rendered = serde_json::to_value(&result).unwrap();
    assert_eq!(rendered["baselineSuiteId"], json!("booking"));
    assert_eq!(rendered["candidateSuiteId"], json!("booking"));
    assert_eq!(rendered["regressions"][0]["baselineStatus"], json!("pass"));
    assert_eq!(rendered["regressions"][0]["candidateStatus"], json!("fail"));
    assert_eq!(rendered["unchanged"], json!(1));
    assert!(rendered["comparedAt"].as_str().unwrap().contains("T"));
}

#[test]
fn summary_counts_always_sum_to_total() {
    let report = report(vec![
        case("a", CaseStatus::Pass),
        case("b", CaseStatus::Fail),
        case("c", CaseStatus::Error),
        case("d", CaseStatus::Pass),
    ]);
    assert_eq!(report.summary.total, report.cases.len());
    assert_eq!(
        report.summary.pass + report.summary.fail + report.summary.error,
        report.summary.total
    );
}
