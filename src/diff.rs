//! Run-report diffing.
//!
//! Classifies per-case status transitions between a baseline and a
//! candidate report under the ordering pass > fail > error. Ids present on
//! only one side are ignored; the diff never fails on empty or mismatched
//! case sets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{CaseStatus, RunReport};

/// One case whose status changed between reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusTransition {
    pub hashed_case_id: String,
    pub baseline_status: CaseStatus,
    pub candidate_status: CaseStatus,
}

/// The diff artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffReport {
    pub baseline_suite_id: String,
    pub candidate_suite_id: String,
    pub compared_at: String,
    pub total_compared: usize,
    pub regressions: Vec<StatusTransition>,
    pub improvements: Vec<StatusTransition>,
    pub unchanged: usize,
}

const fn rank(status: CaseStatus) -> u8 {
    match status {
        CaseStatus::Pass => 2,
        CaseStatus::Fail => 1,
        CaseStatus::Error => 0,
    }
}

/// Compare two run reports case-by-case.
pub fn diff(baseline: &RunReport, candidate: &RunReport) -> DiffReport {
    let baseline_statuses = index_statuses(baseline);
    let candidate_statuses = index_statuses(candidate);

    let mut all_ids: BTreeMap<&str, ()> = BTreeMap::new();
    all_ids.extend(baseline_statuses.keys().map(|id| (*id, ())));
    all_ids.extend(candidate_statuses.keys().map(|id| (*id, ())));

    let mut regressions = Vec::new();
    let mut improvements = Vec::new();
    let mut unchanged = 0usize;

    for id in all_ids.keys() {
        let (Some(&before), Some(&after)) =
            (baseline_statuses.get(id), candidate_statuses.get(id))
        else {
            continue;
        };
        if before == after {
            unchanged += 1;
            continue;
        }
        let transition = StatusTransition {
            hashed_case_id: (*id).to_string(),
            baseline_status: before,
            candidate_status: after,
        };
        if rank(before) > rank(after) {
            regressions.push(transition);
        } else {
            improvements.push(transition);
        }
    }

    DiffReport {
        baseline_suite_id: baseline.suite_id.clone(),
        candidate_suite_id: candidate.suite_id.clone(),
        compared_at: chrono::Utc::now().to_rfc3339(),
        total_compared: all_ids.len(),
        regressions,
        improvements,
        unchanged,
    }
}

/// Index a report by hashed case id. Duplicate ids keep the last entry.
fn index_statuses(report: &RunReport) -> BTreeMap<&str, CaseStatus> {
    report
        .cases
        .iter()
        .map(|case| (case.hashed_case_id.as_str(), case.status))
        .collect()
}
