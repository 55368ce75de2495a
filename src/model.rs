//! Core data model for suites, cases, assertions, traces, and run reports.
//!
//! Everything here serializes as camelCase JSON because these shapes cross
//! process boundaries: the worker IPC payload, the emitted run report, and
//! the diff report are all consumed by external tooling.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::provider::ProviderId;

/// The literal placed in `CaseResult.rawCaseId` in emitted reports so raw
/// identifiers never leak into artifacts.
pub const RAW_CASE_ID_PLACEHOLDER: &str = "[HASHED]";

/// Report format version emitted in `RunReport.version`.
pub const REPORT_VERSION: &str = "1";

// ============================================================================
// Dataset
// ============================================================================

/// One input/expected pair in a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalCase {
    pub case_id: String,
    pub input: Value,
    pub expected: Value,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A loaded prompt version. The prompt-version file layout belongs to the
/// CLI collaborator; the core only consumes the resolved record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRecord {
    pub prompt_id: String,
    pub version: String,
    pub body: String,
}

/// First 16 lowercase hex characters of SHA-256 over the raw case id.
///
/// Deterministic in the raw id; reports and diffs index cases by this value.
pub fn hashed_case_id(raw_case_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_case_id.as_bytes());
    let mut digest = hex_lower(&hasher.finalize());
    digest.truncate(16);
    digest
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut output, "{byte:02x}");
    }
    output
}

// ============================================================================
// Tools
// ============================================================================

/// A tool surfaced to the model, as declared by the suite's tools module.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

/// Context handed to every tool handler invocation, across the worker IPC
/// boundary. Carries the raw case id so handlers can correlate fixtures;
/// the raw id never reaches the emitted report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionContext {
    pub suite_id: String,
    pub hashed_case_id: String,
    pub raw_case_id: String,
    pub provider: ProviderId,
    pub model: String,
}

/// One tool invocation as observed by a provider adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallTrace {
    pub id: String,
    pub name: String,
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub latency_ms: u64,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Ok,
    Error,
}

// ============================================================================
// Assertions
// ============================================================================

/// Field-level assertion specification for a suite.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssertionSpec {
    pub required_keys: Vec<String>,
    pub allow_additional_keys: bool,
    pub variable_fields: Vec<String>,
    /// Keyed by dot-delimited field path. Sorted map so evaluation order is
    /// deterministic across runs.
    pub field_matchers: std::collections::BTreeMap<String, Vec<FieldMatcher>>,
}

/// One matcher applied to one field path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMatcher {
    pub op: AssertionOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_path: Option<String>,
}

/// The assertion operator set. Operator strings outside the known set
/// deserialize to `Unsupported` and fail their check at evaluation time
/// instead of failing the dataset load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssertionOperator {
    Equals,
    OneOf,
    Contains,
    Regex,
    NumericRange,
    Exists,
    Absent,
    #[serde(other)]
    Unsupported,
}

impl AssertionOperator {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::OneOf => "oneOf",
            Self::Contains => "contains",
            Self::Regex => "regex",
            Self::NumericRange => "numericRange",
            Self::Exists => "exists",
            Self::Absent => "absent",
            Self::Unsupported => "unsupported",
        }
    }
}

/// Inclusive numeric bounds for the `numericRange` operator.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NumericRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

// ============================================================================
// Usage
// ============================================================================

/// Token usage accumulated across the provider round-trips of one case.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

// ============================================================================
// Case results
// ============================================================================

/// Terminal status of one evaluated case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Pass,
    Fail,
    Error,
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// The outcome of evaluating one assertion spec against one output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResult {
    pub passed: bool,
    pub checks: Vec<AssertionCheckResult>,
    pub missing_keys: Vec<String>,
    pub unexpected_keys: Vec<String>,
}

impl AssertionResult {
    /// The result recorded when the pipeline errored before any output
    /// existed.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// One matcher's verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionCheckResult {
    pub field: String,
    pub op: AssertionOperator,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Everything the report records about one case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseResult {
    pub hashed_case_id: String,
    pub raw_case_id: String,
    pub status: CaseStatus,
    pub schema_valid: bool,
    pub assertions_passed: bool,
    pub assertion_result: AssertionResult,
    pub errors: Vec<String>,
    pub output: Option<Value>,
    pub redacted_output: Option<Value>,
    pub expected: Value,
    pub latency_ms: u64,
    pub provider: ProviderId,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub tool_trace: Vec<ToolCallTrace>,
    pub tags: Vec<String>,
}

// ============================================================================
// Run reports
// ============================================================================

/// Aggregate counters for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total: usize,
    pub pass: usize,
    pub fail: usize,
    pub error: usize,
    pub duration_ms: u64,
}

/// Prompt identity echoed into the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPrompt {
    pub prompt_id: String,
    pub version: String,
}

/// The JSON artifact produced by one orchestrator run over a suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub version: String,
    pub suite_id: String,
    pub provider: ProviderId,
    pub model: String,
    pub started_at: String,
    pub ended_at: String,
    pub summary: RunSummary,
    pub warnings: Vec<String>,
    pub prompt: ReportPrompt,
    pub cases: Vec<CaseResult>,
}
