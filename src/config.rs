//! Run configuration types consumed by the orchestrator.
//!
//! Config-file discovery, parsing, and validation belong to the CLI
//! collaborator. The core receives these shapes fully resolved.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::model::PromptRecord;
use crate::provider::ProviderId;

/// Named bundle of prompt, dataset, schema, assertions, and tools module.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suite {
    pub id: String,
    pub prompt_id: String,
    pub dataset_path: PathBuf,
    pub schema_path: PathBuf,
    pub assertions_path: PathBuf,
    pub tools_module_path: PathBuf,
    #[serde(default)]
    pub model_by_provider: BTreeMap<ProviderId, String>,
}

/// Sandbox policy for tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolRunnerConfig {
    /// Runtime command line, shell-style tokenized (e.g. `"node"` or
    /// `"deno run --allow-read"`). The basename of the first token must be
    /// one of node/bun/deno.
    pub command: String,
    /// Environment keys forwarded from the parent to the worker.
    pub env_allowlist: Vec<String>,
    /// Wall-clock budget per tool invocation.
    pub timeout_ms: u64,
    /// Hard cap on tool invocations within one case.
    pub max_tool_calls_per_case: usize,
}

impl Default for ToolRunnerConfig {
    fn default() -> Self {
        Self {
            command: "node".to_string(),
            env_allowlist: Vec::new(),
            timeout_ms: 10_000,
            max_tool_calls_per_case: 8,
        }
    }
}

/// Report privacy policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrivacyConfig {
    /// Redact report payloads (emails, phone numbers, long digit runs).
    pub redact_in_reports: bool,
    /// Permit datasets built from raw production fixtures.
    pub allow_raw_production_fixtures: bool,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            redact_in_reports: true,
            allow_raw_production_fixtures: false,
        }
    }
}

/// Per-backend endpoint overrides; defaults are the public API endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    pub openai: ProviderEndpoint,
    pub anthropic: ProviderEndpoint,
    pub google: ProviderEndpoint,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderEndpoint {
    pub base_url: Option<String>,
}

/// Fully-resolved input to [`crate::orchestrator::run_suite`].
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub suite: Suite,
    pub prompt: PromptRecord,
    pub provider: ProviderId,
    /// Overrides the suite's per-provider model mapping when set.
    pub model: Option<String>,
    /// Bounded pool width; defaults to 4.
    pub concurrency: Option<usize>,
    pub tool_runner: ToolRunnerConfig,
    pub privacy: PrivacyConfig,
    pub providers: ProvidersConfig,
    /// Working directory for tool workers; defaults to the process cwd.
    pub cwd: Option<PathBuf>,
}
