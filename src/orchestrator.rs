//! Suite orchestration.
//!
//! Drives N cases through a bounded worker pool. Each case runs the full
//! pipeline: provider tool loop, schema validation, assertion evaluation,
//! and result recording. Exceptions never cross the pool boundary; every
//! failure becomes a `CaseResult` with `status = error`.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::assertions;
use crate::config::{PrivacyConfig, RunConfig};
use crate::error::{Error, Result};
use crate::model::{
    hashed_case_id, AssertionResult, AssertionSpec, CaseResult, CaseStatus, EvalCase,
    ReportPrompt, RunReport, RunSummary, ToolDefinition, ToolExecutionContext,
    RAW_CASE_ID_PLACEHOLDER, REPORT_VERSION,
};
use crate::provider::{
    Provider, ProviderId, ProviderRequest, ToolInvocation, ToolInvoker,
};
use crate::providers;
use crate::redact::redact;
use crate::schema::SchemaValidator;
use crate::tool_runner::ToolRunner;

const DEFAULT_CONCURRENCY: usize = 4;

// ============================================================================
// Run
// ============================================================================

/// Run every case of the configured suite and return the run report.
///
/// Configuration errors (bad paths, unknown models, invalid schema
/// documents, duplicate case ids) surface here before any case executes; no
/// report is produced for them.
pub async fn run_suite(config: &RunConfig) -> Result<RunReport> {
    let run_start = Instant::now();
    let started_at = chrono::Utc::now().to_rfc3339();

    let cwd = match &config.cwd {
        Some(cwd) => cwd.clone(),
        None => std::env::current_dir()?,
    };

    providers::register_builtin_providers(&config.providers);
    let provider = providers::provider_for(config.provider)?;

    let model = config
        .model
        .clone()
        .or_else(|| {
            config
                .suite
                .model_by_provider
                .get(&config.provider)
                .cloned()
        })
        .ok_or_else(|| {
            Error::config(format!(
                "No model configured for provider {} in suite {}",
                config.provider, config.suite.id
            ))
        })?;

    let runner = Arc::new(ToolRunner::new(&config.tool_runner, &cwd)?);

    let dataset_path = resolve_path(&cwd, &config.suite.dataset_path);
    let assertions_path = resolve_path(&cwd, &config.suite.assertions_path);
    let schema_path = resolve_path(&cwd, &config.suite.schema_path);
    let tools_module_path = resolve_path(&cwd, &config.suite.tools_module_path);

    let (cases, assertion_spec, schema_doc, tools) = tokio::try_join!(
        load_dataset(&dataset_path),
        load_assertion_spec(&assertions_path),
        load_json(&schema_path),
        runner.describe_tools(&tools_module_path),
    )?;
    let schema = SchemaValidator::compile(&schema_doc)?;

    tracing::debug!(
        suite = %config.suite.id,
        provider = %config.provider,
        model = %model,
        cases = cases.len(),
        "starting suite run"
    );

    let ctx = Arc::new(CaseContext {
        provider,
        provider_id: config.provider,
        model,
        prompt_body: config.prompt.body.clone(),
        suite_id: config.suite.id.clone(),
        tools,
        tools_module_path,
        runner,
        schema,
        assertions: assertion_spec,
        privacy: config.privacy.clone(),
        max_tool_calls: config.tool_runner.max_tool_calls_per_case,
    });

    let concurrency = config.concurrency.unwrap_or(DEFAULT_CONCURRENCY).max(1);
    let cases = Arc::new(cases);
    let run = {
        let ctx = Arc::clone(&ctx);
        move |cases: Arc<Vec<EvalCase>>, index: usize| {
            let ctx = Arc::clone(&ctx);
            async move { run_case(&ctx, &cases[index]).await }
        }
    };
    let results = run_pool(Arc::clone(&cases), concurrency, run).await;

    let summary = RunSummary {
        total: results.len(),
        pass: results
            .iter()
            .filter(|r| r.status == CaseStatus::Pass)
            .count(),
        fail: results
            .iter()
            .filter(|r| r.status == CaseStatus::Fail)
            .count(),
        error: results
            .iter()
            .filter(|r| r.status == CaseStatus::Error)
            .count(),
        duration_ms: run_start.elapsed().as_millis() as u64,
    };

    Ok(RunReport {
        version: REPORT_VERSION.to_string(),
        suite_id: config.suite.id.clone(),
        provider: config.provider,
        model: ctx.model.clone(),
        started_at,
        ended_at: chrono::Utc::now().to_rfc3339(),
        summary,
        warnings: build_warnings(&config.privacy),
        prompt: ReportPrompt {
            prompt_id: config.prompt.prompt_id.clone(),
            version: config.prompt.version.clone(),
        },
        cases: results,
    })
}

fn build_warnings(privacy: &PrivacyConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if privacy.allow_raw_production_fixtures {
        warnings.push(
            "privacy.allowRawProductionFixtures is enabled; compliance for raw production data \
             in fixtures is the suite owner's responsibility"
                .to_string(),
        );
    }
    if privacy.redact_in_reports {
        warnings.push(
            "privacy.redactInReports is enabled; report payloads are redacted by default"
                .to_string(),
        );
    }
    warnings
}

fn resolve_path(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

// ============================================================================
// Artifact loading
// ============================================================================

async fn load_dataset(path: &Path) -> Result<Vec<EvalCase>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| Error::config(format!("cannot read dataset {}: {err}", path.display())))?;

    let extension = path.extension().and_then(OsStr::to_str).unwrap_or("");
    let cases: Vec<EvalCase> = match extension {
        "jsonl" => raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|err| {
                    Error::config(format!("invalid dataset row in {}: {err}", path.display()))
                })
            })
            .collect::<Result<_>>()?,
        "json" => serde_json::from_str(&raw)
            .map_err(|err| Error::config(format!("invalid dataset {}: {err}", path.display())))?,
        other => {
            return Err(Error::config(format!(
                "unsupported dataset file extension {other:?} for {}",
                path.display()
            )))
        }
    };

    let mut seen = HashSet::new();
    for case in &cases {
        if case.case_id.is_empty() {
            return Err(Error::config(format!(
                "dataset {} contains a case with an empty caseId",
                path.display()
            )));
        }
        if !seen.insert(case.case_id.as_str()) {
            return Err(Error::config(format!(
                "duplicate caseId {:?} in dataset {}",
                case.case_id,
                path.display()
            )));
        }
    }

    Ok(cases)
}

async fn load_assertion_spec(path: &Path) -> Result<AssertionSpec> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|err| {
        Error::config(format!(
            "cannot read assertion spec {}: {err}",
            path.display()
        ))
    })?;
    serde_json::from_str(&raw)
        .map_err(|err| Error::config(format!("invalid assertion spec {}: {err}", path.display())))
}

async fn load_json(path: &Path) -> Result<Value> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| Error::config(format!("cannot read {}: {err}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|err| Error::config(format!("invalid JSON in {}: {err}", path.display())))
}

// ============================================================================
// Per-case pipeline
// ============================================================================

struct CaseContext {
    provider: Arc<dyn Provider>,
    provider_id: ProviderId,
    model: String,
    prompt_body: String,
    suite_id: String,
    tools: Vec<ToolDefinition>,
    tools_module_path: PathBuf,
    runner: Arc<ToolRunner>,
    schema: SchemaValidator,
    assertions: AssertionSpec,
    privacy: PrivacyConfig,
    max_tool_calls: usize,
}

/// Binds the tool runner to one case's execution context.
struct CaseToolInvoker {
    runner: Arc<ToolRunner>,
    tools_module_path: PathBuf,
    context: ToolExecutionContext,
}

#[async_trait]
impl ToolInvoker for CaseToolInvoker {
    async fn invoke(&self, call: &ToolInvocation) -> Result<Value> {
        self.runner
            .execute(&call.name, &self.tools_module_path, &call.args, &self.context)
            .await
    }
}

async fn run_case(ctx: &CaseContext, case: &EvalCase) -> CaseResult {
    let case_start = Instant::now();
    let hashed = hashed_case_id(&case.case_id);

    let invoker = CaseToolInvoker {
        runner: Arc::clone(&ctx.runner),
        tools_module_path: ctx.tools_module_path.clone(),
        context: ToolExecutionContext {
            suite_id: ctx.suite_id.clone(),
            hashed_case_id: hashed.clone(),
            raw_case_id: case.case_id.clone(),
            provider: ctx.provider_id,
            model: ctx.model.clone(),
        },
    };

    let request = ProviderRequest {
        model: &ctx.model,
        prompt: &ctx.prompt_body,
        input: &case.input,
        tools: &ctx.tools,
        max_tool_calls: ctx.max_tool_calls,
        invoker: &invoker,
    };

    match ctx.provider.invoke_with_tools(request).await {
        Ok(response) => {
            let schema_result = ctx.schema.validate(&response.final_output);
            let assertion_result =
                assertions::evaluate(&response.final_output, &case.expected, &ctx.assertions);

            let mut errors = schema_result.errors.clone();
            for check in assertion_result.checks.iter().filter(|c| !c.passed) {
                errors.push(format!(
                    "{}:{}:{}",
                    check.field,
                    check.op.as_str(),
                    check.message.as_deref().unwrap_or("assertion failed")
                ));
            }
            if !assertion_result.missing_keys.is_empty() {
                errors.push(format!(
                    "missing keys: {}",
                    assertion_result.missing_keys.join(", ")
                ));
            }
            if !assertion_result.unexpected_keys.is_empty() {
                errors.push(format!(
                    "unexpected keys: {}",
                    assertion_result.unexpected_keys.join(", ")
                ));
            }

            let passed = schema_result.valid && assertion_result.passed;
            let redacted_output = if ctx.privacy.redact_in_reports {
                redact(&response.final_output)
            } else {
                response.final_output.clone()
            };

            CaseResult {
                hashed_case_id: hashed,
                raw_case_id: RAW_CASE_ID_PLACEHOLDER.to_string(),
                status: if passed {
                    CaseStatus::Pass
                } else {
                    CaseStatus::Fail
                },
                schema_valid: schema_result.valid,
                assertions_passed: assertion_result.passed,
                assertion_result,
                errors,
                output: Some(response.final_output),
                redacted_output: Some(redacted_output),
                expected: case.expected.clone(),
                latency_ms: case_start.elapsed().as_millis() as u64,
                provider: ctx.provider_id,
                model: ctx.model.clone(),
                usage: response.usage,
                tool_trace: response.tool_trace,
                tags: case.tags.clone(),
            }
        }
        Err(err) => {
            tracing::warn!(case = %hashed, error = %err, "case pipeline failed");
            CaseResult {
                hashed_case_id: hashed,
                raw_case_id: RAW_CASE_ID_PLACEHOLDER.to_string(),
                status: CaseStatus::Error,
                schema_valid: false,
                assertions_passed: false,
                assertion_result: AssertionResult::empty(),
                errors: vec![format_case_error(&err)],
                output: None,
                redacted_output: None,
                expected: case.expected.clone(),
                latency_ms: case_start.elapsed().as_millis() as u64,
                provider: ctx.provider_id,
                model: ctx.model.clone(),
                usage: None,
                tool_trace: Vec::new(),
                tags: case.tags.clone(),
            }
        }
    }
}

fn format_case_error(err: &Error) -> String {
    match err {
        Error::ToolRunner { code, message } => format!("{}:{message}", code.as_str()),
        other => format!("CASE_ERROR:{other}"),
    }
}

// ============================================================================
// Bounded concurrency pool
// ============================================================================

/// Run every item through `run` with at most `concurrency` in flight.
///
/// Workers share a monotonically advancing cursor and write results into
/// preallocated slots, so output order equals input order regardless of
/// completion order. The first failure does not abort siblings; `run` is
/// infallible by construction.
async fn run_pool<T, R, F, Fut>(items: Arc<Vec<T>>, concurrency: usize, run: F) -> Vec<R>
where
    T: Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(Arc<Vec<T>>, usize) -> Fut + Clone + Send + 'static,
    Fut: std::future::Future<Output = R> + Send + 'static,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }

    let cursor = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel::<(usize, R)>();

    let workers = concurrency.max(1).min(total);
    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let items = Arc::clone(&items);
        let cursor = Arc::clone(&cursor);
        let tx = tx.clone();
        let run = run.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                if index >= items.len() {
                    break;
                }
                let result = run(Arc::clone(&items), index).await;
                if tx.send((index, result)).is_err() {
                    break;
                }
            }
        }));
    }
    drop(tx);

    let mut slots: Vec<Option<R>> = (0..total).map(|_| None).collect();
    while let Some((index, result)) = rx.recv().await {
        slots[index] = Some(result);
    }
    for handle in handles {
        handle.await.ok();
    }

    slots.into_iter().flatten().collect()
}
