//! Sandboxed tool execution.
//!
//! Every tool invocation spawns a fresh JS-runtime child running the
//! embedded worker script with piped stdio, a scrubbed environment, a
//! network-block shim, and a wall-clock timeout. There is no process
//! pooling and no shared handler state across calls.

use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;

use crate::config::ToolRunnerConfig;
use crate::error::{Error, Result, ToolErrorCode};
use crate::model::{ToolDefinition, ToolExecutionContext};

/// The worker program shipped inside the crate and materialized per runner.
const WORKER_SOURCE: &str = include_str!("tool_worker.mjs");
const WORKER_FILE_NAME: &str = "promptmgr_tool_worker.mjs";

/// Runtimes permitted to host the worker.
const COMMAND_ALLOWLIST: [&str; 3] = ["node", "bun", "deno"];

/// Environment flag consumed by the worker's network-block shim.
pub const BLOCK_NETWORK_ENV: &str = "PROMPTMGR_BLOCK_NETWORK";

const STDERR_HEAD_BYTES: usize = 200;
const STDOUT_HEAD_BYTES: usize = 200;

/// Spawns sandbox workers under a fixed policy.
#[derive(Debug)]
pub struct ToolRunner {
    program: String,
    base_args: Vec<String>,
    worker_path: PathBuf,
    env_allowlist: Vec<String>,
    timeout: Duration,
    cwd: PathBuf,
    // Keeps the materialized worker script alive for the runner's lifetime.
    _worker_dir: TempDir,
}

#[derive(Debug, Deserialize)]
struct WorkerVerdict {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<WorkerError>,
}

#[derive(Debug, Deserialize)]
struct WorkerError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ToolRunner {
    /// Build a runner from configuration. Rejects empty commands and any
    /// runtime outside the node/bun/deno allow-list before anything spawns.
    pub fn new(config: &ToolRunnerConfig, cwd: impl Into<PathBuf>) -> Result<Self> {
        let tokens = split_command(&config.command);
        let Some((program, base_args)) = tokens.split_first() else {
            return Err(Error::tool_runner(
                ToolErrorCode::InvalidCommand,
                "tool runner command is empty",
            ));
        };

        let basename = command_basename(program);
        if !COMMAND_ALLOWLIST.contains(&basename.as_str()) {
            return Err(Error::tool_runner(
                ToolErrorCode::CommandNotAllowlisted,
                format!(
                    "command {basename:?} is not an allowed tool runtime (node, bun, deno)"
                ),
            ));
        }

        let worker_dir = TempDir::new()?;
        let worker_path = worker_dir.path().join(WORKER_FILE_NAME);
        std::fs::write(&worker_path, WORKER_SOURCE)?;

        Ok(Self {
            program: program.clone(),
            base_args: base_args.to_vec(),
            worker_path,
            env_allowlist: config.env_allowlist.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
            cwd: cwd.into(),
            _worker_dir: worker_dir,
        })
    }

    /// Execute one tool handler and return its JSON result.
    pub async fn execute(
        &self,
        tool_name: &str,
        tools_module_path: &Path,
        args: &Value,
        context: &ToolExecutionContext,
    ) -> Result<Value> {
        let payload = serde_json::to_vec(&json!({ "args": args, "context": context }))?;
        let worker_args = [
            "--tools-module".to_string(),
            tools_module_path.to_string_lossy().into_owned(),
            "--tool".to_string(),
            tool_name.to_string(),
        ];
        self.run_worker(tool_name, &worker_args, &payload).await
    }

    /// Load the tool manifest declared by a tools module: its exported
    /// `definitions`, or bare names derived from its `handlers`.
    pub async fn describe_tools(&self, tools_module_path: &Path) -> Result<Vec<ToolDefinition>> {
        let worker_args = [
            "--tools-module".to_string(),
            tools_module_path.to_string_lossy().into_owned(),
            "--describe".to_string(),
        ];
        let raw = self.run_worker("(describe)", &worker_args, b"{}").await?;
        serde_json::from_value(raw).map_err(|err| {
            Error::tool_runner(
                ToolErrorCode::ToolInvalidResponse,
                format!("tools manifest is not a list of tool definitions: {err}"),
            )
        })
    }

    async fn run_worker(
        &self,
        tool_name: &str,
        worker_args: &[String],
        payload: &[u8],
    ) -> Result<Value> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .arg(&self.worker_path)
            .args(worker_args)
            .current_dir(&self.cwd)
            .env_clear()
            .env(BLOCK_NETWORK_ENV, "true")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in build_child_env(&self.env_allowlist, |key| std::env::var(key).ok()) {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|err| {
            Error::tool_runner(
                ToolErrorCode::ToolProcessError,
                format!("failed to spawn tool worker: {err}"),
            )
        })?;

        tracing::debug!(tool = tool_name, "spawned tool worker");

        let driven = timeout(self.timeout, drive_child(&mut child, payload)).await;
        let (write_result, stdout, stderr, status) = match driven {
            Ok(result) => result?,
            Err(_) => {
                child.start_kill().ok();
                child.wait().await.ok();
                tracing::warn!(tool = tool_name, "tool worker killed after timeout");
                return Err(Error::tool_runner(
                    ToolErrorCode::ToolTimeout,
                    format!(
                        "tool {tool_name} timed out after {}ms",
                        self.timeout.as_millis()
                    ),
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr).into_owned();

        if stdout.trim().is_empty() {
            // A failed stdin write with no verdict means the input never
            // reached the handler; otherwise the worker died silently.
            if let Err(err) = write_result {
                return Err(Error::tool_runner(
                    ToolErrorCode::ToolInputError,
                    format!("failed to write tool input: {err}"),
                ));
            }
            return Err(Error::tool_runner(
                ToolErrorCode::ToolEmptyResponse,
                format!(
                    "tool worker produced no output (stderr: {})",
                    head(&stderr, STDERR_HEAD_BYTES)
                ),
            ));
        }

        let verdict: WorkerVerdict = serde_json::from_str(stdout.trim()).map_err(|_| {
            Error::tool_runner(
                ToolErrorCode::ToolInvalidResponse,
                format!(
                    "tool worker wrote invalid JSON: {}",
                    head(&stdout, STDOUT_HEAD_BYTES)
                ),
            )
        })?;

        if !verdict.ok {
            let error = verdict.error.unwrap_or(WorkerError {
                code: None,
                message: None,
            });
            let code = error
                .code
                .as_deref()
                .map(ToolErrorCode::from_worker_code)
                .unwrap_or(ToolErrorCode::ToolExecutionError);
            return Err(Error::tool_runner(
                code,
                error
                    .message
                    .unwrap_or_else(|| "tool handler failed".to_string()),
            ));
        }

        if !status.success() {
            return Err(Error::tool_runner(
                ToolErrorCode::ToolProcessError,
                format!("tool worker exited with {status} after reporting success"),
            ));
        }

        Ok(verdict.result.unwrap_or(Value::Null))
    }
}

/// Write the payload, then drain both output streams and reap the child.
/// The stdin write result is carried separately: a worker that fails fast
/// closes its stdin, and its verdict takes precedence over our EPIPE.
async fn drive_child(
    child: &mut Child,
    payload: &[u8],
) -> Result<(
    std::io::Result<()>,
    Vec<u8>,
    Vec<u8>,
    std::process::ExitStatus,
)> {
    let mut stdin = child.stdin.take().ok_or_else(|| {
        Error::tool_runner(ToolErrorCode::ToolInputError, "tool worker stdin unavailable")
    })?;
    let mut stdout = child.stdout.take().ok_or_else(|| {
        Error::tool_runner(
            ToolErrorCode::ToolProcessError,
            "tool worker stdout unavailable",
        )
    })?;
    let mut stderr = child.stderr.take().ok_or_else(|| {
        Error::tool_runner(
            ToolErrorCode::ToolProcessError,
            "tool worker stderr unavailable",
        )
    })?;

    let write_result = async {
        stdin.write_all(payload).await?;
        stdin.shutdown().await
    }
    .await;
    drop(stdin);

    let mut out = Vec::new();
    let mut err = Vec::new();
    let (out_read, err_read) =
        tokio::join!(stdout.read_to_end(&mut out), stderr.read_to_end(&mut err));
    out_read.map_err(|e| {
        Error::tool_runner(
            ToolErrorCode::ToolProcessError,
            format!("failed to read tool worker stdout: {e}"),
        )
    })?;
    err_read.map_err(|e| {
        Error::tool_runner(
            ToolErrorCode::ToolProcessError,
            format!("failed to read tool worker stderr: {e}"),
        )
    })?;

    let status = child.wait().await.map_err(|e| {
        Error::tool_runner(
            ToolErrorCode::ToolProcessError,
            format!("failed to reap tool worker: {e}"),
        )
    })?;

    Ok((write_result, out, err, status))
}

/// The child environment: inherited `PATH`, the network-block flag, and
/// allow-listed keys with defined parent values. Nothing else.
fn build_child_env<F>(allowlist: &[String], lookup: F) -> Vec<(String, String)>
where
    F: Fn(&str) -> Option<String>,
{
    let mut env = Vec::new();
    if let Some(path) = lookup("PATH") {
        env.push(("PATH".to_string(), path));
    }
    for key in allowlist {
        if key == BLOCK_NETWORK_ENV {
            continue;
        }
        if let Some(value) = lookup(key) {
            env.push((key.clone(), value));
        }
    }
    env
}

/// Shell-like tokenization: whitespace-separated, double-quoted segments
/// preserved verbatim.
fn split_command(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut seen_any = false;

    for ch in command.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                seen_any = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if seen_any {
                    tokens.push(std::mem::take(&mut current));
                    seen_any = false;
                }
            }
            c => {
                current.push(c);
                seen_any = true;
            }
        }
    }
    if seen_any {
        tokens.push(current);
    }
    tokens
}

/// First `max` bytes of a diagnostic string, char-boundary safe.
fn head(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn command_basename(program: &str) -> String {
    Path::new(program)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_command_plain() {
        assert_eq!(split_command("node"), vec!["node"]);
        assert_eq!(
            split_command("deno run --allow-read"),
            vec!["deno", "run", "--allow-read"]
        );
    }

    #[test]
    fn test_split_command_quotes() {
        assert_eq!(
            split_command(r#""/opt/node js/bin/node" --no-warnings"#),
            vec!["/opt/node js/bin/node", "--no-warnings"]
        );
        assert_eq!(split_command(r#"node """#), vec!["node", ""]);
    }

    #[test]
    fn test_split_command_empty() {
        assert!(split_command("").is_empty());
        assert!(split_command("   ").is_empty());
    }

    #[test]
    fn test_rejects_empty_command() {
        let config = ToolRunnerConfig {
            command: "  ".to_string(),
            ..ToolRunnerConfig::default()
        };
        let err = ToolRunner::new(&config, ".").unwrap_err();
        assert_eq!(err.case_code(), "INVALID_COMMAND");
    }

    #[test]
    fn test_rejects_non_allowlisted_command() {
        let config = ToolRunnerConfig {
            command: "python".to_string(),
            ..ToolRunnerConfig::default()
        };
        let err = ToolRunner::new(&config, ".").unwrap_err();
        assert_eq!(err.case_code(), "COMMAND_NOT_ALLOWLISTED");
    }

    #[test]
    fn test_allowlist_checks_basename() {
        let config = ToolRunnerConfig {
            command: "/usr/local/bin/node --no-warnings".to_string(),
            ..ToolRunnerConfig::default()
        };
        let runner = ToolRunner::new(&config, ".").unwrap();
        assert_eq!(runner.program, "/usr/local/bin/node");
        assert_eq!(runner.base_args, vec!["--no-warnings"]);
    }

    #[test]
    fn test_child_env_policy() {
        let allowlist = vec!["FIXTURES_DIR".to_string(), "UNSET_KEY".to_string()];
        let env = build_child_env(&allowlist, |key| match key {
            "PATH" => Some("/usr/bin".to_string()),
            "FIXTURES_DIR" => Some("/tmp/fixtures".to_string()),
            "SECRET" => Some("leaky".to_string()),
            _ => None,
        });
        assert!(env.contains(&("PATH".to_string(), "/usr/bin".to_string())));
        assert!(env.contains(&("FIXTURES_DIR".to_string(), "/tmp/fixtures".to_string())));
        assert!(!env.iter().any(|(k, _)| k == "SECRET"));
        assert!(!env.iter().any(|(k, _)| k == "UNSET_KEY"));
    }

    #[test]
    fn test_allowlist_cannot_override_network_block() {
        let allowlist = vec![BLOCK_NETWORK_ENV.to_string()];
        let env = build_child_env(&allowlist, |_| Some("false".to_string()));
        assert!(!env.iter().any(|(k, _)| k == BLOCK_NETWORK_ENV));
    }

    #[test]
    fn test_worker_source_is_embedded() {
        assert!(WORKER_SOURCE.contains("PROMPTMGR_BLOCK_NETWORK"));
        assert!(WORKER_SOURCE.contains("Network access is blocked"));
    }
}
