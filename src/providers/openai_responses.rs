//! OpenAI Responses API tool-calling loop.
//!
//! Conversation state is the running list of input items. Every response's
//! output items are appended back verbatim (reasoning items included; the
//! backend's reasoning models require the full list), followed by one
//! `function_call_output` item per executed call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::model::{ToolCallStatus, ToolCallTrace, ToolDefinition, Usage};
use crate::provider::{Provider, ProviderId, ProviderRequest, ProviderResponse, ToolInvocation};
use crate::providers::{input_as_text, parse_maybe_json, post_provider_json, tool_output_string};

// ============================================================================
// Constants
// ============================================================================

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const API_KEY_ENV: &str = "OPENAI_API_KEY";

// ============================================================================
// Provider
// ============================================================================

/// OpenAI Responses API adapter.
pub struct OpenAiResponsesProvider {
    client: reqwest::Client,
    base_url: String,
    tool_choice: Option<Value>,
    parallel_tool_calls: Option<bool>,
}

impl OpenAiResponsesProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: OPENAI_BASE_URL.to_string(),
            tool_choice: None,
            parallel_tool_calls: None,
        }
    }

    /// Create with a custom base URL (test harness, proxy).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_tool_choice(mut self, tool_choice: Value) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    #[must_use]
    pub fn with_parallel_tool_calls(mut self, parallel_tool_calls: bool) -> Self {
        self.parallel_tool_calls = Some(parallel_tool_calls);
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/responses", self.base_url)
    }
}

impl Default for OpenAiResponsesProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for OpenAiResponsesProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAI
    }

    async fn invoke_with_tools(&self, req: ProviderRequest<'_>) -> Result<ProviderResponse> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| Error::config(format!("Missing OpenAI API key in {API_KEY_ENV}")))?;
        let authorization = format!("Bearer {api_key}");
        let url = self.endpoint();

        let tools: Vec<ResponsesTool> = req.tools.iter().map(convert_tool).collect();
        let mut input_items: Vec<Value> = vec![json!({
            "role": "user",
            "content": input_as_text(req.input),
        })];

        let mut trace: Vec<ToolCallTrace> = Vec::new();
        let mut usage = Usage::default();
        let mut saw_usage = false;
        let mut calls_used = 0usize;

        loop {
            let body = ResponsesRequest {
                model: req.model,
                instructions: req.prompt,
                input: &input_items,
                tools: (!tools.is_empty()).then_some(tools.as_slice()),
                tool_choice: self.tool_choice.as_ref(),
                parallel_tool_calls: self.parallel_tool_calls,
            };
            let raw = post_provider_json(
                &self.client,
                self.id(),
                &url,
                &[("authorization", authorization.as_str())],
                &body,
            )
            .await?;

            let parsed: ResponsesApiResponse =
                serde_json::from_value(raw.clone()).map_err(|err| {
                    Error::provider(self.id().as_str(), format!("unexpected response shape: {err}"))
                })?;

            if let Some(turn_usage) = &parsed.usage {
                usage.add(&turn_usage.to_usage());
                saw_usage = true;
            }

            let calls: Vec<FunctionCallItem> = parsed
                .output
                .iter()
                .filter_map(|item| {
                    match serde_json::from_value::<ResponsesOutputItem>(item.clone()) {
                        Ok(ResponsesOutputItem::FunctionCall(call)) => Some(call),
                        _ => None,
                    }
                })
                .collect();

            if calls.is_empty() {
                let text = parsed
                    .output_text
                    .unwrap_or_else(|| collect_output_text(&parsed.output));
                return Ok(ProviderResponse {
                    final_output: parse_maybe_json(&text),
                    usage: saw_usage.then_some(usage),
                    raw,
                    tool_trace: trace,
                });
            }

            if calls_used + calls.len() > req.max_tool_calls {
                return Err(Error::provider(
                    self.id().as_str(),
                    format!("exceeded maxToolCalls={}", req.max_tool_calls),
                ));
            }

            // The whole output list goes back into the conversation,
            // non-functional items included, order preserved.
            input_items.extend(parsed.output.iter().cloned());

            for call in calls {
                let args: Value = if call.arguments.trim().is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(&call.arguments).unwrap_or_else(|err| {
                        tracing::warn!(error = %err, "tool arguments are not valid JSON");
                        Value::Null
                    })
                };
                let invocation = ToolInvocation {
                    id: call.call_id.clone(),
                    name: call.name.clone(),
                    args: args.clone(),
                };
                let started = Instant::now();
                match req.invoker.invoke(&invocation).await {
                    Ok(result) => {
                        trace.push(ToolCallTrace {
                            id: call.call_id.clone(),
                            name: call.name,
                            args,
                            result: Some(result.clone()),
                            latency_ms: started.elapsed().as_millis() as u64,
                            status: ToolCallStatus::Ok,
                            error_code: None,
                            error_message: None,
                        });
                        input_items.push(json!({
                            "type": "function_call_output",
                            "call_id": call.call_id,
                            "output": tool_output_string(&result),
                        }));
                        calls_used += 1;
                    }
                    Err(err) => {
                        trace.push(ToolCallTrace {
                            id: call.call_id,
                            name: call.name,
                            args,
                            result: None,
                            latency_ms: started.elapsed().as_millis() as u64,
                            status: ToolCallStatus::Error,
                            error_code: Some(err.case_code().to_string()),
                            error_message: Some(err.to_string()),
                        });
                        return Err(err);
                    }
                }
            }
        }
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    instructions: &'a str,
    input: &'a [Value],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ResponsesTool]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel_tool_calls: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ResponsesTool {
    r#type: &'static str,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    parameters: Value,
    strict: bool,
}

fn convert_tool(tool: &ToolDefinition) -> ResponsesTool {
    ResponsesTool {
        r#type: "function",
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: tool
            .input_schema
            .clone()
            .unwrap_or_else(|| json!({ "type": "object" })),
        strict: tool.strict.unwrap_or(true),
    }
}

#[derive(Debug, Deserialize)]
struct ResponsesApiResponse {
    #[serde(default)]
    output: Vec<Value>,
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    usage: Option<ResponsesUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponsesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    total_tokens: Option<u64>,
}

impl ResponsesUsage {
    fn to_usage(&self) -> Usage {
        Usage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            total_tokens: self
                .total_tokens
                .unwrap_or(self.input_tokens + self.output_tokens),
        }
    }
}

/// Output item shapes we act on; everything else passes through opaquely.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponsesOutputItem {
    #[serde(rename = "function_call")]
    FunctionCall(FunctionCallItem),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct FunctionCallItem {
    call_id: String,
    name: String,
    #[serde(default)]
    arguments: String,
}

/// Fallback final-text extraction: concatenated `output_text` blocks of
/// `message` items, in order.
fn collect_output_text(output: &[Value]) -> String {
    let mut text = String::new();
    for item in output {
        if item.get("type").and_then(Value::as_str) != Some("message") {
            continue;
        }
        let Some(content) = item.get("content").and_then(Value::as_array) else {
            continue;
        };
        for block in content {
            if block.get("type").and_then(Value::as_str) == Some("output_text") {
                if let Some(t) = block.get("text").and_then(Value::as_str) {
                    text.push_str(t);
                }
            }
        }
    }
    text
}
