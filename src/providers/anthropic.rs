//! Anthropic Messages API tool-calling loop.
//!
//! Conversation state is a list of role-tagged messages. After a turn with
//! tool use, the model's entire content array is appended as an assistant
//! message, followed by a single user message of `tool_result` blocks.

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

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_API_VERSION: &str = "2023-06-01";
const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
const MAX_TOKENS: u32 = 2048;

// ============================================================================
// Provider
// ============================================================================

/// Anthropic Messages API adapter.
pub struct AnthropicProvider {
    client: reqwest::Client,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: ANTHROPIC_BASE_URL.to_string(),
        }
    }

    /// Create with a custom base URL (test harness, proxy).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/messages", self.base_url)
    }
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    async fn invoke_with_tools(&self, req: ProviderRequest<'_>) -> Result<ProviderResponse> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| Error::config(format!("Missing Anthropic API key in {API_KEY_ENV}")))?;
        let url = self.endpoint();

        let tools: Vec<AnthropicTool> = req.tools.iter().map(convert_tool).collect();
        let mut messages: Vec<MessageTurn> = vec![MessageTurn {
            role: "user",
            content: Value::String(input_as_text(req.input)),
        }];

        let mut trace: Vec<ToolCallTrace> = Vec::new();
        let mut usage = Usage::default();
        let mut saw_usage = false;
        let mut calls_used = 0usize;

        loop {
            let body = MessagesRequest {
                model: req.model,
                max_tokens: MAX_TOKENS,
                system: req.prompt,
                messages: &messages,
                tools: (!tools.is_empty()).then_some(tools.as_slice()),
            };
            let raw = post_provider_json(
                &self.client,
                self.id(),
                &url,
                &[
                    ("x-api-key", api_key.as_str()),
                    ("anthropic-version", ANTHROPIC_API_VERSION),
                ],
                &body,
            )
            .await?;

            let parsed: MessagesResponse = serde_json::from_value(raw.clone()).map_err(|err| {
                Error::provider(self.id().as_str(), format!("unexpected response shape: {err}"))
            })?;

            if let Some(turn_usage) = &parsed.usage {
                usage.add(&turn_usage.to_usage());
                saw_usage = true;
            }

            let tool_uses: Vec<ToolUseBlock> = parsed
                .content
                .iter()
                .filter_map(|block| {
                    match serde_json::from_value::<MessagesContentBlock>(block.clone()) {
                        Ok(MessagesContentBlock::ToolUse(tool_use)) => Some(tool_use),
                        _ => None,
                    }
                })
                .collect();

            if tool_uses.is_empty() {
                let text = collect_text(&parsed.content);
                return Ok(ProviderResponse {
                    final_output: parse_maybe_json(&text),
                    usage: saw_usage.then_some(usage),
                    raw,
                    tool_trace: trace,
                });
            }

            if calls_used + tool_uses.len() > req.max_tool_calls {
                return Err(Error::provider(
                    self.id().as_str(),
                    format!("exceeded maxToolCalls={}", req.max_tool_calls),
                ));
            }

            // The assistant turn carries the model's content array verbatim.
            messages.push(MessageTurn {
                role: "assistant",
                content: Value::Array(parsed.content.clone()),
            });

            let mut result_blocks: Vec<Value> = Vec::new();
            for tool_use in tool_uses {
                let invocation = ToolInvocation {
                    id: tool_use.id.clone(),
                    name: tool_use.name.clone(),
                    args: tool_use.input.clone(),
                };
                let started = Instant::now();
                match req.invoker.invoke(&invocation).await {
                    Ok(result) => {
                        trace.push(ToolCallTrace {
                            id: tool_use.id.clone(),
                            name: tool_use.name,
                            args: tool_use.input,
                            result: Some(result.clone()),
                            latency_ms: started.elapsed().as_millis() as u64,
                            status: ToolCallStatus::Ok,
                            error_code: None,
                            error_message: None,
                        });
                        result_blocks.push(json!({
                            "type": "tool_result",
                            "tool_use_id": tool_use.id,
                            "content": tool_output_string(&result),
                        }));
                        calls_used += 1;
                    }
                    Err(err) => {
                        trace.push(ToolCallTrace {
                            id: tool_use.id,
                            name: tool_use.name,
                            args: tool_use.input,
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

            messages.push(MessageTurn {
                role: "user",
                content: Value::Array(result_blocks),
            });
        }
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [MessageTurn],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [AnthropicTool]>,
}

#[derive(Debug, Serialize)]
struct MessageTurn {
    role: &'static str,
    content: Value,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    input_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

fn convert_tool(tool: &ToolDefinition) -> AnthropicTool {
    AnthropicTool {
        name: tool.name.clone(),
        input_schema: tool
            .input_schema
            .clone()
            .unwrap_or_else(|| json!({ "type": "object" })),
        description: tool.description.clone(),
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<Value>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl AnthropicUsage {
    fn to_usage(&self) -> Usage {
        Usage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            total_tokens: self.input_tokens + self.output_tokens,
        }
    }
}

/// Content block shapes we act on; everything else passes through opaquely.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum MessagesContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse(ToolUseBlock),
    #[serde(rename = "text")]
    Text(TextBlock),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ToolUseBlock {
    id: String,
    name: String,
    #[serde(default)]
    input: Value,
}

#[derive(Debug, Deserialize)]
struct TextBlock {
    text: String,
}

/// Concatenated text blocks, in order.
fn collect_text(content: &[Value]) -> String {
    let mut text = String::new();
    for block in content {
        if let Ok(MessagesContentBlock::Text(t)) =
            serde_json::from_value::<MessagesContentBlock>(block.clone())
        {
            text.push_str(&t.text);
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_tool() {
        let tool = ToolDefinition {
            name: "lookup_booking".to_string(),
            description: Some("Find a booking".to_string()),
            input_schema: Some(json!({ "type": "object" })),
            strict: None,
        };
        let converted = convert_tool(&tool);
        assert_eq!(converted.name, "lookup_booking");
        assert_eq!(converted.input_schema, json!({ "type": "object" }));
    }

    #[test]
    fn test_content_block_detection() {
        let block = json!({
            "type": "tool_use",
            "id": "toolu_1",
            "name": "lookup_booking",
            "input": { "id": "B-1" }
        });
        match serde_json::from_value::<MessagesContentBlock>(block).unwrap() {
            MessagesContentBlock::ToolUse(tool_use) => {
                assert_eq!(tool_use.id, "toolu_1");
                assert_eq!(tool_use.input, json!({ "id": "B-1" }));
            }
            _ => panic!("expected tool_use"),
        }

        let unknown = json!({ "type": "thinking", "thinking": "..." });
        assert!(matches!(
            serde_json::from_value::<MessagesContentBlock>(unknown).unwrap(),
            MessagesContentBlock::Other
        ));
    }

    #[test]
    fn test_collect_text_concatenates_in_order() {
        let content = vec![
            json!({ "type": "text", "text": "{\"a\":" }),
            json!({ "type": "thinking", "thinking": "hmm" }),
            json!({ "type": "text", "text": "1}" }),
        ];
        assert_eq!(collect_text(&content), "{\"a\":1}");
    }

    #[test]
    fn test_request_carries_fixed_fields() {
        let messages = vec![MessageTurn {
            role: "user",
            content: Value::String("hi".to_string()),
        }];
        let body = MessagesRequest {
            model: "claude-sonnet-4-5",
            max_tokens: MAX_TOKENS,
            system: "extract",
            messages: &messages,
            tools: None,
        };
        let rendered = serde_json::to_value(&body).unwrap();
        assert_eq!(rendered["max_tokens"], json!(2048));
        assert_eq!(rendered["system"], json!("extract"));
        assert!(rendered.get("tools").is_none());
    }
}
