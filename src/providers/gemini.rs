//! Google Gemini generateContent tool-calling loop.
//!
//! Conversation state is a list of role-tagged content entries. Each
//! function call gets a `model` turn carrying the call and a `user` turn
//! carrying the function response. The wire format does not always assign
//! call ids, so missing ids are synthesized.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::model::{ToolCallStatus, ToolCallTrace, ToolDefinition, Usage};
use crate::provider::{Provider, ProviderId, ProviderRequest, ProviderResponse, ToolInvocation};
use crate::providers::{input_as_text, parse_maybe_json, post_provider_json};

// ============================================================================
// Constants
// ============================================================================

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const API_KEY_ENV: &str = "GEMINI_API_KEY";
const API_KEY_FALLBACK_ENV: &str = "GOOGLE_API_KEY";

// ============================================================================
// Provider
// ============================================================================

/// Google Gemini API adapter.
pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
}

impl GeminiProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    /// Create with a custom base URL (test harness, proxy).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self, model: &str, api_key: &str) -> String {
        let model_path = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        format!(
            "{}/{model_path}:generateContent?key={api_key}",
            self.base_url
        )
    }
}

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Google
    }

    async fn invoke_with_tools(&self, req: ProviderRequest<'_>) -> Result<ProviderResponse> {
        let api_key = std::env::var(API_KEY_ENV)
            .or_else(|_| std::env::var(API_KEY_FALLBACK_ENV))
            .map_err(|_| {
                Error::config(format!(
                    "Missing Gemini API key in {API_KEY_ENV} or {API_KEY_FALLBACK_ENV}"
                ))
            })?;
        let url = self.endpoint(req.model, &api_key);

        let tools: Vec<GeminiTool> = if req.tools.is_empty() {
            Vec::new()
        } else {
            vec![GeminiTool {
                function_declarations: req.tools.iter().map(convert_tool).collect(),
            }]
        };

        let mut contents: Vec<GeminiContent> = vec![GeminiContent {
            role: Some("user".to_string()),
            parts: vec![GeminiPart::Text {
                text: input_as_text(req.input),
            }],
        }];

        let mut trace: Vec<ToolCallTrace> = Vec::new();
        let mut usage = Usage::default();
        let mut saw_usage = false;
        let mut calls_used = 0usize;

        loop {
            let body = GenerateContentRequest {
                system_instruction: GeminiContent {
                    role: None,
                    parts: vec![GeminiPart::Text {
                        text: req.prompt.to_string(),
                    }],
                },
                contents: &contents,
                tools: (!tools.is_empty()).then_some(tools.as_slice()),
            };
            let raw = post_provider_json(&self.client, self.id(), &url, &[], &body).await?;

            let parsed: GenerateContentResponse =
                serde_json::from_value(raw.clone()).map_err(|err| {
                    Error::provider(self.id().as_str(), format!("unexpected response shape: {err}"))
                })?;

            if let Some(metadata) = &parsed.usage_metadata {
                usage.add(&metadata.to_usage());
                saw_usage = true;
            }

            let parts: Vec<Value> = parsed
                .candidates
                .first()
                .and_then(|candidate| candidate.content.as_ref())
                .map(|content| content.parts.clone())
                .unwrap_or_default();

            let calls: Vec<FunctionCallPart> = parts
                .iter()
                .filter_map(|part| {
                    part.get("functionCall")
                        .and_then(|call| serde_json::from_value(call.clone()).ok())
                })
                .collect();

            if calls.is_empty() {
                let text: String = parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect();
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

            for call in calls {
                let id = call
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
                let invocation = ToolInvocation {
                    id: id.clone(),
                    name: call.name.clone(),
                    args: call.args.clone(),
                };

                contents.push(GeminiContent {
                    role: Some("model".to_string()),
                    parts: vec![GeminiPart::FunctionCall {
                        function_call: GeminiFunctionCall {
                            id: Some(id.clone()),
                            name: call.name.clone(),
                            args: call.args.clone(),
                        },
                    }],
                });

                let started = Instant::now();
                match req.invoker.invoke(&invocation).await {
                    Ok(result) => {
                        trace.push(ToolCallTrace {
                            id,
                            name: call.name.clone(),
                            args: call.args,
                            result: Some(result.clone()),
                            latency_ms: started.elapsed().as_millis() as u64,
                            status: ToolCallStatus::Ok,
                            error_code: None,
                            error_message: None,
                        });
                        contents.push(GeminiContent {
                            role: Some("user".to_string()),
                            parts: vec![GeminiPart::FunctionResponse {
                                function_response: GeminiFunctionResponse {
                                    name: call.name,
                                    response: json!({ "result": result }),
                                },
                            }],
                        });
                        calls_used += 1;
                    }
                    Err(err) => {
                        trace.push(ToolCallTrace {
                            id,
                            name: call.name,
                            args: call.args,
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
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: GeminiContent,
    contents: &'a [GeminiContent],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [GeminiTool]>,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiFunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: GeminiFunctionResponse,
    },
}

#[derive(Debug, Clone, Serialize)]
struct GeminiFunctionCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    args: Value,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    parameters: Value,
}

fn convert_tool(tool: &ToolDefinition) -> GeminiFunctionDeclaration {
    GeminiFunctionDeclaration {
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: tool
            .input_schema
            .clone()
            .unwrap_or_else(|| json!({ "type": "object" })),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct FunctionCallPart {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: Option<u64>,
    #[serde(default)]
    candidates_token_count: Option<u64>,
    #[serde(default)]
    total_token_count: Option<u64>,
}

impl GeminiUsageMetadata {
    fn to_usage(&self) -> Usage {
        let input = self.prompt_token_count.unwrap_or(0);
        let output = self.candidates_token_count.unwrap_or(0);
        Usage {
            input_tokens: input,
            output_tokens: output,
            total_tokens: self.total_token_count.unwrap_or(input + output),
        }
    }
}
