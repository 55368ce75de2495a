//! Provider abstraction layer.
//!
//! This module defines the uniform request/response contract that the three
//! backend-specific tool-calling loops implement, plus the closed provider
//! identity type used for dispatch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::model::{ToolCallTrace, ToolDefinition, Usage};

// ============================================================================
// Provider Identity
// ============================================================================

/// Closed set of supported backends. Unknown identifiers are a
/// configuration-time error; the core has no open plugin surface.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenAI,
    Anthropic,
    Google,
}

impl ProviderId {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Self::OpenAI),
            "anthropic" => Ok(Self::Anthropic),
            "google" => Ok(Self::Google),
            other => Err(format!("Unknown provider: {other}")),
        }
    }
}

// ============================================================================
// Tool Invocation
// ============================================================================

/// A model-initiated request to execute one named tool.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// Callback seam between a provider loop and the sandboxed tool runner.
///
/// The orchestrator binds this to a per-case runner invocation; tests bind
/// it to canned results.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, call: &ToolInvocation) -> Result<Value>;
}

// ============================================================================
// Request / Response
// ============================================================================

/// A uniform tool-loop request, independent of backend wire formats.
pub struct ProviderRequest<'a> {
    /// Backend model identifier.
    pub model: &'a str,
    /// System instruction (the prompt body under evaluation).
    pub prompt: &'a str,
    /// Case input; strings are sent verbatim, everything else JSON-encoded.
    pub input: &'a Value,
    pub tools: &'a [ToolDefinition],
    /// Hard cap on tool invocations across the whole loop.
    pub max_tool_calls: usize,
    pub invoker: &'a dyn ToolInvoker,
}

/// The outcome of a completed tool-calling loop.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// The model's final output: parsed JSON when parseable, else the
    /// trimmed final text.
    pub final_output: Value,
    pub usage: Option<Usage>,
    /// The last raw wire response, passed through for diagnostics.
    pub raw: Value,
    pub tool_trace: Vec<ToolCallTrace>,
}

/// A provider adapter: one tool-calling state machine per backend.
///
/// Adapters are stateless singletons registered once per process; see
/// [`crate::providers`].
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> ProviderId;

    async fn invoke_with_tools(&self, req: ProviderRequest<'_>) -> Result<ProviderResponse>;
}
