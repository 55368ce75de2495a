//! Provider adapter implementations and the process-wide registry.
//!
//! The registry is the only intentional process-global: filled once from
//! configuration, read-only while a run executes. Unknown provider tags are
//! a configuration-time error; there is no open plugin surface.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use serde_json::Value;

use crate::config::ProvidersConfig;
use crate::error::{Error, Result};
use crate::provider::{Provider, ProviderId};

pub mod anthropic;
pub mod gemini;
pub mod openai_responses;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai_responses::OpenAiResponsesProvider;

// ============================================================================
// Registry
// ============================================================================

struct Registry {
    adapters: RwLock<BTreeMap<ProviderId, Arc<dyn Provider>>>,
    builtins_registered: AtomicBool,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| Registry {
        adapters: RwLock::new(BTreeMap::new()),
        builtins_registered: AtomicBool::new(false),
    })
}

fn read_adapters(reg: &Registry) -> RwLockReadGuard<'_, BTreeMap<ProviderId, Arc<dyn Provider>>> {
    match reg.adapters.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_adapters(reg: &Registry) -> RwLockWriteGuard<'_, BTreeMap<ProviderId, Arc<dyn Provider>>> {
    match reg.adapters.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Register the three built-in adapters. Idempotent: only the first call per
/// process takes effect; later calls are no-ops even with a different
/// endpoint configuration.
pub fn register_builtin_providers(config: &ProvidersConfig) {
    let reg = registry();
    if reg.builtins_registered.swap(true, Ordering::SeqCst) {
        return;
    }

    let mut openai = OpenAiResponsesProvider::new();
    if let Some(url) = &config.openai.base_url {
        openai = openai.with_base_url(url);
    }
    let mut anthropic = AnthropicProvider::new();
    if let Some(url) = &config.anthropic.base_url {
        anthropic = anthropic.with_base_url(url);
    }
    let mut google = GeminiProvider::new();
    if let Some(url) = &config.google.base_url {
        google = google.with_base_url(url);
    }

    // Explicitly registered adapters (the test-only entry point) keep
    // precedence over the builtins.
    let mut adapters = write_adapters(reg);
    adapters
        .entry(ProviderId::OpenAI)
        .or_insert_with(|| Arc::new(openai));
    adapters
        .entry(ProviderId::Anthropic)
        .or_insert_with(|| Arc::new(anthropic));
    adapters
        .entry(ProviderId::Google)
        .or_insert_with(|| Arc::new(google));
}

/// Look up the adapter for a provider tag.
pub fn provider_for(id: ProviderId) -> Result<Arc<dyn Provider>> {
    read_adapters(registry())
        .get(&id)
        .cloned()
        .ok_or_else(|| Error::config(format!("Provider {id} is not registered")))
}

/// Test-only: install (or replace) an adapter under its own tag.
#[doc(hidden)]
pub fn register_provider(adapter: Arc<dyn Provider>) {
    let reg = registry();
    write_adapters(reg).insert(adapter.id(), adapter);
}

/// Test-only: drop all registrations so the next
/// [`register_builtin_providers`] call takes effect again.
#[doc(hidden)]
pub fn reset_registry() {
    let reg = registry();
    write_adapters(reg).clear();
    reg.builtins_registered.store(false, Ordering::SeqCst);
}

// ============================================================================
// Shared wire helpers
// ============================================================================

const BODY_HEAD_CHARS: usize = 400;

/// POST a JSON body and return the parsed JSON response.
///
/// Non-2xx statuses and unparsable bodies become provider errors carrying
/// the first 400 characters of the body.
pub(crate) async fn post_provider_json<T: Serialize>(
    client: &reqwest::Client,
    provider: ProviderId,
    url: &str,
    headers: &[(&str, &str)],
    body: &T,
) -> Result<Value> {
    let mut request = client
        .post(url)
        .header("content-type", "application/json")
        .json(body);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }

    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(Error::provider(
            provider.as_str(),
            format!(
                "Provider request failed ({}): {}",
                status.as_u16(),
                body_head(&text)
            ),
        ));
    }

    serde_json::from_str(&text).map_err(|_| {
        Error::provider(
            provider.as_str(),
            format!("Provider returned invalid JSON: {}", body_head(&text)),
        )
    })
}

/// First 400 characters of a response body, for error messages.
pub(crate) fn body_head(body: &str) -> &str {
    match body.char_indices().nth(BODY_HEAD_CHARS) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// The model's final text, interpreted as JSON when it parses, else kept as
/// the trimmed string (empty text stays an empty string).
pub(crate) fn parse_maybe_json(text: &str) -> Value {
    let trimmed = text.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => value,
        Err(_) => Value::String(trimmed.to_string()),
    }
}

/// Case input rendered for the opening user turn: strings go verbatim,
/// everything else is JSON-encoded.
pub(crate) fn input_as_text(input: &Value) -> String {
    match input {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Tool results surfaced back to the model: raw strings stay raw, other
/// values are JSON-encoded.
pub(crate) fn tool_output_string(result: &Value) -> String {
    match result {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
