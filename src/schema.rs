//! JSON-Schema validation wrapper.
//!
//! Thin layer over the `jsonschema` crate: compile once per run, validate
//! per case, and render errors as short greppable strings.

use serde_json::Value;

use crate::error::{Error, Result};

/// A compiled schema document.
#[derive(Debug)]
pub struct SchemaValidator {
    compiled: jsonschema::JSONSchema,
}

/// The verdict for one instance.
#[derive(Debug, Clone, Default)]
pub struct SchemaResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl SchemaValidator {
    /// Compile a schema document. A malformed document is a configuration
    /// error surfaced before any case runs.
    pub fn compile(schema: &Value) -> Result<Self> {
        let compiled = jsonschema::JSONSchema::compile(schema)
            .map_err(|err| Error::config(format!("invalid JSON schema: {err}")))?;
        Ok(Self { compiled })
    }

    /// Validate an instance. Each error is rendered as
    /// `"<instance-path-or-(root)> <message>"` in the validator's stable
    /// natural order.
    pub fn validate(&self, instance: &Value) -> SchemaResult {
        match self.compiled.validate(instance) {
            Ok(()) => SchemaResult {
                valid: true,
                errors: Vec::new(),
            },
            Err(errors) => {
                let errors: Vec<String> = errors
                    .map(|err| {
                        let path = err.instance_path.to_string();
                        let path = if path.is_empty() { "(root)" } else { &path };
                        format!("{path} {err}")
                    })
                    .collect();
                SchemaResult {
                    valid: false,
                    errors,
                }
            }
        }
    }
}
