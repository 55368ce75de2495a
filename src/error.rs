//! Error types for the promptmgr evaluation core.

use thiserror::Error;

/// Result type alias using our error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the evaluation core.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors (fatal before a run produces a report)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider/API errors (fatal for the current case)
    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Tool-runner errors, carrying a machine-readable code
    #[error("Tool runner error: {code}: {message}")]
    ToolRunner {
        code: ToolErrorCode,
        message: String,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a provider error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a tool-runner error with a fixed code.
    pub fn tool_runner(code: ToolErrorCode, message: impl Into<String>) -> Self {
        Self::ToolRunner {
            code,
            message: message.into(),
        }
    }

    /// The error code recorded on a `CaseResult` when this error aborts a
    /// case pipeline. Tool-runner errors keep their own code; everything
    /// else collapses to `CASE_ERROR`.
    pub fn case_code(&self) -> &'static str {
        match self {
            Self::ToolRunner { code, .. } => code.as_str(),
            _ => "CASE_ERROR",
        }
    }
}

/// Closed set of tool-runner failure codes.
///
/// These cross the worker IPC boundary as strings, so the string forms are
/// part of the external contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorCode {
    InvalidCommand,
    CommandNotAllowlisted,
    ToolTimeout,
    ToolProcessError,
    ToolEmptyResponse,
    ToolInvalidResponse,
    ToolInputError,
    ToolExecutionError,
    ToolsModuleNotFound,
    HandlersMissing,
    ToolNotFound,
    InvalidWorkerArgs,
}

impl ToolErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCommand => "INVALID_COMMAND",
            Self::CommandNotAllowlisted => "COMMAND_NOT_ALLOWLISTED",
            Self::ToolTimeout => "TOOL_TIMEOUT",
            Self::ToolProcessError => "TOOL_PROCESS_ERROR",
            Self::ToolEmptyResponse => "TOOL_EMPTY_RESPONSE",
            Self::ToolInvalidResponse => "TOOL_INVALID_RESPONSE",
            Self::ToolInputError => "TOOL_INPUT_ERROR",
            Self::ToolExecutionError => "TOOL_EXECUTION_ERROR",
            Self::ToolsModuleNotFound => "TOOLS_MODULE_NOT_FOUND",
            Self::HandlersMissing => "HANDLERS_MISSING",
            Self::ToolNotFound => "TOOL_NOT_FOUND",
            Self::InvalidWorkerArgs => "INVALID_WORKER_ARGS",
        }
    }

    /// Map a worker-reported code string back to the enum. Unknown codes
    /// fall back to `TOOL_EXECUTION_ERROR`.
    pub fn from_worker_code(code: &str) -> Self {
        match code {
            "INVALID_COMMAND" => Self::InvalidCommand,
            "COMMAND_NOT_ALLOWLISTED" => Self::CommandNotAllowlisted,
            "TOOL_TIMEOUT" => Self::ToolTimeout,
            "TOOL_PROCESS_ERROR" => Self::ToolProcessError,
            "TOOL_EMPTY_RESPONSE" => Self::ToolEmptyResponse,
            "TOOL_INVALID_RESPONSE" => Self::ToolInvalidResponse,
            "TOOL_INPUT_ERROR" => Self::ToolInputError,
            "TOOLS_MODULE_NOT_FOUND" => Self::ToolsModuleNotFound,
            "HANDLERS_MISSING" => Self::HandlersMissing,
            "TOOL_NOT_FOUND" => Self::ToolNotFound,
            "INVALID_WORKER_ARGS" => Self::InvalidWorkerArgs,
            _ => Self::ToolExecutionError,
        }
    }
}

impl std::fmt::Display for ToolErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_code_for_tool_runner_errors() {
        let err = Error::tool_runner(ToolErrorCode::ToolTimeout, "tool echo timed out");
        assert_eq!(err.case_code(), "TOOL_TIMEOUT");
    }

    #[test]
    fn test_case_code_fallback() {
        let err = Error::provider("openai", "Provider request failed (500): boom");
        assert_eq!(err.case_code(), "CASE_ERROR");
    }

    #[test]
    fn test_worker_code_round_trip() {
        for code in [
            ToolErrorCode::ToolExecutionError,
            ToolErrorCode::ToolsModuleNotFound,
            ToolErrorCode::HandlersMissing,
            ToolErrorCode::ToolNotFound,
            ToolErrorCode::InvalidWorkerArgs,
        ] {
            assert_eq!(ToolErrorCode::from_worker_code(code.as_str()), code);
        }
    }

    #[test]
    fn test_unknown_worker_code_falls_back() {
        assert_eq!(
            ToolErrorCode::from_worker_code("E_SOMETHING_NEW"),
            ToolErrorCode::ToolExecutionError
        );
    }
}
