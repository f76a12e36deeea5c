//! Error types for the external tool adapters

use thiserror::Error;

/// Result type alias for tool operations
pub type Result<T> = std::result::Result<T, ToolError>;

/// Errors that can occur when driving an external tool
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool binary could not be started
    #[error("Failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool ran and exited unsuccessfully for an unclassified reason
    #[error("{tool} exited with code {exit_code}: {stderr}")]
    CommandFailed {
        tool: String,
        exit_code: i32,
        stderr: String,
    },

    /// Credentials missing, expired or lacking permission
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// Malformed manifest, variable file or arguments
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Irrecoverable resource conflict
    #[error("Resource conflict: {0}")]
    Conflict(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Endpoint or service temporarily unreachable
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Failed to parse tool output
    #[error("Failed to parse {what}: {message}")]
    ParseError { what: String, message: String },

    /// Local I/O around a tool invocation (reading manifests, writing stdin)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    pub fn parse_error(what: impl Into<String>, message: impl ToString) -> Self {
        Self::ParseError {
            what: what.into(),
            message: message.to_string(),
        }
    }

    /// Errors that retrying cannot fix
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized(_)
                | Self::InvalidConfig(_)
                | Self::Conflict(_)
                | Self::ParseError { .. }
        )
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Classifies a failed command from its stderr
    ///
    /// Matches the wording used by terraform, docker and kubectl for
    /// authorization, validation and conflict failures. Anything else is
    /// reported as a plain `CommandFailed`, which callers treat as transient.
    pub fn from_command_failure(tool: &str, exit_code: i32, stderr: &str) -> Self {
        let lower = stderr.to_lowercase();
        let message = format!("{}: {}", tool, stderr.trim());

        if lower.contains("unauthorized")
            || lower.contains("forbidden")
            || lower.contains("accessdenied")
            || lower.contains("access denied")
            || lower.contains("expiredtoken")
            || lower.contains("no valid credential")
        {
            Self::Unauthorized(message)
        } else if lower.contains("error validating")
            || lower.contains("invalid value")
            || lower.contains("unsupported argument")
            || lower.contains("is invalid")
            || lower.contains("dockerfile parse error")
            || lower.contains("no such file or directory")
        {
            Self::InvalidConfig(message)
        } else if lower.contains("field is immutable") || lower.contains("resourceinuse") {
            Self::Conflict(message)
        } else if lower.contains("notfound") || lower.contains("not found") {
            Self::NotFound(message)
        } else if lower.contains("connection refused")
            || lower.contains("i/o timeout")
            || lower.contains("tls handshake timeout")
            || lower.contains("unable to connect")
        {
            Self::Unavailable(message)
        } else {
            Self::CommandFailed {
                tool: tool.to_string(),
                exit_code,
                stderr: stderr.trim().to_string(),
            }
        }
    }
}
