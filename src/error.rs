use thiserror::Error;

use crate::sandbox::SandboxState;

#[derive(Error, Debug)]
pub enum LiveboxError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    // Sandbox errors
    #[error("Sandbox backend '{backend}' not available: {reason}")]
    BackendNotAvailable { backend: String, reason: String },

    #[error("Sandbox initialization failed: {0}")]
    SandboxInit(String),

    #[error("Mount failed: {0}")]
    Mount(String),

    #[error("Command execution failed in sandbox: {0}")]
    SandboxExecution(String),

    #[error("Dependency install exited with code {exit_code}")]
    InstallFailed { exit_code: i32 },

    #[error("Dev server failed to start: {0}")]
    ServerStart(String),

    #[error("Invalid sandbox transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: SandboxState,
        to: SandboxState,
    },

    #[error("Process output stream failed: {0}")]
    OutputStream(String),

    // File system errors
    #[error("File not found in sandbox: {path}")]
    FileNotFound { path: String },

    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("Archive error: {0}")]
    Archive(String),

    // Edit errors
    #[error("Failed to apply edit to {path}: {reason}")]
    EditResolution { path: String, reason: String },

    // Tool approval errors
    #[error("Tool call '{id}' is already awaiting a decision")]
    DuplicateToolCall { id: String },

    #[error("Tool call '{id}' was cancelled before a decision arrived")]
    ApprovalCancelled { id: String },

    #[error("Tool approval timed out after {seconds} seconds")]
    ApprovalTimeout { seconds: u64 },

    #[error("Remote store error: {message}")]
    RemoteStore {
        message: String,
        status: Option<u16>,
    },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // Generic wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LiveboxError {
    /// Errors that end the sandbox session. The lifecycle moves to `Error`
    /// and never retries on its own.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::BackendNotAvailable { .. }
                | Self::SandboxInit(_)
                | Self::Mount(_)
                | Self::InstallFailed { .. }
                | Self::ServerStart(_)
                | Self::OutputStream(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LiveboxError>;
