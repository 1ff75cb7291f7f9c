//! Error handling for PubliCast
//!
//! Every error carries enough context (command text, endpoint names,
//! parameter bounds) to be diagnosed from a single log line.

use thiserror::Error;

/// Result type alias for PubliCast operations
pub type Result<T> = std::result::Result<T, PubliCastError>;

/// Main error type for PubliCast operations
#[derive(Error, Debug)]
pub enum PubliCastError {
    // Transport Errors
    #[error("No scripting endpoints found (looked for: {}; visible: {})", .tried.join(", "), fmt_list(.visible))]
    DiscoveryEmpty {
        tried: Vec<String>,
        visible: Vec<String>,
    },

    #[error("Could not connect to the editor pipes: {reason} (tried: {}; visible: {})", .tried.join(", "), fmt_list(.visible))]
    ConnectFailed {
        reason: String,
        tried: Vec<String>,
        visible: Vec<String>,
    },

    #[error("No channel set; connect before running '{command}'")]
    NotConnected { command: String },

    #[error("Channel closed by the editor")]
    ChannelClosed,

    #[error("No response to '{command}' within {timeout_ms} ms")]
    Timeout { command: String, timeout_ms: u64 },

    #[error("Editor rejected '{command}': {response}")]
    Rejected { command: String, response: String },

    #[error("Invalid command '{command}': {reason}")]
    InvalidCommand { command: String, reason: String },

    #[error("I/O failure on {endpoint}: {source}")]
    IoFailure {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    // Compressor Errors
    #[error("Invalid compressor setting {param} = {value} (expected {expected})")]
    InvalidConfig {
        param: String,
        value: String,
        expected: String,
    },

    // Audio File Errors
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid audio file: {reason}")]
    InvalidAudio {
        reason: String,
        #[source]
        source: Option<hound::Error>,
    },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn fmt_list(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

impl PubliCastError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            PubliCastError::DiscoveryEmpty { .. } => "DISCOVERY_EMPTY",
            PubliCastError::ConnectFailed { .. } => "CONNECT_FAILED",
            PubliCastError::NotConnected { .. } => "NOT_CONNECTED",
            PubliCastError::ChannelClosed => "CHANNEL_CLOSED",
            PubliCastError::Timeout { .. } => "TIMEOUT",
            PubliCastError::Rejected { .. } => "REJECTED",
            PubliCastError::InvalidCommand { .. } => "INVALID_COMMAND",
            PubliCastError::IoFailure { .. } => "IO_FAILURE",
            PubliCastError::InvalidConfig { .. } => "INVALID_CONFIG",
            PubliCastError::FileNotFound { .. } => "FILE_NOT_FOUND",
            PubliCastError::InvalidAudio { .. } => "INVALID_AUDIO",
            PubliCastError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            PubliCastError::Io(_) => "IO_ERROR",
            PubliCastError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors leave the caller free to retry, skip the command
    /// or fall back to offline processing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PubliCastError::DiscoveryEmpty { .. }
                | PubliCastError::ConnectFailed { .. }
                | PubliCastError::Timeout { .. }
                | PubliCastError::Rejected { .. }
                | PubliCastError::IoFailure { .. }
                | PubliCastError::FileNotFound { .. }
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            PubliCastError::DiscoveryEmpty { .. } | PubliCastError::ConnectFailed { .. } => vec![
                "Check that Audacity is running",
                "Enable mod-script-pipe in Preferences > Modules",
                "Restart Audacity after enabling mod-script-pipe",
                "Run this tool with the same privileges as Audacity",
            ],
            PubliCastError::NotConnected { .. } => {
                vec!["Connect an editor session before sending commands"]
            }
            PubliCastError::ChannelClosed => vec![
                "Audacity closed the pipe - it may have exited",
                "Reconnect once Audacity is running again",
            ],
            PubliCastError::Timeout { .. } => vec![
                "Audacity may be busy with a long operation - retry with a longer timeout",
                "Check for an open modal dialog in Audacity",
            ],
            PubliCastError::Rejected { .. } => vec![
                "Check the command name and parameter spelling",
                "Make sure a track is selected when the command needs one",
            ],
            PubliCastError::InvalidConfig { .. } => {
                vec!["Use a value inside the documented range for this setting"]
            }
            PubliCastError::FileNotFound { .. } => vec![
                "Check the file path is correct",
                "Verify the file hasn't been moved or deleted",
            ],
            PubliCastError::InvalidAudio { .. } | PubliCastError::UnsupportedFormat { .. } => vec![
                "Export the audio as uncompressed WAV (16/24-bit PCM or 32-bit float)",
            ],
            _ => vec![],
        }
    }
}
