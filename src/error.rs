use thiserror::Error;

/// Input problems caught before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Namespace is required")]
    MissingNamespace,
    #[error("Select at least one application")]
    EmptySelection,
    #[error("Platform deletion must be confirmed")]
    DeleteNotConfirmed,
    #[error("No platform to delete")]
    NoPlatformToDelete,
}

/// Why an action entry point refused to start an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("Another operation or platform refresh is in progress")]
    Busy,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("tracker is no longer running")]
    Stopped,
}

/// Failure talking to the orchestration service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Text shown to the user after the status prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Transport(msg) | Self::Decode(msg) => msg,
            Self::Status { message, .. } => message,
        }
    }

    /// Build a status error from a response body, preferring the payload's
    /// `error` (or `message`) field over the raw text.
    pub fn from_body(status: u16, body: &str) -> Self {
        let from_json = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| {
                v.get("error")
                    .or_else(|| v.get("message"))
                    .and_then(|m| m.as_str())
                    .map(String::from)
            });
        let message = match from_json {
            Some(msg) if !msg.trim().is_empty() => msg,
            _ if !body.trim().is_empty() => body.trim().to_string(),
            _ => format!("HTTP {status}"),
        };
        Self::Status { status, message }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
