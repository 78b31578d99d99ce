/// Result alias that carries the custom [`TelemetryError`] type.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Free-form message, mostly used for poisoned shared state.
    #[error("{0}")]
    Message(String),
    /// Sizing parameters the pipeline cannot start with.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The capture backend refused to open or start a stream.
    #[error("capture failed: {0}")]
    Capture(String),
    /// The transform backend rejected the buffers it was handed.
    #[error("fft failed: {0}")]
    Fft(#[from] realfft::FftError),
    /// Wrapper around standard IO errors (thread spawning, config files).
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Malformed JSON configuration.
    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TelemetryError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        Self::Message(format!("{what} has been poisoned"))
    }
}

impl From<&str> for TelemetryError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for TelemetryError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
