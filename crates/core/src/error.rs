/// Result alias that carries the custom [`BulbError`] type.
pub type Result<T> = std::result::Result<T, BulbError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum BulbError {
    /// Capture could not start: permission denied or no usable input device.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),
    /// A fixed-size buffer handed between pipeline stages had the wrong
    /// length. This is a programming error and processing stops on it.
    #[error("{stage}: expected {expected} values, got {actual}")]
    ContractViolation {
        stage: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A fixture command batch could not be applied. The next frame's batch
    /// supersedes it, so callers log and move on.
    #[error("fixture delivery failed: {0}")]
    DeliveryFailure(String),
    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl BulbError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub(crate) fn contract(stage: &'static str, expected: usize, actual: usize) -> Self {
        Self::ContractViolation {
            stage,
            expected,
            actual,
        }
    }
}

impl From<serde_json::Error> for BulbError {
    fn from(value: serde_json::Error) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<realfft::FftError> for BulbError {
    fn from(value: realfft::FftError) -> Self {
        Self::Message(format!("fft failed: {value}"))
    }
}
