use std::path::PathBuf;

/// Result alias that carries the custom [`StemSyncError`] type.
pub type Result<T> = std::result::Result<T, StemSyncError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum StemSyncError {
    /// Free-form failure surfaced to the caller as-is.
    #[error("{0}")]
    Message(String),
    /// The render request is incomplete or an option is out of range.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// No stem audio file has a video with the same name.
    #[error("no matching audio/video stem names")]
    NoMatchingStems,
    /// A video is too short to read past the safe leading offset.
    #[error("video too short to use: {} ({duration:.3}s)", path.display())]
    SourceTooShort { path: PathBuf, duration: f64 },
    /// The timeline produced no renderable segments.
    #[error("timeline produced no renderable segments")]
    AssemblyEmpty,
    /// Feature primitives were handed degenerate input.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Audio container or codec failure.
    #[error("failed to decode {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },
    /// An external binary could not be located.
    #[error("`{0}` not found in PATH")]
    ToolNotFound(String),
    /// An external media tool exited unsuccessfully.
    #[error("media codec failed: {message}")]
    Codec {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Malformed config file or ffprobe output.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Spectral analysis buffers did not match the planned FFT size.
    #[error("fft error: {0}")]
    Fft(#[from] realfft::FftError),
}

impl StemSyncError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Rejects a render request before any media is touched.
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Configuration(msg.into())
    }

    /// Audio at `path` could not be read.
    pub fn decode(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// An external media tool failed, with its stderr when captured.
    pub fn codec(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::Codec {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// True for failures raised before any audio or video is touched.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::NoMatchingStems)
    }
}

impl From<&str> for StemSyncError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for StemSyncError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
