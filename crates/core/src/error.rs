/// Result alias that carries the custom [`LipSyncError`] type.
pub type Result<T> = std::result::Result<T, LipSyncError>;

/// Common error type for the core crate.
///
/// Only loading and configuration failures ever reach a caller. Failures
/// inside the animation tick or the phoneme player are logged where they are
/// detected and never propagate.
#[derive(Debug, thiserror::Error)]
pub enum LipSyncError {
    /// The audio payload behind a locator could not be fetched.
    #[error("failed to fetch audio `{locator}`: {source}")]
    Fetch {
        locator: String,
        #[source]
        source: std::io::Error,
    },
    /// The fetched bytes could not be decoded into playable samples.
    #[error("audio decode failed: {0}")]
    Decode(String),
    /// A caller supplied a value outside the accepted range.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// The FFT was handed buffers of the wrong length.
    #[error("{0}")]
    Fft(#[from] realfft::FftError),
    /// An avatar expression schema rejected a write.
    #[error("expression write failed: {0}")]
    Expression(String),
    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl LipSyncError {
    /// Returns `true` for failures that abort a `start` call: the audio could
    /// not be fetched or decoded.
    pub fn is_decode_failure(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::Decode(_))
    }
}
