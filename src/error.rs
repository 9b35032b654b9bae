//! Error types for the call session core

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in call session operations
///
/// A stale session event and a control message sent while the channel is
/// not open are deliberately not variants: both are silent drop paths
/// (debug-logged only), never surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Local capture could not be acquired (device denied/unavailable)
    #[error("Media unavailable: {0}")]
    MediaUnavailable(String),

    /// Signaling relay store unreachable or rejected the operation
    #[error("Relay unavailable: {0}")]
    RelayUnavailable(String),

    /// Call record does not exist (or has no offer to answer)
    #[error("Call not found: {0}")]
    CallNotFound(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Control channel error
    #[error("Control channel error: {0}")]
    ChannelError(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error should be surfaced to the user and retried by them
    ///
    /// Relay failures are caller-initiated retries, never automatic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RelayUnavailable(_) | Error::IoError(_))
    }

    /// Check if this error aborted the operation before any transport mutation
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig(_) | Error::CallNotFound(_) | Error::MediaUnavailable(_)
        )
    }

    /// Check if this error is a transport-level error
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::PeerConnectionError(_)
                | Error::SdpError(_)
                | Error::IceCandidateError(_)
                | Error::WebRtcError(_)
        )
    }
}
