use crate::format::AudioFormat;
use crate::player::PlaybackState;

/// Errors raised by the player, its frame pipeline and audio devices.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The operation is not legal in the player's current state.
    #[error("{operation} is not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: PlaybackState,
    },
    /// The media source could not be opened or probed.
    #[error("failed to open stream: {0}")]
    StreamOpen(String),
    /// Texture (GPU side) resources could not be created.
    #[error("failed to initialize device resources: {0}")]
    DeviceInit(String),
    /// The audio device cannot represent the requested format.
    #[error("audio format not supported by device: {0}")]
    FormatUnsupported(AudioFormat),
    /// A buffer ring invariant was violated. Not recoverable.
    #[error("internal consistency error: {0}")]
    InternalConsistency(String),
    /// A backend call failed while the device was running.
    #[error("audio device error: {0}")]
    DeviceRuntime(String),
    /// The decoder failed to read or seek.
    #[error("decode error: {0}")]
    Decode(String),
    /// A bounded wait ran out.
    #[error("timed out: {0}")]
    Timeout(String),
    #[cfg(feature = "gstreamer")]
    #[error("{0}")]
    Glib(#[from] glib::Error),
    #[cfg(feature = "gstreamer")]
    #[error("{0}")]
    Bool(#[from] glib::BoolError),
    #[cfg(feature = "gstreamer")]
    #[error("failed to change pipeline state: {0}")]
    StateChange(#[from] gstreamer::StateChangeError),
}

impl Error {
    /// Whether the error indicates a broken invariant rather than a transient condition.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::InternalConsistency(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_consistency_errors_are_fatal() {
        assert!(Error::InternalConsistency("lost handle".into()).is_fatal());
        assert!(!Error::DeviceRuntime("query failed".into()).is_fatal());
        assert!(!Error::Timeout("reclaim".into()).is_fatal());
    }

    #[test]
    fn invalid_state_names_operation_and_state() {
        let err = Error::InvalidState {
            operation: "init_stream",
            state: PlaybackState::Playing,
        };
        assert_eq!(err.to_string(), "init_stream is not allowed in state Playing");
    }
}
