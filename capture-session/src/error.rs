use thiserror::Error;

use crate::{
    format::PixelFormat,
    gate::GateError,
    state::{SessionState, Transition},
    stream::StreamKind,
};

/// Setup step that failed. Used to tag fatal errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    Video,
    Audio,
    Container,
}

impl std::fmt::Display for SetupStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SetupStage::Video => f.write_str("video"),
            SetupStage::Audio => f.write_str("audio"),
            SetupStage::Container => f.write_str("container"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    /// A setup step failed; the session cannot capture.
    #[error("{stage} setup failed: {source:#}")]
    Setup {
        stage: SetupStage,
        #[source]
        source: anyhow::Error,
    },

    #[error("buffer length {actual} does not match expected {expected}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("no conversion from {input} to {output}")]
    UnsupportedConversion {
        input: PixelFormat,
        output: PixelFormat,
    },

    #[error("{stream} encode failed: {source:#}")]
    Encode {
        stream: StreamKind,
        #[source]
        source: anyhow::Error,
    },

    #[error("packet write failed: {0:#}")]
    Write(#[source] anyhow::Error),

    #[error("container is closed")]
    WriterClosed,

    #[error("{stream} stream is not open")]
    StreamClosed { stream: StreamKind },

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error("invalid transition {transition:?} from state {from:?}")]
    InvalidState {
        from: SessionState,
        transition: Transition,
    },
}

impl SessionError {
    /// Fatal errors end the session; everything else leaves it capturing.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Setup { .. })
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_errors_are_fatal() {
        let err = SessionError::Setup {
            stage: SetupStage::Container,
            source: anyhow::anyhow!("could not open output file"),
        };
        assert!(err.is_fatal());
        assert_eq!(
            err.to_string(),
            "container setup failed: could not open output file"
        );
    }

    #[test]
    fn validation_errors_are_not_fatal() {
        let err = SessionError::InvalidLength {
            expected: 10,
            actual: 9,
        };
        assert!(!err.is_fatal());
        assert_eq!(
            err.to_string(),
            "buffer length 9 does not match expected 10"
        );
        assert!(!SessionError::WriterClosed.is_fatal());
    }
}
