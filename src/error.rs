//! Error types for the stream engine and the video pipeline
//!
//! One flat kind enumeration, carried opaquely through the stream
//! protocol. Errors are terminal: a combinator forwards them downstream
//! and never retries.

use std::fmt;

/// Main error type for stream and pipeline operations
#[derive(Debug, Clone, PartialEq)]
pub enum StreamError {
    /// A source failed to open or negotiate (file not found, codec
    /// unavailable, channel rejected)
    StreamInitialization(String),
    /// A source failed mid-stream while producing a frame
    FrameGeneration(String),
    /// End of input reached when not configured to loop
    EndOfStream,
    /// A synchronous consumer polled before a frame was assembled
    FrameNotReady,
    /// Reactor-reported I/O error
    Io(String),
    /// Deferred value was already consumed
    ValueWasMoved,
    /// Deferred value queried before resolution
    NotInitialized,
    /// Custom error with message
    Custom(String),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::StreamInitialization(msg) => {
                write!(f, "can't initialize stream: {}", msg)
            }
            StreamError::FrameGeneration(msg) => write!(f, "can't generate frame: {}", msg),
            StreamError::EndOfStream => write!(f, "end of stream"),
            StreamError::FrameNotReady => write!(f, "frame not ready"),
            StreamError::Io(msg) => write!(f, "IO error: {}", msg),
            StreamError::ValueWasMoved => write!(f, "value was moved"),
            StreamError::NotInitialized => write!(f, "not initialized"),
            StreamError::Custom(msg) => write!(f, "stream error: {}", msg),
        }
    }
}

impl std::error::Error for StreamError {}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::FrameGeneration(err.to_string())
    }
}

/// Result type for stream operations
pub type StreamResult<T> = Result<T, StreamError>;
