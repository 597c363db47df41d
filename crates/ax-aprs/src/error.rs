//! Error types for the APRS layer

use thiserror::Error;

use ax_link::LinkError;
use ax_protocol::{AprsError, FrameError};

/// Errors raised by the APRS interface and its helpers
#[derive(Debug, Error)]
pub enum MessagingError {
    /// Every message id in `[1, msgid_modulo)` has an outstanding handler
    /// for this peer
    #[error("no free message ids ({0} outstanding)")]
    QueueFull(usize),

    /// Link-layer failure
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Frame construction failure
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Payload encoding failure
    #[error(transparent)]
    Payload(#[from] AprsError),

    /// A configured listen pattern failed to compile
    #[error("invalid listen pattern: {0}")]
    Pattern(#[from] regex::Error),
}
