//! Error types for the link layer

use thiserror::Error;

use ax_protocol::{FrameError, KissError};

/// Errors raised by KISS devices and AX.25 interfaces
#[derive(Debug, Error)]
pub enum LinkError {
    /// The underlying KISS device is closed or has failed
    #[error("device closed")]
    DeviceClosed,

    /// Frame codec error
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// KISS framing error
    #[error(transparent)]
    Kiss(#[from] KissError),

    /// Transport I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
