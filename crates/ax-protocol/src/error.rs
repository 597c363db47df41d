//! Error types for frame and payload codecs

use thiserror::Error;

/// Errors that can occur while encoding or decoding AX.25 frames
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Callsign text or wire form is invalid
    #[error("malformed callsign: {0}")]
    MalformedCallsign(String),

    /// Address path is invalid (too few or too many addresses)
    #[error("malformed path: {0}")]
    MalformedPath(String),

    /// Frame is shorter than the smallest valid encoding
    #[error("truncated frame: need at least {needed} more bytes")]
    Truncated { needed: usize },

    /// Frame-check sequence mismatch
    #[error("FCS mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    BadFcs { expected: u16, actual: u16 },

    /// Control field decoded to a variant this stack does not implement
    #[error("unknown control field variant: 0x{0:02X}")]
    UnknownVariant(u8),
}

/// Errors in the KISS framing layer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KissError {
    /// Malformed KISS traffic
    #[error("KISS protocol error: {0}")]
    Protocol(String),

    /// Port index outside the 4-bit range
    #[error("port {0} out of range (0-15)")]
    PortOutOfRange(u8),
}

/// Errors while decoding APRS payloads
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AprsError {
    /// Payload does not match the wire format for its data type
    #[error("malformed APRS payload: {0}")]
    MalformedPayload(String),
}
