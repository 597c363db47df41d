//! KISS framing codec
//!
//! KISS wraps TNC traffic in SLIP-style frames: each frame is delimited by
//! `FEND` (0xC0), and occurrences of `FEND`/`FESC` inside a frame are
//! replaced by the two-byte sequences `FESC TFEND` / `FESC TFESC`. The first
//! octet of every frame carries the port number in the high nibble and the
//! command in the low nibble.
//!
//! [`KissDeframer`] is a byte-at-a-time state machine suited to feeding
//! arbitrary chunks straight off a serial port or socket; partial frames are
//! held across calls.

use std::fmt;

use crate::error::KissError;

/// Frame delimiter
pub const FEND: u8 = 0xC0;
/// Escape introducer
pub const FESC: u8 = 0xDB;
/// Escaped FEND
pub const TFEND: u8 = 0xDC;
/// Escaped FESC
pub const TFESC: u8 = 0xDD;

/// KISS command nibble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum KissCommand {
    /// Payload data for a port
    Data,
    /// Transmitter keyup delay, 10 ms units
    TxDelay,
    /// CSMA persistence parameter
    Persistence,
    /// CSMA slot interval, 10 ms units
    SlotTime,
    /// Transmitter tail time, 10 ms units
    TxTail,
    /// Full-duplex flag
    FullDuplex,
    /// Hardware-specific setting
    SetHardware,
    /// Exit KISS mode
    Return,
}

impl KissCommand {
    /// Decode the low nibble of a frame's type octet
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble & 0x0F {
            0x00 => Some(KissCommand::Data),
            0x01 => Some(KissCommand::TxDelay),
            0x02 => Some(KissCommand::Persistence),
            0x03 => Some(KissCommand::SlotTime),
            0x04 => Some(KissCommand::TxTail),
            0x05 => Some(KissCommand::FullDuplex),
            0x06 => Some(KissCommand::SetHardware),
            0x0F => Some(KissCommand::Return),
            _ => None,
        }
    }

    /// The command's nibble value
    pub fn as_nibble(self) -> u8 {
        match self {
            KissCommand::Data => 0x00,
            KissCommand::TxDelay => 0x01,
            KissCommand::Persistence => 0x02,
            KissCommand::SlotTime => 0x03,
            KissCommand::TxTail => 0x04,
            KissCommand::FullDuplex => 0x05,
            KissCommand::SetHardware => 0x06,
            KissCommand::Return => 0x0F,
        }
    }
}

/// A single KISS frame
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KissFrame {
    pub port: u8,
    pub command: KissCommand,
    pub payload: Vec<u8>,
}

impl KissFrame {
    /// Build a data frame for the given port
    pub fn data(port: u8, payload: Vec<u8>) -> Result<Self, KissError> {
        if port > 15 {
            return Err(KissError::PortOutOfRange(port));
        }
        Ok(Self {
            port,
            command: KissCommand::Data,
            payload,
        })
    }

    /// Build a single-octet parameter frame (TXDELAY, PERSIST, ...)
    pub fn param(port: u8, command: KissCommand, value: u8) -> Result<Self, KissError> {
        if port > 15 {
            return Err(KissError::PortOutOfRange(port));
        }
        Ok(Self {
            port,
            command,
            payload: vec![value],
        })
    }

    /// The `C0 FF C0` exit-KISS-mode frame
    pub fn exit_kiss() -> Self {
        Self {
            port: 15,
            command: KissCommand::Return,
            payload: Vec::new(),
        }
    }

    /// Encode with delimiters and byte stuffing
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 4);
        out.push(FEND);
        stuff_into(
            &mut out,
            ((self.port & 0x0F) << 4) | self.command.as_nibble(),
        );
        for &byte in &self.payload {
            stuff_into(&mut out, byte);
        }
        out.push(FEND);
        out
    }
}

impl fmt::Display for KissFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KissFrame{{port {}, {:?}, {} bytes}}",
            self.port,
            self.command,
            self.payload.len()
        )
    }
}

fn stuff_into(out: &mut Vec<u8>, byte: u8) {
    match byte {
        FEND => out.extend_from_slice(&[FESC, TFEND]),
        FESC => out.extend_from_slice(&[FESC, TFESC]),
        other => out.push(other),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeframerState {
    /// Discarding bytes until the next FEND
    Idle,
    /// Accumulating frame bytes
    InFrame,
    /// Byte after FESC
    Escape,
}

/// Streaming KISS parser
///
/// Feed raw bytes with [`push`](Self::push); complete frames come back in
/// arrival order. Empty frames (back-to-back delimiters) are ignored; a
/// frame containing an invalid escape sequence or an unknown command nibble
/// is dropped and parsing resumes at the next delimiter.
#[derive(Debug)]
pub struct KissDeframer {
    state: DeframerState,
    buffer: Vec<u8>,
    discarded: u64,
}

impl KissDeframer {
    pub fn new() -> Self {
        Self {
            state: DeframerState::Idle,
            buffer: Vec::with_capacity(330),
            discarded: 0,
        }
    }

    /// Frames dropped due to framing errors so far
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Feed raw bytes; returns any frames completed by this chunk
    pub fn push(&mut self, data: &[u8]) -> Vec<KissFrame> {
        let mut frames = Vec::new();
        for &byte in data {
            match self.state {
                DeframerState::Idle => {
                    if byte == FEND {
                        self.buffer.clear();
                        self.state = DeframerState::InFrame;
                    }
                }
                DeframerState::InFrame => match byte {
                    FEND => {
                        if !self.buffer.is_empty() {
                            match self.take_frame() {
                                Some(frame) => frames.push(frame),
                                None => self.discarded += 1,
                            }
                        }
                        self.buffer.clear();
                    }
                    FESC => self.state = DeframerState::Escape,
                    other => self.buffer.push(other),
                },
                DeframerState::Escape => match byte {
                    TFEND => {
                        self.buffer.push(FEND);
                        self.state = DeframerState::InFrame;
                    }
                    TFESC => {
                        self.buffer.push(FESC);
                        self.state = DeframerState::InFrame;
                    }
                    FEND => {
                        // Frame ended mid-escape: drop it, the delimiter
                        // opens the next frame
                        self.discarded += 1;
                        self.buffer.clear();
                        self.state = DeframerState::InFrame;
                    }
                    _ => {
                        // Invalid escape: drop this frame, resync on the
                        // next delimiter
                        self.discarded += 1;
                        self.buffer.clear();
                        self.state = DeframerState::Idle;
                    }
                },
            }
        }
        frames
    }

    fn take_frame(&mut self) -> Option<KissFrame> {
        let type_byte = self.buffer[0];
        let command = KissCommand::from_nibble(type_byte & 0x0F)?;
        Some(KissFrame {
            port: type_byte >> 4,
            command,
            payload: self.buffer[1..].to_vec(),
        })
    }
}

impl Default for KissDeframer {
    fn default() -> Self {
        Self::new()
    }
}
