//! AX.25, KISS and APRS wire-format codecs
//!
//! This crate provides bit-exact encoding and decoding for the protocol
//! layers of an amateur packet-radio stack:
//!
//! - **AX.25 addresses and frames**: callsign + SSID addresses, full address
//!   paths with up to eight digipeaters, and every control-field variant
//!   (UI, U, S and I frames in modulo-8 or modulo-128), protected by the
//!   CRC-16/X.25 frame-check sequence
//! - **KISS framing**: SLIP-style delimiting and byte stuffing between a
//!   host and a multi-port TNC, with a streaming deframer that accepts
//!   arbitrary chunks
//! - **APRS payloads**: messages with message ids and the APRS 1.1
//!   reply-ack extension, ack/rej responses, position and status reports,
//!   and MIC-E
//!
//! # Architecture
//!
//! Everything here is pure and synchronous; I/O, queueing and timing live in
//! the `ax-link` and `ax-aprs` crates. Codecs follow one convention: `encode`
//! produces the exact wire bytes, `decode` accepts them back, and any input
//! accepted by `decode` re-encodes byte-identically.
//!
//! # Example
//!
//! ```rust
//! use ax_protocol::frame::{Ax25Frame, PID_NO_LAYER3};
//!
//! let frame = Ax25Frame::ui(
//!     "APZAIO".parse().unwrap(),
//!     "VK4MSL-9".parse().unwrap(),
//!     vec!["WIDE2-2".parse().unwrap()],
//!     PID_NO_LAYER3,
//!     b":VK4ABC   :Hello{1".to_vec(),
//! )
//! .unwrap();
//!
//! let bytes = frame.encode();
//! assert_eq!(Ax25Frame::decode(&bytes).unwrap(), frame);
//! ```

pub mod aprs;
pub mod callsign;
pub mod error;
pub mod fcs;
pub mod frame;
pub mod kiss;
pub mod mic_e;
pub mod position;

pub use aprs::{AprsAck, AprsDataType, AprsMessage, AprsPayload, AprsReject, ReplyAck};
pub use callsign::{Callsign, Path, MAX_DIGIPEATERS};
pub use error::{AprsError, FrameError, KissError};
pub use frame::{Ax25Frame, Control, Modulo, SFrameType, UFrameType, PID_NO_LAYER3};
pub use kiss::{KissCommand, KissDeframer, KissFrame};
