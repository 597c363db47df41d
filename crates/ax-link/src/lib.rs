//! KISS device handling and AX.25 interface scheduling
//!
//! This crate is the transport engine of the stack: it owns the tasks that
//! move bytes, leaving wire formats to `ax-protocol` and APRS semantics to
//! `ax-aprs`.
//!
//! # Architecture
//!
//! - [`KissDevice`] drives a KISS TNC over any `AsyncRead + AsyncWrite`
//!   byte stream and multiplexes up to sixteen [`KissPort`]s
//! - [`Ax25Interface`] decodes traffic from one port, routes it to bound
//!   receivers, and schedules outbound frames with a CSMA-style random
//!   hold-off
//! - [`Signal`] and [`Router`] are the callback plumbing shared with the
//!   APRS layer
//!
//! Each device and interface runs a single-consumer task; handles are cheap
//! clones that talk to it over channels, so no caller ever blocks on the
//! radio.
//!
//! # Example
//!
//! ```rust,no_run
//! use ax_link::{Ax25Interface, InterfaceConfig, KissConfig, KissDevice};
//!
//! # async fn demo() -> Result<(), ax_link::LinkError> {
//! // Any AsyncRead + AsyncWrite transport will do; a serial port or TCP
//! // socket in production, an in-memory pipe here
//! let (stream, _tnc_end) = tokio::io::duplex(4096);
//! let device = KissDevice::open(stream, KissConfig::default());
//! let iface = Ax25Interface::new(device.port(0)?, InterfaceConfig::default());
//!
//! iface.bind("VK4MSL", Some(9), |frame| {
//!     println!("heard: {}", frame);
//! });
//! # Ok(())
//! # }
//! ```

pub mod device;
pub mod error;
pub mod interface;
pub mod router;
pub mod signal;

pub use device::{DeviceState, KissConfig, KissDevice, KissPort};
pub use error::LinkError;
pub use interface::{Ax25Interface, InterfaceConfig, OnSent};
pub use router::{BindingId, Router};
pub use signal::{Signal, SlotId};
