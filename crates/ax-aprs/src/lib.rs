//! APRS messaging over an AX.25 link
//!
//! The application layer of the stack: sits on `ax-link`'s AX.25 interface
//! and provides the APRS behaviours a station needs:
//!
//! - [`AprsInterface`]: listens on the APRS destination set, deduplicates
//!   inbound traffic, routes decoded payloads by addressee, and originates
//!   messages, responses and beacons
//! - [`AprsMessageHandler`]: the per-message retry state machine with
//!   randomized, scaled backoff and ack/rej/reply-ack correlation
//! - [`AprsDigipeater`]: WIDEn-N / TRACEn-N alias digipeating with
//!   per-interface loopback confinement and queue-age expiry
//!
//! # Example
//!
//! ```rust,no_run
//! use ax_aprs::{AprsConfig, AprsInterface, SendOptions};
//! use ax_link::{Ax25Interface, InterfaceConfig, KissConfig, KissDevice};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let (stream, _tnc_end) = tokio::io::duplex(4096);
//! let device = KissDevice::open(stream, KissConfig::default());
//! let ax25 = Ax25Interface::new(device.port(0)?, InterfaceConfig::default());
//! let aprs = AprsInterface::new(ax25, "VK4MSL-9", AprsConfig::default())?;
//!
//! if let Some(handler) = aprs.send_message("VK4ABC", "QSL?", SendOptions::default())? {
//!     handler.done().connect(|state| println!("message finished: {:?}", state));
//! }
//! # Ok(())
//! # }
//! ```

pub mod dedup;
pub mod digipeater;
pub mod error;
pub mod interface;
pub mod message;

pub use dedup::{frame_hash, DedupCache};
pub use digipeater::{AprsDigipeater, DigipeaterConfig};
pub use error::MessagingError;
pub use interface::{
    default_listen_destinations, AprsConfig, AprsInterface, AprsRx, ListenSpec, RetransmitConfig,
    SendOptions,
};
pub use message::{AprsMessageHandler, MessageState};
