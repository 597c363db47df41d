//! APRS interface
//!
//! An [`AprsInterface`] wraps one [`Ax25Interface`] and speaks APRS over it:
//! it binds the station callsign and the standard APRS destination set,
//! deduplicates inbound traffic, parses payloads, routes decoded messages by
//! addressee, correlates `ack`/`rej` (and reply-ack) responses with pending
//! [`AprsMessageHandler`]s, and originates messages, responses and beacons.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use ax_link::{Ax25Interface, Router, Signal};
use ax_protocol::aprs::{AprsAck, AprsMessage, AprsPayload, AprsReject, ReplyAck};
use ax_protocol::frame::{Ax25Frame, PID_NO_LAYER3};
use ax_protocol::Callsign;

use crate::dedup::{frame_hash, DedupCache};
use crate::error::MessagingError;
use crate::message::AprsMessageHandler;

/// Message retransmission schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetransmitConfig {
    /// Retransmissions after the initial send
    pub count: u32,
    /// First response deadline (ms)
    pub timeout_base_ms: u64,
    /// Upper bound of random slack added to the first deadline (ms)
    pub timeout_rand_ms: u64,
    /// Deadline growth factor per retransmission
    pub timeout_scale: f64,
}

impl Default for RetransmitConfig {
    fn default() -> Self {
        Self {
            count: 2,
            timeout_base_ms: 30_000,
            timeout_rand_ms: 5_000,
            timeout_scale: 1.5,
        }
    }
}

/// One AX.25 destination the APRS interface listens on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenSpec {
    /// Exact callsign or regular expression, per `regex`
    pub pattern: String,
    #[serde(default)]
    pub regex: bool,
    /// Specific SSID, or every SSID when absent
    #[serde(default)]
    pub ssid: Option<u8>,
}

impl ListenSpec {
    fn exact(pattern: &str) -> Self {
        Self {
            pattern: pattern.into(),
            regex: false,
            ssid: None,
        }
    }

    fn prefix(pattern: &str) -> Self {
        Self {
            pattern: pattern.into(),
            regex: true,
            ssid: None,
        }
    }
}

/// The destination table of APRS 1.0.1 page 13
pub fn default_listen_destinations() -> Vec<ListenSpec> {
    [
        "^AIR", "^ALL", "^AP", "^CQ", "^GPS", "^DF", "^DGPS", "^DRILL", "^ID", "^JAVA", "^MAIL",
        "^MICE", "^QST", "^QTH", "^RTCM", "^SKY", "^SPACE", "^SPC", "^SYM", "^TEL", "^TEST",
        "^TLM", "^WX", "^ZIP",
    ]
    .into_iter()
    .map(ListenSpec::prefix)
    .chain([ListenSpec::exact("BEACON")])
    .collect()
}

/// APRS interface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AprsConfig {
    /// Destination callsign for beacon traffic
    pub aprs_destination: String,
    /// Default digipeater path for outbound traffic
    pub aprs_path: Vec<String>,
    /// AX.25 destinations that qualify traffic as APRS
    pub listen_destinations: Vec<ListenSpec>,
    /// Additional alt-net destinations, appended to the table above
    pub listen_altnets: Vec<ListenSpec>,
    /// Message id wrap; ids are allocated in `[1, msgid_modulo)`
    pub msgid_modulo: u32,
    /// Duplicate suppression window (ms)
    pub deduplication_expiry_ms: u64,
    pub retransmit: RetransmitConfig,
}

impl Default for AprsConfig {
    fn default() -> Self {
        Self {
            aprs_destination: "APZAIO".into(),
            aprs_path: vec!["WIDE1-1".into(), "WIDE2-1".into()],
            listen_destinations: default_listen_destinations(),
            listen_altnets: Vec::new(),
            msgid_modulo: 1000,
            deduplication_expiry_ms: 28_000,
            retransmit: RetransmitConfig::default(),
        }
    }
}

/// A deduplicated inbound APRS frame with its decoded payload
#[derive(Debug, Clone)]
pub struct AprsRx {
    pub frame: Arc<Ax25Frame>,
    pub payload: AprsPayload,
}

pub(crate) struct AprsShared {
    pub(crate) ax25: Ax25Interface,
    pub(crate) mycall: Callsign,
    pub(crate) retransmit: RetransmitConfig,
    aprs_path: Vec<Callsign>,
    aprs_destination: Callsign,
    msgid_modulo: u32,
    state: Mutex<AprsState>,
    received_msg: Signal<AprsRx>,
    router: Router<AprsRx>,
}

struct AprsState {
    next_msgid: u32,
    pending: HashMap<(Callsign, String), AprsMessageHandler>,
    dedup: DedupCache,
}

impl AprsShared {
    /// Drop a finished handler from the pending table
    pub(crate) fn deregister(&self, peer: &Callsign, msgid: &str) {
        self.state
            .lock()
            .unwrap()
            .pending
            .remove(&(peer.clone(), msgid.to_string()));
    }
}

/// Options for [`AprsInterface::send_message`]
#[derive(Default)]
pub struct SendOptions {
    /// Digipeater path override; the configured `aprs_path` otherwise
    pub path: Option<Vec<String>>,
    /// Fire and forget: no message id, no handler, no retransmission
    pub oneshot: bool,
    /// Reply-ack field to attach
    pub replyack: ReplyAck,
}

/// An APRS station on one AX.25 interface
#[derive(Clone)]
pub struct AprsInterface {
    inner: Arc<AprsShared>,
}

impl AprsInterface {
    /// Attach to an AX.25 interface as `mycall`
    pub fn new(
        ax25: Ax25Interface,
        mycall: &str,
        config: AprsConfig,
    ) -> Result<Self, MessagingError> {
        let mycall = Callsign::from_str(mycall)?;
        let aprs_destination = Callsign::from_str(&config.aprs_destination)?;
        let aprs_path = parse_path(&config.aprs_path)?;

        let inner = Arc::new(AprsShared {
            ax25: ax25.clone(),
            mycall: mycall.clone(),
            retransmit: config.retransmit.clone(),
            aprs_path,
            aprs_destination,
            msgid_modulo: config.msgid_modulo.max(2),
            state: Mutex::new(AprsState {
                next_msgid: 0,
                pending: HashMap::new(),
                dedup: DedupCache::new(Duration::from_millis(config.deduplication_expiry_ms)),
            }),
            received_msg: Signal::new(),
            router: Router::new(),
        });

        // Listen for our own callsign plus everything that qualifies as an
        // APRS destination. A frame may match several bindings; the dedup
        // cache collapses the repeats.
        let weak = Arc::downgrade(&inner);
        let on_receive = move |frame: &Arc<Ax25Frame>| {
            if let Some(inner) = weak.upgrade() {
                receive(&inner, frame);
            }
        };

        ax25.bind(mycall.base(), Some(mycall.ssid()), on_receive.clone());
        for spec in config
            .listen_destinations
            .iter()
            .chain(config.listen_altnets.iter())
        {
            if spec.regex {
                ax25.bind_regex(&spec.pattern, spec.ssid, on_receive.clone())?;
            } else {
                ax25.bind(&spec.pattern, spec.ssid, on_receive.clone());
            }
        }

        info!("APRS interface up as {}", inner.mycall);
        Ok(Self { inner })
    }

    /// This station's callsign
    pub fn mycall(&self) -> &Callsign {
        &self.inner.mycall
    }

    /// The AX.25 interface underneath
    pub fn ax25(&self) -> &Ax25Interface {
        &self.inner.ax25
    }

    /// Signal fired once per unique inbound APRS frame
    pub fn received_msg(&self) -> &Signal<AprsRx> {
        &self.inner.received_msg
    }

    /// Bind a receiver to a message addressee (exact callsign)
    pub fn bind(
        &self,
        callsign: &str,
        ssid: Option<u8>,
        callback: impl Fn(&AprsRx) + Send + Sync + 'static,
    ) -> ax_link::BindingId {
        self.inner.router.bind(callsign, ssid, callback)
    }

    /// Remove an addressee binding
    pub fn unbind(&self, id: ax_link::BindingId) -> bool {
        self.inner.router.unbind(id)
    }

    /// Send an APRS message.
    ///
    /// Oneshot messages go straight to the transmit queue and return `None`.
    /// Confirmable messages get a fresh message id and an
    /// [`AprsMessageHandler`] driving the retry schedule; the handler is
    /// returned for the caller to watch.
    pub fn send_message(
        &self,
        addressee: &str,
        text: &str,
        options: SendOptions,
    ) -> Result<Option<AprsMessageHandler>, MessagingError> {
        let addressee = Callsign::from_str(addressee)?;
        let path = match &options.path {
            Some(path) => parse_path(path)?,
            None => self.inner.aprs_path.clone(),
        };

        if options.oneshot {
            info!("one-shot message to {}: {}", addressee, text);
            let message = AprsMessage {
                addressee: addressee.clone(),
                text: text.into(),
                msgid: None,
                replyack: ReplyAck::None,
            };
            let frame = self.build_frame(addressee, path, message.encode()?)?;
            self.inner.ax25.transmit(frame)?;
            return Ok(None);
        }

        let msgid = self.allocate_msgid(&addressee)?;
        info!("message {} to {}: {}", msgid, addressee, text);

        let message = AprsMessage {
            addressee: addressee.clone(),
            text: text.into(),
            msgid: Some(msgid.clone()),
            replyack: options.replyack,
        };
        let frame = Arc::new(self.build_frame(addressee.clone(), path, message.encode()?)?);

        let handler = AprsMessageHandler::new(
            Arc::downgrade(&self.inner),
            addressee.clone(),
            msgid.clone(),
            frame,
        );
        self.inner
            .state
            .lock()
            .unwrap()
            .pending
            .insert((addressee, msgid), handler.clone());
        handler.start();
        Ok(Some(handler))
    }

    /// Acknowledge (or reject) a numbered message we received. Messages
    /// without a message id are ignored.
    pub fn send_response(&self, message: &AprsRx, ack: bool) -> Result<(), MessagingError> {
        let AprsPayload::Message(msg) = &message.payload else {
            return Ok(());
        };
        let Some(msgid) = &msg.msgid else {
            return Ok(());
        };

        let peer = message.frame.path.source.with_ch(false);
        debug!("responding to {} msgid {} with ack={}", peer, msgid, ack);
        let payload = if ack {
            AprsAck {
                addressee: peer.clone(),
                msgid: msgid.clone(),
                replyack: None,
            }
            .encode()?
        } else {
            AprsReject {
                addressee: peer.clone(),
                msgid: msgid.clone(),
                replyack: None,
            }
            .encode()?
        };

        let frame = self.build_frame(peer, self.inner.aprs_path.clone(), payload)?;
        self.inner.ax25.transmit(frame)?;
        Ok(())
    }

    /// Transmit a beacon payload (position, status, ...) to the configured
    /// APRS destination
    pub fn send_beacon(&self, payload: Vec<u8>) -> Result<(), MessagingError> {
        let frame = self.build_frame(
            self.inner.aprs_destination.clone(),
            self.inner.aprs_path.clone(),
            payload,
        )?;
        self.inner.ax25.transmit(frame)?;
        Ok(())
    }

    /// Messages still waiting for a response
    pub fn pending_messages(&self) -> usize {
        self.inner.state.lock().unwrap().pending.len()
    }

    fn build_frame(
        &self,
        destination: Callsign,
        path: Vec<Callsign>,
        payload: Vec<u8>,
    ) -> Result<Ax25Frame, MessagingError> {
        Ok(Ax25Frame::ui(
            destination,
            self.inner.mycall.clone(),
            path,
            PID_NO_LAYER3,
            payload,
        )?)
    }

    /// Allocate the next free message id for this peer, in
    /// `[1, msgid_modulo)`. Ids with an outstanding handler for the same
    /// peer are skipped.
    fn allocate_msgid(&self, peer: &Callsign) -> Result<String, MessagingError> {
        let modulo = self.inner.msgid_modulo;
        let mut state = self.inner.state.lock().unwrap();

        for _ in 1..modulo {
            state.next_msgid = (state.next_msgid + 1) % modulo;
            if state.next_msgid == 0 {
                state.next_msgid = 1;
            }
            let candidate = state.next_msgid.to_string();
            if !state.pending.contains_key(&(peer.clone(), candidate.clone())) {
                return Ok(candidate);
            }
        }
        Err(MessagingError::QueueFull(state.pending.len()))
    }

    pub(crate) fn from_shared(inner: Arc<AprsShared>) -> Self {
        Self { inner }
    }

    pub(crate) fn shared(&self) -> &Arc<AprsShared> {
        &self.inner
    }
}

impl std::fmt::Debug for AprsInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AprsInterface")
            .field("mycall", &self.inner.mycall)
            .finish()
    }
}

fn parse_path(path: &[String]) -> Result<Vec<Callsign>, MessagingError> {
    path.iter()
        .map(|call| Callsign::from_str(call).map_err(MessagingError::from))
        .collect()
}

/// Inbound frame handler: dedup, decode, correlate, dispatch
fn receive(inner: &Arc<AprsShared>, frame: &Arc<Ax25Frame>) {
    if !frame.is_ui() || frame.pid != Some(PID_NO_LAYER3) {
        return;
    }

    if inner
        .state
        .lock()
        .unwrap()
        .dedup
        .check_and_insert(frame_hash(frame))
    {
        debug!("ignoring duplicate frame {}", frame);
        return;
    }

    let payload = match AprsPayload::decode(&frame.path.destination, &frame.payload) {
        Ok(payload) => payload,
        Err(e) => {
            debug!("payload of {} not decodable as APRS: {}", frame, e);
            AprsPayload::Other {
                data_type: None,
                data: frame.payload.clone(),
            }
        }
    };
    let rx = AprsRx {
        frame: frame.clone(),
        payload,
    };

    let peer = frame.path.source.with_ch(false);
    match &rx.payload {
        AprsPayload::Ack(ack) if ack.addressee == inner.mycall => {
            if deliver_response(inner, &peer, &ack.msgid, true) {
                return;
            }
        }
        AprsPayload::Reject(rej) if rej.addressee == inner.mycall => {
            if deliver_response(inner, &peer, &rej.msgid, false) {
                return;
            }
        }
        AprsPayload::Message(msg) if msg.addressee == inner.mycall => {
            // APRS 1.1: a message can piggy-back an ack in its reply-ack
            // field. The message itself still gets delivered below.
            if let ReplyAck::Replying(ackid) = &msg.replyack {
                deliver_response(inner, &peer, ackid, true);
            }
        }
        _ => {}
    }

    inner.received_msg.emit(&rx);

    let routed_to = match &rx.payload {
        AprsPayload::Message(m) => m.addressee.clone(),
        AprsPayload::Ack(a) => a.addressee.clone(),
        AprsPayload::Reject(r) => r.addressee.clone(),
        _ => frame.path.destination.clone(),
    };
    inner.router.dispatch(&routed_to, &rx);
}

/// Hand an ack/rej to the matching pending handler, if any
fn deliver_response(inner: &Arc<AprsShared>, peer: &Callsign, msgid: &str, ack: bool) -> bool {
    let handler = inner
        .state
        .lock()
        .unwrap()
        .pending
        .get(&(peer.clone(), msgid.to_string()))
        .cloned();

    match handler {
        Some(handler) => {
            debug!("response from {} for msgid {}: ack={}", peer, msgid, ack);
            handler.handle_response(ack);
            true
        }
        None => {
            debug!("no pending message for {} msgid {}", peer, msgid);
            false
        }
    }
}
