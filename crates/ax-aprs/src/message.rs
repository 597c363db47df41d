//! Confirmable message retransmission
//!
//! Every numbered outbound message gets an [`AprsMessageHandler`] driving
//! its retry schedule. Response deadlines are measured from the initial
//! send: the first sits at `timeout_base + U(0, timeout_rand)`, and each
//! retransmission stretches the next by `timeout_scale`. With the default
//! 30 s base and 1.5 scale the schedule runs 30 s, 45 s, 67.5 s from start.
//!
//! The handler is a small state machine:
//!
//! ```text
//! INIT -> SEND -> RETRY ... -> SUCCESS | REJECT | TIMEOUT | CANCEL | FAIL
//! ```
//!
//! Terminal states are absorbing and the `done` signal fires exactly once,
//! on entry to the first of them.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use ax_link::Signal;
use ax_protocol::frame::Ax25Frame;
use ax_protocol::Callsign;

use crate::interface::AprsShared;

/// Lifecycle of an outgoing confirmable message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    /// Created, not yet transmitted
    Init,
    /// First transmission out, waiting for a response
    Send,
    /// Retransmitted, waiting for a response
    Retry,
    /// Peer acknowledged the message
    Success,
    /// Peer rejected the message
    Reject,
    /// Retries exhausted with no response
    Timeout,
    /// Cancelled locally
    Cancel,
    /// The interface went away before the message could be sent
    Fail,
}

impl MessageState {
    /// Whether this state is absorbing
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageState::Success
                | MessageState::Reject
                | MessageState::Timeout
                | MessageState::Cancel
                | MessageState::Fail
        )
    }
}

struct HandlerInner {
    state: MessageState,
    retries: u32,
    started_at: Option<Instant>,
    /// Current response deadline, measured from `started_at`
    deadline: Duration,
    timer: Option<JoinHandle<()>>,
}

struct HandlerShared {
    aprs: Weak<AprsShared>,
    peer: Callsign,
    msgid: String,
    frame: Arc<Ax25Frame>,
    scale: f64,
    done: Signal<MessageState>,
    inner: Mutex<HandlerInner>,
}

/// Retry state machine for one outgoing message
#[derive(Clone)]
pub struct AprsMessageHandler {
    shared: Arc<HandlerShared>,
}

impl AprsMessageHandler {
    pub(crate) fn new(
        aprs: Weak<AprsShared>,
        peer: Callsign,
        msgid: String,
        frame: Arc<Ax25Frame>,
    ) -> Self {
        let config = aprs
            .upgrade()
            .map(|a| a.retransmit.clone())
            .unwrap_or_default();

        let slack = rand::thread_rng().gen::<f64>() * config.timeout_rand_ms as f64;
        let deadline = Duration::from_millis(config.timeout_base_ms) + Duration::from_micros((slack * 1000.0) as u64);

        Self {
            shared: Arc::new(HandlerShared {
                aprs,
                peer,
                msgid,
                frame,
                scale: config.timeout_scale,
                done: Signal::new(),
                inner: Mutex::new(HandlerInner {
                    state: MessageState::Init,
                    retries: config.count,
                    started_at: None,
                    deadline,
                    timer: None,
                }),
            }),
        }
    }

    /// The message id allocated to this message
    pub fn msgid(&self) -> &str {
        &self.shared.msgid
    }

    /// The station the message is addressed to
    pub fn peer(&self) -> &Callsign {
        &self.shared.peer
    }

    /// The frame being (re)transmitted
    pub fn frame(&self) -> &Arc<Ax25Frame> {
        &self.shared.frame
    }

    /// Current state
    pub fn state(&self) -> MessageState {
        self.shared.inner.lock().unwrap().state
    }

    /// Signal fired exactly once, with the terminal state
    pub fn done(&self) -> &Signal<MessageState> {
        &self.shared.done
    }

    /// Give up on the message. Any copy still in the transmit queue is
    /// cancelled too.
    pub fn cancel(&self) {
        debug!("cancelling message {} to {}", self.shared.msgid, self.shared.peer);
        self.stop_timer();
        if let Some(aprs) = self.shared.aprs.upgrade() {
            aprs.ax25.cancel_transmit(&self.shared.frame);
        }
        self.enter_state(MessageState::Cancel);
    }

    /// First transmission; called by the interface after registration
    pub(crate) fn start(&self) {
        {
            let mut inner = self.shared.inner.lock().unwrap();
            if inner.state != MessageState::Init {
                return;
            }
            inner.started_at = Some(Instant::now());
        }
        debug!("sending message {} to {}", self.shared.msgid, self.shared.peer);
        self.transmit_and_arm(MessageState::Send);
    }

    /// An ack or rej from the peer
    pub(crate) fn handle_response(&self, ack: bool) {
        {
            let inner = self.shared.inner.lock().unwrap();
            if !matches!(inner.state, MessageState::Send | MessageState::Retry) {
                // No longer interested
                return;
            }
        }
        self.stop_timer();
        self.enter_state(if ack {
            MessageState::Success
        } else {
            MessageState::Reject
        });
    }

    fn on_timeout(&self) {
        let retry = {
            let mut inner = self.shared.inner.lock().unwrap();
            if inner.state.is_terminal() {
                return;
            }
            if inner.retries == 0 {
                false
            } else {
                inner.retries -= 1;
                inner.deadline = inner.deadline.mul_f64(self.shared.scale);
                true
            }
        };

        if retry {
            info!(
                "no response to {} from {}, retransmitting",
                self.shared.msgid, self.shared.peer
            );
            self.transmit_and_arm(MessageState::Retry);
        } else {
            warn!(
                "timed out waiting for response to {} from {}",
                self.shared.msgid, self.shared.peer
            );
            self.enter_state(MessageState::Timeout);
        }
    }

    /// Transmit the frame and arm the response timer
    fn transmit_and_arm(&self, next_state: MessageState) {
        let Some(aprs) = self.shared.aprs.upgrade() else {
            self.enter_state(MessageState::Fail);
            return;
        };
        if let Err(e) = aprs.ax25.transmit(self.shared.frame.clone()) {
            warn!("transmit of message {} failed: {}", self.shared.msgid, e);
            self.enter_state(MessageState::Cancel);
            return;
        }

        let deadline_at = {
            let mut inner = self.shared.inner.lock().unwrap();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = next_state;
            let started = inner.started_at.unwrap_or_else(Instant::now);
            started + inner.deadline
        };

        let weak = Arc::downgrade(&self.shared);
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline_at).await;
            if let Some(shared) = weak.upgrade() {
                AprsMessageHandler { shared }.on_timeout();
            }
        });

        let mut inner = self.shared.inner.lock().unwrap();
        if let Some(old) = inner.timer.replace(timer) {
            old.abort();
        }
    }

    fn stop_timer(&self) {
        if let Some(timer) = self.shared.inner.lock().unwrap().timer.take() {
            timer.abort();
        }
    }

    /// Move to a new state; entering a terminal state deregisters the
    /// handler and fires `done` exactly once.
    fn enter_state(&self, state: MessageState) {
        {
            let mut inner = self.shared.inner.lock().unwrap();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = state;
            if let Some(timer) = inner.timer.take() {
                timer.abort();
            }
        }

        if state.is_terminal() {
            info!(
                "message {} to {} finished: {:?}",
                self.shared.msgid, self.shared.peer, state
            );
            if let Some(aprs) = self.shared.aprs.upgrade() {
                aprs.deregister(&self.shared.peer, &self.shared.msgid);
            }
            self.shared.done.emit(&state);
        }
    }
}

impl std::fmt::Debug for AprsMessageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AprsMessageHandler")
            .field("peer", &self.shared.peer)
            .field("msgid", &self.shared.msgid)
            .field("state", &self.state())
            .finish()
    }
}
