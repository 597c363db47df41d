//! AX.25 interface and CSMA transmit scheduling
//!
//! An [`Ax25Interface`] sits on one KISS port. Inbound bytes are decoded to
//! frames and fanned out through the `received_msg` signal and the callsign
//! [`Router`]; outbound frames are queued FIFO and released by a
//! clear-to-send timer.
//!
//! The scheduler is timing-based CSMA: any activity on the medium (a
//! completed receive, good or bad, or our own transmission) pushes the
//! clear-to-send deadline to `cts_delay + U(0, cts_rand)` from now. The
//! queue pump only runs once the deadline passes, so two stations that heard
//! the same traffic are unlikely to key up at the same instant.
//!
//! All queue and timer state is owned by a single actor task per interface;
//! handles talk to it over a command channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use ax_protocol::frame::Ax25Frame;

use crate::device::KissPort;
use crate::error::LinkError;
use crate::router::{BindingId, Router};
use crate::signal::Signal;

/// AX.25 interface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceConfig {
    /// Base clear-to-send hold-off after medium activity (ms)
    pub cts_delay_ms: u64,
    /// Upper bound of the random hold-off added on top (ms)
    pub cts_rand_ms: u64,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            cts_delay_ms: 100,
            cts_rand_ms: 100,
        }
    }
}

/// Callback fired when a queued frame has been handed to the KISS port
pub type OnSent = Box<dyn FnOnce(&Ax25Frame) + Send>;

struct TxEntry {
    frame: Arc<Ax25Frame>,
    on_sent: Option<OnSent>,
    deadline: Option<Instant>,
    cancelled: bool,
}

enum IfaceCmd {
    Transmit(TxEntry),
    Cancel(Arc<Ax25Frame>),
    MediumBusy,
}

struct IfaceShared {
    cmd_tx: mpsc::UnboundedSender<IfaceCmd>,
    router: Router<Arc<Ax25Frame>>,
    received_msg: Signal<Arc<Ax25Frame>>,
    link_up: AtomicBool,
}

/// A logical AX.25 interface on one KISS port
#[derive(Clone)]
pub struct Ax25Interface {
    shared: Arc<IfaceShared>,
}

impl Ax25Interface {
    /// Create an interface on the given port and start its scheduler
    pub fn new(port: KissPort, config: InterfaceConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(IfaceShared {
            cmd_tx,
            router: Router::new(),
            received_msg: Signal::new(),
            link_up: AtomicBool::new(true),
        });

        // Inbound path: decode and dispatch synchronously in the reader's
        // context so one frame's callbacks finish before the next frame is
        // decoded. Either way the medium was busy.
        let weak = Arc::downgrade(&shared);
        let cmd_tx = shared.cmd_tx.clone();
        port.received().connect(move |bytes: &Vec<u8>| {
            let _ = cmd_tx.send(IfaceCmd::MediumBusy);
            match Ax25Frame::decode(bytes) {
                Ok(frame) => {
                    if let Some(shared) = weak.upgrade() {
                        let frame = Arc::new(frame);
                        debug!("received {}", frame);
                        shared.received_msg.emit(&frame);
                        shared.router.dispatch(&frame.path.destination, &frame);
                    }
                }
                Err(e) => debug!("dropping undecodable frame: {}", e),
            }
        });

        info!("AX.25 interface up on KISS port {}", port.index());
        tokio::spawn(pump_task(port, cmd_rx, config, Arc::downgrade(&shared)));

        Self { shared }
    }

    /// Queue a frame for transmission
    pub fn transmit(&self, frame: impl Into<Arc<Ax25Frame>>) -> Result<Arc<Ax25Frame>, LinkError> {
        self.enqueue(frame.into(), None, None)
    }

    /// Queue a frame and get a callback once it reaches the KISS port
    pub fn transmit_with_callback(
        &self,
        frame: impl Into<Arc<Ax25Frame>>,
        on_sent: impl FnOnce(&Ax25Frame) + Send + 'static,
    ) -> Result<Arc<Ax25Frame>, LinkError> {
        self.enqueue(frame.into(), Some(Box::new(on_sent)), None)
    }

    /// Queue a frame that is silently dropped if it has not reached the
    /// port within `max_age`
    pub fn transmit_expiring(
        &self,
        frame: impl Into<Arc<Ax25Frame>>,
        max_age: Duration,
    ) -> Result<Arc<Ax25Frame>, LinkError> {
        self.enqueue(frame.into(), None, Some(Instant::now() + max_age))
    }

    fn enqueue(
        &self,
        frame: Arc<Ax25Frame>,
        on_sent: Option<OnSent>,
        deadline: Option<Instant>,
    ) -> Result<Arc<Ax25Frame>, LinkError> {
        if !self.shared.link_up.load(Ordering::SeqCst) {
            return Err(LinkError::DeviceClosed);
        }
        debug!("queueing {}", frame);
        self.shared
            .cmd_tx
            .send(IfaceCmd::Transmit(TxEntry {
                frame: frame.clone(),
                on_sent,
                deadline,
                cancelled: false,
            }))
            .map_err(|_| LinkError::DeviceClosed)?;
        Ok(frame)
    }

    /// Cancel queued transmissions of this frame, matched by identity.
    /// A no-op for frames already sent.
    pub fn cancel_transmit(&self, frame: &Arc<Ax25Frame>) {
        debug!("cancelling {}", frame);
        let _ = self.shared.cmd_tx.send(IfaceCmd::Cancel(frame.clone()));
    }

    /// Signal fired with every decoded inbound frame
    pub fn received_msg(&self) -> &Signal<Arc<Ax25Frame>> {
        &self.shared.received_msg
    }

    /// Bind a receiver to an exact destination callsign
    pub fn bind(
        &self,
        callsign: &str,
        ssid: Option<u8>,
        callback: impl Fn(&Arc<Ax25Frame>) + Send + Sync + 'static,
    ) -> BindingId {
        self.shared.router.bind(callsign, ssid, callback)
    }

    /// Bind a receiver to a destination callsign pattern
    pub fn bind_regex(
        &self,
        pattern: &str,
        ssid: Option<u8>,
        callback: impl Fn(&Arc<Ax25Frame>) + Send + Sync + 'static,
    ) -> Result<BindingId, regex::Error> {
        self.shared.router.bind_regex(pattern, ssid, callback)
    }

    /// Remove a binding
    pub fn unbind(&self, id: BindingId) -> bool {
        self.shared.router.unbind(id)
    }

    /// Whether the underlying device is still accepting traffic
    pub fn is_up(&self) -> bool {
        self.shared.link_up.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Ax25Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ax25Interface")
            .field("up", &self.is_up())
            .finish()
    }
}

/// Scheduler actor: owns the transmit queue and the clear-to-send deadline
async fn pump_task(
    port: KissPort,
    mut cmd_rx: mpsc::UnboundedReceiver<IfaceCmd>,
    config: InterfaceConfig,
    shared: Weak<IfaceShared>,
) {
    let cts_delay = Duration::from_millis(config.cts_delay_ms);
    let mut queue: VecDeque<TxEntry> = VecDeque::new();
    // The medium starts idle; the first transmit goes straight out
    let mut cts_expiry = Instant::now();

    loop {
        if shared.strong_count() == 0 {
            break;
        }

        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                None => break,
                Some(IfaceCmd::Transmit(entry)) => queue.push_back(entry),
                Some(IfaceCmd::Cancel(frame)) => {
                    for entry in queue.iter_mut() {
                        if Arc::ptr_eq(&entry.frame, &frame) {
                            entry.cancelled = true;
                        }
                    }
                }
                Some(IfaceCmd::MediumBusy) => {
                    cts_expiry = bump_cts(cts_expiry, cts_delay, config.cts_rand_ms);
                }
            },
            _ = tokio::time::sleep_until(cts_expiry), if !queue.is_empty() => {
                if transmit_next(&port, &mut queue, &shared) {
                    cts_expiry = bump_cts(cts_expiry, cts_delay, config.cts_rand_ms);
                }
            }
        }
    }

    debug!("AX.25 scheduler stopped");
}

/// Next clear-to-send deadline; never moves backwards
fn bump_cts(current: Instant, delay: Duration, rand_ms: u64) -> Instant {
    let jitter = Duration::from_micros(
        (rand::thread_rng().gen::<f64>() * rand_ms as f64 * 1000.0) as u64,
    );
    (Instant::now() + delay + jitter).max(current)
}

/// Send the first live queue entry; returns whether anything went out
fn transmit_next(port: &KissPort, queue: &mut VecDeque<TxEntry>, shared: &Weak<IfaceShared>) -> bool {
    while let Some(entry) = queue.pop_front() {
        if entry.cancelled {
            debug!("discarding cancelled frame {}", entry.frame);
            continue;
        }
        if let Some(deadline) = entry.deadline {
            if Instant::now() > deadline {
                debug!("discarding expired frame {}", entry.frame);
                continue;
            }
        }

        match port.send(&entry.frame.encode()) {
            Ok(()) => {
                debug!("transmitted {}", entry.frame);
                if let Some(on_sent) = entry.on_sent {
                    on_sent(&entry.frame);
                }
                return true;
            }
            Err(e) => {
                warn!("transmit of {} failed: {}", entry.frame, e);
                // The device is gone; fail everything still queued
                queue.clear();
                if let Some(shared) = shared.upgrade() {
                    shared.link_up.store(false, Ordering::SeqCst);
                }
                return false;
            }
        }
    }
    false
}
