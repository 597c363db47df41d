//! APRS UI-frame digipeater
//!
//! Implements WIDEn-N / TRACEn-N style digipeating. For every connected
//! [`AprsInterface`] the digipeater watches the deduplicated receive stream
//! and rewrites the digipeater path of frames that name it:
//!
//! - an exact alias (`WIDE`, `RELAY`, `GATE`, the interface callsign, or
//!   user-added) is replaced with the local callsign, repeated-bit set
//! - a `WIDEn-N`/`TRACEn-N` hop gets the local callsign inserted ahead of
//!   it and its remaining hop count decremented; a spent hop keeps its
//!   repeated bit set so downstream stations skip it
//!
//! Digipeats only ever go back out the interface they arrived on, and carry
//! a queue deadline: if the medium stays busy past `digipeater_timeout` the
//! frame is dropped instead of sent, which keeps busy networks from
//! replaying stale traffic.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, LazyLock, Mutex, Weak};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use ax_link::SlotId;
use ax_protocol::frame::Ax25Frame;
use ax_protocol::{Callsign, FrameError, Path};

use crate::dedup::{frame_hash, DedupCache};
use crate::interface::{AprsInterface, AprsRx};

/// `WIDEn`/`TRACEn` hop alias pattern
static HOP_ALIAS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(WIDE|TRACE)([0-9])$").expect("pattern is valid"));

/// Digipeater configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DigipeaterConfig {
    /// Maximum age of a queued digipeat before it is dropped (ms)
    pub digipeater_timeout_ms: u64,
    /// Exact aliases this station answers to
    pub aliases: Vec<String>,
    /// Window for the cross-interface duplicate check (ms)
    pub dedup_expiry_ms: u64,
}

impl Default for DigipeaterConfig {
    fn default() -> Self {
        Self {
            digipeater_timeout_ms: 5_000,
            aliases: vec!["WIDE".into(), "RELAY".into(), "GATE".into()],
            dedup_expiry_ms: 28_000,
        }
    }
}

struct DigiState {
    aliases: HashSet<Callsign>,
    dedup: DedupCache,
    connections: HashMap<Callsign, SlotId>,
}

struct DigiShared {
    timeout: Duration,
    state: Mutex<DigiState>,
}

/// A WIDEn-N digipeater spanning one or more APRS interfaces
#[derive(Clone)]
pub struct AprsDigipeater {
    shared: Arc<DigiShared>,
}

impl AprsDigipeater {
    pub fn new(config: DigipeaterConfig) -> Result<Self, FrameError> {
        let aliases = config
            .aliases
            .iter()
            .map(|alias| Callsign::from_str(alias))
            .collect::<Result<HashSet<_>, _>>()?;

        Ok(Self {
            shared: Arc::new(DigiShared {
                timeout: Duration::from_millis(config.digipeater_timeout_ms),
                state: Mutex::new(DigiState {
                    aliases,
                    dedup: DedupCache::new(Duration::from_millis(config.dedup_expiry_ms)),
                    connections: HashMap::new(),
                }),
            }),
        })
    }

    /// Add exact aliases this digipeater answers to
    pub fn add_aliases(&self, aliases: &[&str]) -> Result<(), FrameError> {
        let mut state = self.shared.state.lock().unwrap();
        for alias in aliases {
            state.aliases.insert(Callsign::from_str(alias)?);
        }
        Ok(())
    }

    /// Remove exact aliases
    pub fn remove_aliases(&self, aliases: &[&str]) -> Result<(), FrameError> {
        let mut state = self.shared.state.lock().unwrap();
        for alias in aliases {
            state.aliases.remove(&Callsign::from_str(alias)?);
        }
        Ok(())
    }

    /// Whether the digipeater answers to this exact alias
    pub fn has_alias(&self, alias: &Callsign) -> bool {
        self.shared.state.lock().unwrap().aliases.contains(alias)
    }

    /// Hook into an APRS interface's receive stream and start answering to
    /// its callsign. Digipeats for traffic heard here go back out this
    /// interface only.
    pub fn connect(&self, aprsint: &AprsInterface) {
        let mycall = aprsint.mycall().clone();
        info!("digipeater connected to {}", mycall);

        let weak = Arc::downgrade(&self.shared);
        let iface = Arc::downgrade(aprsint.shared());
        let slot = aprsint.received_msg().connect(move |rx: &AprsRx| {
            let (Some(shared), Some(iface)) = (weak.upgrade(), iface.upgrade()) else {
                return;
            };
            receive(&shared, &AprsInterface::from_shared(iface), rx);
        });

        let mut state = self.shared.state.lock().unwrap();
        state.aliases.insert(mycall.clone());
        state.connections.insert(mycall, slot);
    }

    /// Detach from an interface and stop answering to its callsign
    pub fn disconnect(&self, aprsint: &AprsInterface) {
        let mycall = aprsint.mycall();
        let slot = {
            let mut state = self.shared.state.lock().unwrap();
            state.aliases.remove(mycall);
            state.connections.remove(mycall)
        };
        if let Some(slot) = slot {
            aprsint.received_msg().disconnect(slot);
            info!("digipeater disconnected from {}", mycall);
        }
    }
}

impl std::fmt::Debug for AprsDigipeater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock().unwrap();
        f.debug_struct("AprsDigipeater")
            .field("aliases", &state.aliases.len())
            .field("connections", &state.connections.len())
            .finish()
    }
}

/// Handle one deduplicated inbound frame on the interface it arrived on
fn receive(shared: &Arc<DigiShared>, iface: &AprsInterface, rx: &AprsRx) {
    let frame = &rx.frame;
    if !frame.is_ui() {
        return;
    }

    let mycall = iface.mycall();
    // Never digipeat our own traffic, nor anything we already repeated
    if frame.path.source == *mycall {
        return;
    }
    if frame.path.digipeaters.iter().any(|digi| digi == mycall) {
        return;
    }

    let new_digis = {
        let mut state = shared.state.lock().unwrap();
        // A digi on two interfaces hears the same frame twice
        if state.dedup.check_and_insert(frame_hash(frame)) {
            debug!("already digipeated {}", frame);
            return;
        }
        let Some(new_digis) = rewrite_path(&state.aliases, mycall, &frame.path.digipeaters) else {
            return;
        };
        new_digis
    };

    let path = match Path::new(
        frame.path.destination.clone(),
        frame.path.source.clone(),
        new_digis,
    ) {
        Ok(path) => path,
        Err(e) => {
            debug!("not digipeating {}: {}", frame, e);
            return;
        }
    };

    let outgoing = Ax25Frame {
        path,
        control: frame.control,
        pid: frame.pid,
        payload: frame.payload.clone(),
    };
    debug!("digipeating {}", outgoing);
    if let Err(e) = iface.ax25().transmit_expiring(outgoing, shared.timeout) {
        debug!("digipeat transmit failed: {}", e);
    }
}

/// Rewrite the digipeater list for retransmission, or None if the frame is
/// not ours to repeat
fn rewrite_path(
    aliases: &HashSet<Callsign>,
    mycall: &Callsign,
    digipeaters: &[Callsign],
) -> Option<Vec<Callsign>> {
    // Only the first un-repeated slot is eligible
    let idx = digipeaters.iter().position(|digi| !digi.ch())?;
    let slot = &digipeaters[idx];
    let mut rewritten = digipeaters.to_vec();

    if aliases.contains(slot) {
        rewritten[idx] = mycall.with_ch(true);
        return Some(rewritten);
    }

    if HOP_ALIAS.is_match(slot.base()) {
        let remaining = slot.ssid();
        if remaining == 0 {
            // Spent hop that nobody marked; stale
            debug!("hops exhausted on {}", slot);
            return None;
        }
        let mut next = slot.with_ssid(remaining - 1);
        if remaining == 1 {
            next = next.with_ch(true);
        }
        rewritten[idx] = next;
        rewritten.insert(idx, mycall.with_ch(true));
        return Some(rewritten);
    }

    None
}
