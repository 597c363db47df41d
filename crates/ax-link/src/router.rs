//! Callsign-based receiver routing
//!
//! A [`Router`] holds an ordered list of bindings, each matching a callsign
//! (exactly or by regular expression) and optionally an SSID. Dispatching an
//! item invokes the callback of every matching binding in the order the
//! bindings were created. Regular expressions are compiled once, at bind
//! time, and searched against the callsign base only; the SSID is matched
//! separately.
//!
//! The router is generic over the routed item: the AX.25 interface routes
//! whole frames on the destination address, the APRS layer reuses it to
//! route decoded payloads on the message addressee.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use regex::Regex;
use tracing::debug;

use ax_protocol::Callsign;

/// Handle returned by bind calls, used to unbind later
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingId(u64);

type BindingCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

enum CallsignPattern {
    Exact(String),
    Regex(Regex),
}

impl CallsignPattern {
    fn matches(&self, base: &str) -> bool {
        match self {
            CallsignPattern::Exact(s) => s == base,
            CallsignPattern::Regex(re) => re.is_match(base),
        }
    }
}

struct Binding<T> {
    id: BindingId,
    pattern: CallsignPattern,
    ssid: Option<u8>,
    callback: BindingCallback<T>,
}

/// Ordered callsign/SSID receiver table
pub struct Router<T> {
    bindings: Mutex<Vec<Binding<T>>>,
    next_id: AtomicU64,
}

impl<T> Router<T> {
    pub fn new() -> Self {
        Self {
            bindings: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Bind a callback to an exact callsign. `ssid` of `None` matches every
    /// SSID.
    pub fn bind(
        &self,
        callsign: &str,
        ssid: Option<u8>,
        callback: impl Fn(&T) + Send + Sync + 'static,
    ) -> BindingId {
        self.add(
            CallsignPattern::Exact(callsign.to_ascii_uppercase()),
            ssid,
            Arc::new(callback),
        )
    }

    /// Bind a callback to a callsign regular expression, compiled here once
    pub fn bind_regex(
        &self,
        pattern: &str,
        ssid: Option<u8>,
        callback: impl Fn(&T) + Send + Sync + 'static,
    ) -> Result<BindingId, regex::Error> {
        let re = Regex::new(pattern)?;
        Ok(self.add(CallsignPattern::Regex(re), ssid, Arc::new(callback)))
    }

    fn add(
        &self,
        pattern: CallsignPattern,
        ssid: Option<u8>,
        callback: BindingCallback<T>,
    ) -> BindingId {
        let id = BindingId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.bindings.lock().unwrap().push(Binding {
            id,
            pattern,
            ssid,
            callback,
        });
        id
    }

    /// Remove a binding; returns whether it existed
    pub fn unbind(&self, id: BindingId) -> bool {
        let mut bindings = self.bindings.lock().unwrap();
        let before = bindings.len();
        bindings.retain(|b| b.id != id);
        bindings.len() != before
    }

    /// Invoke every binding matching `address`, in bind order. Returns the
    /// number of callbacks invoked.
    pub fn dispatch(&self, address: &Callsign, item: &T) -> usize {
        let matching: Vec<BindingCallback<T>> = {
            let bindings = self.bindings.lock().unwrap();
            bindings
                .iter()
                .filter(|b| {
                    b.pattern.matches(address.base())
                        && b.ssid.map_or(true, |ssid| ssid == address.ssid())
                })
                .map(|b| b.callback.clone())
                .collect()
        };

        debug!("dispatching {} to {} receivers", address, matching.len());
        for callback in &matching {
            callback(item);
        }
        matching.len()
    }

    /// Number of live bindings
    pub fn len(&self) -> usize {
        self.bindings.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Router<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("bindings", &self.len())
            .finish()
    }
}
