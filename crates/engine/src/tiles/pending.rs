use std::fmt;
use std::sync::{Arc, OnceLock};

/// Read side of an asynchronous tile operation.
///
/// The tracker never blocks on these: it polls [`Pending::get`] once per
/// tick and moves on if the value is not there yet. Clones share the same
/// slot, so a host can hand out one handle per coordinate to every caller.
pub struct Pending<T> {
    slot: Arc<OnceLock<T>>,
}

/// Write side of a [`Pending`]. Completing twice keeps the first value.
pub struct Completer<T> {
    slot: Arc<OnceLock<T>>,
}

impl<T> Pending<T> {
    /// A fresh, unresolved handle and the completer that resolves it.
    pub fn new() -> (Completer<T>, Pending<T>) {
        let slot = Arc::new(OnceLock::new());
        (
            Completer {
                slot: Arc::clone(&slot),
            },
            Pending { slot },
        )
    }

    /// An already-resolved handle.
    pub fn ready(value: T) -> Self {
        let slot = OnceLock::new();
        let _ = slot.set(value);
        Self {
            slot: Arc::new(slot),
        }
    }

    pub fn is_done(&self) -> bool {
        self.slot.get().is_some()
    }

    pub fn get(&self) -> Option<&T> {
        self.slot.get()
    }
}

impl<T> Completer<T> {
    /// Resolve the handle. Returns `false` if it was already resolved.
    pub fn complete(self, value: T) -> bool {
        self.slot.set(value).is_ok()
    }

    /// True once every [`Pending`] for this slot has been dropped.
    pub fn is_abandoned(&self) -> bool {
        Arc::strong_count(&self.slot) == 1
    }
}

impl<T> Clone for Pending<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot.get() {
            Some(value) => f.debug_tuple("Pending::Done").field(value).finish(),
            None => f.write_str("Pending::Waiting"),
        }
    }
}
