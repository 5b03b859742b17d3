use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use tokio::sync::oneshot;

use super::error::TransportError;

pub(crate) type CallbackResult = Result<Value, TransportError>;

/// Single-use identifier handed to the remote side, rendered as `<prefix><seq>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallbackId {
    prefix: &'static str,
    seq: u64,
}

impl CallbackId {
    pub fn prefix(&self) -> &'static str {
        self.prefix
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix, self.seq)
    }
}

struct PendingCallback {
    prefix: &'static str,
    tx: oneshot::Sender<CallbackResult>,
}

#[derive(Default)]
struct RegistryState {
    next_seq: u64,
    pending: HashMap<u64, PendingCallback>,
}

/// Table of outstanding callbacks, indexed by an incrementing sequence number.
///
/// An entry is removed exactly once: when it is fulfilled, or when it is neutralized
/// after a timeout. Fulfilling a missing entry is a no-op, so a response that arrives
/// after its window has closed can never reach the caller.
#[derive(Default)]
pub struct CallbackRegistry {
    state: Mutex<RegistryState>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(
        &self,
        prefix: &'static str,
    ) -> (CallbackId, oneshot::Receiver<CallbackResult>) {
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();
        state.next_seq += 1;
        let seq = state.next_seq;
        state.pending.insert(seq, PendingCallback { prefix, tx });
        (CallbackId { prefix, seq }, rx)
    }

    /// Invokes the callback for `id`. Returns `false` if it was already used or neutralized.
    pub(crate) fn fulfill(&self, id: &CallbackId, result: CallbackResult) -> bool {
        let entry = {
            let mut state = self.lock();
            match state.pending.get(&id.seq) {
                Some(entry) if entry.prefix == id.prefix => state.pending.remove(&id.seq),
                _ => None,
            }
        };

        match entry {
            // The receiver may already be gone if the caller stopped waiting.
            Some(entry) => entry.tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Resolves a callback by the name the remote side echoed back.
    pub(crate) fn fulfill_named(&self, name: &str, result: CallbackResult) -> bool {
        match self.parse_name(name) {
            Some(id) => self.fulfill(&id, result),
            None => false,
        }
    }

    /// Drops the entry so any later invocation is a no-op.
    pub(crate) fn neutralize(&self, id: &CallbackId) -> bool {
        self.lock().pending.remove(&id.seq).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    fn parse_name(&self, name: &str) -> Option<CallbackId> {
        // Callers may reference the callback through a dotted path.
        let name = name.rsplit('.').next().unwrap_or(name);
        let digits_at = name
            .char_indices()
            .rev()
            .take_while(|(_, c)| c.is_ascii_digit())
            .last()
            .map(|(idx, _)| idx)?;
        let (prefix, digits) = name.split_at(digits_at);
        let seq = digits.parse::<u64>().ok()?;

        let state = self.lock();
        let entry = state.pending.get(&seq)?;
        if entry.prefix != prefix {
            return None;
        }
        Some(CallbackId {
            prefix: entry.prefix,
            seq,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        // A poisoned registry still holds consistent entries; keep serving it.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::CallbackRegistry;
    use serde_json::json;

    #[tokio::test]
    async fn callbacks_fire_at_most_once() {
        let registry = CallbackRegistry::new();
        let (id, rx) = registry.register("_");
        assert_eq!(id.to_string(), "_1");
        assert_eq!(registry.pending_count(), 1);

        assert!(registry.fulfill(&id, Ok(json!([1]))));
        assert!(!registry.fulfill(&id, Ok(json!([2]))));
        assert_eq!(registry.pending_count(), 0);

        let delivered = rx.await.expect("sender should have fired").expect("ok payload");
        assert_eq!(delivered, json!([1]));
    }

    #[test]
    fn neutralized_callbacks_ignore_late_responses() {
        let registry = CallbackRegistry::new();
        let (id, _rx) = registry.register("meta_");
        assert!(registry.neutralize(&id));
        assert!(!registry.fulfill(&id, Ok(json!({}))));
        assert!(!registry.fulfill_named("meta_1", Ok(json!({}))));
    }

    #[test]
    fn identifiers_are_unique_per_registry() {
        let registry = CallbackRegistry::new();
        let (first, _a) = registry.register("_");
        let (second, _b) = registry.register("meta_");
        let (third, _c) = registry.register("_");
        assert_eq!(first.to_string(), "_1");
        assert_eq!(second.to_string(), "meta_2");
        assert_eq!(third.to_string(), "_3");
    }

    #[test]
    fn named_fulfillment_checks_prefix_and_path() {
        let registry = CallbackRegistry::new();
        let (_id, _rx) = registry.register("meta_");
        assert!(!registry.fulfill_named("_1", Ok(json!({}))));
        assert!(!registry.fulfill_named("meta_", Ok(json!({}))));
        assert!(registry.fulfill_named("river.callbacks.meta_1", Ok(json!({}))));
    }
}
