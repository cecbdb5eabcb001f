use crate::metrics_defs::{REQUESTS_INFLIGHT, TRACKER_UNDERFLOW};
use crate::types::redact;
use parking_lot::RwLock;
use shared::{counter, gauge};
use std::collections::HashMap;
use std::sync::Arc;

/// Counts the requests currently being forwarded, per tenant and node.
///
/// Missing entries read as zero and entries that drop back to zero are
/// removed, so the table only holds pairs with traffic in flight. The lock is
/// independent of the registry lock so forwarding never waits on a refresh.
#[derive(Debug, Default)]
pub struct RequestTracker {
    counts: RwLock<HashMap<String, HashMap<String, u64>>>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `delta` to the (tenant, node) counter.
    ///
    /// A decrement that would go below zero clamps the counter to zero and logs
    /// a warning instead of failing, so overlapping release paths cannot
    /// corrupt the table.
    pub fn adjust(&self, api_key: &str, node: &str, delta: i64) {
        let mut guard = self.counts.write();

        let current = guard
            .get(api_key)
            .and_then(|nodes| nodes.get(node))
            .copied()
            .unwrap_or(0);

        let next = match current.checked_add_signed(delta) {
            Some(next) => next,
            None if delta < 0 => {
                tracing::warn!(
                    tenant = %redact(api_key),
                    node,
                    current,
                    delta,
                    "Attempted to decrement in-flight requests below zero, clamping to 0"
                );
                counter!(TRACKER_UNDERFLOW).increment(1);
                0
            }
            None => u64::MAX,
        };

        if next == 0 {
            if let Some(nodes) = guard.get_mut(api_key) {
                nodes.remove(node);
                if nodes.is_empty() {
                    guard.remove(api_key);
                }
            }
        } else {
            guard
                .entry(api_key.to_string())
                .or_default()
                .insert(node.to_string(), next);
        }
        drop(guard);

        if next >= current {
            gauge!(REQUESTS_INFLIGHT).increment((next - current) as f64);
        } else {
            gauge!(REQUESTS_INFLIGHT).decrement((current - next) as f64);
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            self.log_in_flight();
        }
    }

    /// Increments the counter and returns a guard that decrements it on drop.
    pub fn acquire(self: &Arc<Self>, api_key: &str, node: &str) -> InFlightGuard {
        tracing::debug!(tenant = %redact(api_key), node, "Incrementing in-flight count");
        self.adjust(api_key, node, 1);
        InFlightGuard {
            tracker: self.clone(),
            api_key: api_key.to_string(),
            node: node.to_string(),
        }
    }

    pub fn count(&self, api_key: &str, node: &str) -> u64 {
        self.counts
            .read()
            .get(api_key)
            .and_then(|nodes| nodes.get(node))
            .copied()
            .unwrap_or(0)
    }

    /// Copy of the non-zero counters for a tenant.
    pub fn counts(&self, api_key: &str) -> HashMap<String, u64> {
        self.counts.read().get(api_key).cloned().unwrap_or_default()
    }

    pub fn has_in_flight(&self, api_key: &str) -> bool {
        self.counts
            .read()
            .get(api_key)
            .is_some_and(|nodes| nodes.values().any(|&count| count > 0))
    }

    pub fn log_in_flight(&self) {
        let guard = self.counts.read();
        for (api_key, nodes) in guard.iter() {
            tracing::debug!(tenant = %redact(api_key), "In-flight requests");
            for (node, count) in nodes {
                tracing::debug!(node = %node, count, "  in flight");
            }
        }
    }
}

/// Holds one in-flight slot for a (tenant, node) pair until dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    tracker: Arc<RequestTracker>,
    api_key: String,
    node: String,
}

impl InFlightGuard {
    pub fn node(&self) -> &str {
        &self.node
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        tracing::debug!(
            tenant = %redact(&self.api_key),
            node = %self.node,
            "Decrementing in-flight count"
        );
        self.tracker.adjust(&self.api_key, &self.node, -1);
    }
}
