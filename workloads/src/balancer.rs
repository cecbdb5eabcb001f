use crate::registry::{RegistryError, WorkloadRegistry};
use crate::types::redact;
use std::collections::HashMap;

#[derive(thiserror::Error, Debug)]
pub enum SelectError {
    #[error("no running nodes found for tag '{tag}'")]
    NoNodes { tag: String },
    #[error("index {index} out of range, {running} running workloads")]
    IndexOutOfRange { index: i64, running: usize },
    #[error("no running workloads")]
    NoRunningWorkloads,
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Picks a backend node for a request from the tenant's registry and the
/// current in-flight counts.
#[derive(Clone)]
pub struct LoadBalancer {
    registry: WorkloadRegistry,
}

impl LoadBalancer {
    pub fn new(registry: WorkloadRegistry) -> Self {
        LoadBalancer { registry }
    }

    /// Returns the node with the fewest in-flight requests among the running
    /// nodes carrying `tag`. Ties go to the node listed first.
    pub async fn select_node(&self, api_key: &str, tag: &str) -> Result<String, SelectError> {
        let snapshot = match self.registry.snapshot(api_key) {
            Some(snapshot) if snapshot.has_running() => snapshot,
            _ => {
                tracing::debug!(
                    tenant = %redact(api_key),
                    "No running workloads cached, forcing refresh"
                );
                self.registry.force_refresh(api_key).await?
            }
        };

        let candidates = snapshot.nodes_for_tag(tag);
        let counts = self.registry.tracker().counts(api_key);

        let node = least_busy(candidates, &counts).ok_or_else(|| SelectError::NoNodes {
            tag: tag.to_string(),
        })?;

        tracing::debug!(
            tenant = %redact(api_key),
            tag,
            node,
            in_flight = counts.get(node).copied().unwrap_or(0),
            "Selected node"
        );
        Ok(node.to_string())
    }

    /// Returns the running node at `index` in upstream order, after a forced
    /// refresh.
    pub async fn select_by_index(&self, api_key: &str, index: i64) -> Result<String, SelectError> {
        let snapshot = self.registry.force_refresh(api_key).await?;
        let running = snapshot.running_nodes();

        if running.is_empty() {
            return Err(SelectError::NoRunningWorkloads);
        }

        usize::try_from(index)
            .ok()
            .and_then(|i| running.get(i))
            .cloned()
            .ok_or(SelectError::IndexOutOfRange {
                index,
                running: running.len(),
            })
    }
}

/// First node with the strictly smallest count. Nodes without an entry in
/// `counts` have nothing in flight.
pub fn least_busy<'a>(candidates: &'a [String], counts: &HashMap<String, u64>) -> Option<&'a str> {
    let mut best: Option<(&str, u64)> = None;
    for node in candidates {
        let count = counts.get(node).copied().unwrap_or(0);
        match best {
            Some((_, min)) if count >= min => {}
            _ => best = Some((node.as_str(), count)),
        }
    }
    best.map(|(node, _)| node)
}
