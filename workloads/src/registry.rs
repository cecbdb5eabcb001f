use crate::config::RefreshConfig;
use crate::metrics_defs::{
    REGISTRY_EVICTIONS, REGISTRY_TENANTS, WORKLOADS_FETCH_DURATION, WORKLOADS_FETCH_FAILURE,
};
use crate::source::{ListingError, WorkloadSource};
use crate::tracker::RequestTracker;
use crate::types::{Workload, redact};
use indexmap::IndexMap;
use parking_lot::RwLock;
use shared::{counter, gauge, histogram};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Tag that selects every running node of a tenant.
pub const ALL_TAG: &str = "all";

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("failed to fetch workloads: {0}")]
    Listing(#[from] ListingError),
}

/// The workloads of one tenant as of the last successful fetch, together with
/// the indexes derived from them.
///
/// A snapshot is never mutated; an update swaps in a new one, so the workload
/// list and the tag index are always read together.
#[derive(Debug, Default)]
pub struct Snapshot {
    workloads: Vec<Workload>,
    // Running nodes in upstream order.
    running: Vec<String>,
    // Tags in first-seen order, nodes in upstream order.
    tag_index: IndexMap<String, Vec<String>>,
}

impl Snapshot {
    pub fn new(workloads: Vec<Workload>) -> Self {
        let mut running = Vec::new();
        let mut tag_index: IndexMap<String, Vec<String>> = IndexMap::new();

        for workload in workloads.iter().filter(|w| w.is_running()) {
            running.push(workload.node.clone());
            for tag in workload.tags() {
                tag_index
                    .entry(tag.clone())
                    .or_default()
                    .push(workload.node.clone());
            }
        }

        Snapshot {
            workloads,
            running,
            tag_index,
        }
    }

    pub fn workloads(&self) -> &[Workload] {
        &self.workloads
    }

    pub fn running_nodes(&self) -> &[String] {
        &self.running
    }

    pub fn has_running(&self) -> bool {
        !self.running.is_empty()
    }

    /// Candidate nodes for `tag` in index order. [`ALL_TAG`] selects every
    /// running node.
    pub fn nodes_for_tag(&self, tag: &str) -> &[String] {
        if tag == ALL_TAG {
            return &self.running;
        }
        self.tag_index.get(tag).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tag_index.keys().map(String::as_str)
    }
}

struct RefreshTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct TenantEntry {
    // Identifies the refresh task that owns this entry.
    id: u64,
    snapshot: Option<Arc<Snapshot>>,
    last_fetch: Option<Instant>,
    last_access: Instant,
    task: RefreshTask,
}

struct RegistryInner {
    source: Arc<dyn WorkloadSource>,
    tracker: Arc<RequestTracker>,
    config: RefreshConfig,
    tenants: RwLock<HashMap<String, TenantEntry>>,
    shutdown: CancellationToken,
    next_id: AtomicU64,
}

/// Per-tenant cache of workloads with one background refresh task per tenant.
///
/// A tenant entry is created on first use together with its refresh task. The
/// task refetches the workloads every `interval` and removes the entry once
/// the tenant has been idle past `idle_eviction` with nothing in flight. An
/// entry and its task always come and go together.
#[derive(Clone)]
pub struct WorkloadRegistry {
    inner: Arc<RegistryInner>,
}

impl WorkloadRegistry {
    pub fn new(
        source: Arc<dyn WorkloadSource>,
        tracker: Arc<RequestTracker>,
        config: RefreshConfig,
    ) -> Self {
        WorkloadRegistry {
            inner: Arc::new(RegistryInner {
                source,
                tracker,
                config,
                tenants: RwLock::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn tracker(&self) -> &Arc<RequestTracker> {
        &self.inner.tracker
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.inner.config
    }

    /// Records client activity for a tenant, postponing its eviction.
    pub fn touch(&self, api_key: &str) {
        if let Some(entry) = self.inner.tenants.write().get_mut(api_key) {
            entry.last_access = Instant::now();
        }
    }

    pub fn contains(&self, api_key: &str) -> bool {
        self.inner.tenants.read().contains_key(api_key)
    }

    pub fn tenant_count(&self) -> usize {
        self.inner.tenants.read().len()
    }

    pub fn snapshot(&self, api_key: &str) -> Option<Arc<Snapshot>> {
        self.inner
            .tenants
            .read()
            .get(api_key)
            .and_then(|entry| entry.snapshot.clone())
    }

    pub fn has_running(&self, api_key: &str) -> bool {
        self.snapshot(api_key).is_some_and(|s| s.has_running())
    }

    /// Creates the tenant entry and starts its refresh task unless one exists.
    ///
    /// The existence check and the creation happen under the same write lock,
    /// so concurrent callers attach to a single task. Returns true when a new
    /// task was started.
    pub fn ensure_running(&self, api_key: &str) -> bool {
        let mut tenants = self.inner.tenants.write();

        if let Some(entry) = tenants.get_mut(api_key) {
            entry.last_access = Instant::now();
            tracing::debug!(tenant = %redact(api_key), "Refresh cycle already running");
            return false;
        }

        if self.inner.shutdown.is_cancelled() {
            return false;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.inner.shutdown.child_token();
        let handle = tokio::spawn(run_refresh_task(
            Arc::downgrade(&self.inner),
            api_key.to_string(),
            id,
            token.clone(),
        ));

        tenants.insert(
            api_key.to_string(),
            TenantEntry {
                id,
                snapshot: None,
                last_fetch: None,
                last_access: Instant::now(),
                task: RefreshTask { token, handle },
            },
        );
        gauge!(REGISTRY_TENANTS).set(tenants.len() as f64);

        tracing::info!(tenant = %redact(api_key), "Starting cache refresh cycle");
        true
    }

    /// Calls the listing API for a tenant.
    pub async fn fetch(&self, api_key: &str) -> Result<Vec<Workload>, ListingError> {
        let start = Instant::now();
        let result = self.inner.source.fetch(api_key).await;
        histogram!(WORKLOADS_FETCH_DURATION).record(start.elapsed().as_secs_f64());

        if result.is_err() {
            counter!(WORKLOADS_FETCH_FAILURE).increment(1);
        }
        result
    }

    /// Replaces the tenant's workloads and tag index in one step and stamps
    /// the fetch time.
    ///
    /// Tenants without an entry are left alone; the snapshot is still
    /// returned to the caller.
    pub fn update(&self, api_key: &str, workloads: Vec<Workload>) -> Arc<Snapshot> {
        let snapshot = Arc::new(Snapshot::new(workloads));

        let mut tenants = self.inner.tenants.write();
        let Some(entry) = tenants.get_mut(api_key) else {
            tracing::debug!(tenant = %redact(api_key), "No registry for tenant, skipping update");
            return snapshot;
        };

        log_node_changes(api_key, entry.snapshot.as_deref(), &snapshot);

        entry.snapshot = Some(snapshot.clone());
        entry.last_fetch = Some(Instant::now());
        snapshot
    }

    /// Returns the cached workloads when they are fresh and include at least
    /// one running node, otherwise fetches synchronously.
    ///
    /// When the fetch fails the last good snapshot is returned instead; only a
    /// tenant that has never been fetched successfully gets an error.
    pub async fn get_or_refresh(&self, api_key: &str) -> Result<Arc<Snapshot>, RegistryError> {
        self.ensure_running(api_key);

        let (cached, last_fetch) = {
            let tenants = self.inner.tenants.read();
            match tenants.get(api_key) {
                Some(entry) => (entry.snapshot.clone(), entry.last_fetch),
                None => (None, None),
            }
        };

        if let (Some(snapshot), Some(fetched_at)) = (&cached, last_fetch) {
            let fresh = fetched_at.elapsed() <= self.inner.config.freshness();
            if fresh && snapshot.has_running() {
                return Ok(snapshot.clone());
            }
            tracing::debug!(
                tenant = %redact(api_key),
                fresh,
                running = snapshot.has_running(),
                "Cached workloads unusable, forcing refresh"
            );
        }

        self.refresh_now(api_key, cached).await
    }

    /// Fetches and stores the tenant's workloads regardless of cache state.
    pub async fn force_refresh(&self, api_key: &str) -> Result<Arc<Snapshot>, RegistryError> {
        tracing::debug!(tenant = %redact(api_key), "Forcing workload refresh");
        self.ensure_running(api_key);
        let cached = self.snapshot(api_key);
        self.refresh_now(api_key, cached).await
    }

    async fn refresh_now(
        &self,
        api_key: &str,
        fallback: Option<Arc<Snapshot>>,
    ) -> Result<Arc<Snapshot>, RegistryError> {
        match self.fetch(api_key).await {
            Ok(workloads) => Ok(self.update(api_key, workloads)),
            Err(e) => match fallback {
                Some(snapshot) => {
                    tracing::warn!(
                        tenant = %redact(api_key),
                        error = %e,
                        "Failed to refresh workloads, using cached data"
                    );
                    Ok(snapshot)
                }
                None => Err(e.into()),
            },
        }
    }

    /// Stops every refresh task and waits for them to exit. Tenant entries are
    /// dropped and no new ones are created afterwards.
    pub async fn shutdown(&self) {
        tracing::info!("Stopping all cache refresh cycles");
        self.inner.shutdown.cancel();

        let tasks: Vec<(String, RefreshTask)> = self
            .inner
            .tenants
            .write()
            .drain()
            .map(|(api_key, entry)| (api_key, entry.task))
            .collect();
        gauge!(REGISTRY_TENANTS).set(0.0);

        for (api_key, task) in tasks {
            tracing::debug!(tenant = %redact(&api_key), "Stopping refresh");
            task.token.cancel();
            if let Err(e) = task.handle.await {
                tracing::error!(tenant = %redact(&api_key), error = %e, "Refresh task failed");
            }
        }
    }

    /// One pass of the refresh cycle. Returns false when the task must stop.
    async fn tick(&self, api_key: &str, id: u64, token: &CancellationToken) -> bool {
        let last_access = {
            let tenants = self.inner.tenants.read();
            match tenants.get(api_key) {
                Some(entry) if entry.id == id => entry.last_access,
                _ => {
                    tracing::warn!(
                        tenant = %redact(api_key),
                        "Registry was removed or replaced, stopping refresh cycle"
                    );
                    return false;
                }
            }
        };

        // The counter table is read only after the registry lock is released.
        let has_active_requests = self.inner.tracker.has_in_flight(api_key);
        let idle = last_access.elapsed();

        if !has_active_requests && idle > self.inner.config.idle_eviction() {
            match self.evict(api_key, id) {
                Eviction::Evicted => {
                    tracing::info!(
                        tenant = %redact(api_key),
                        idle_secs = idle.as_secs(),
                        "Tenant inactive with no active requests, stopping refresh cycle"
                    );
                    return false;
                }
                Eviction::Replaced => return false,
                // Touched after `last_access` was read
                Eviction::Accessed => {}
            }
        } else if !has_active_requests && idle > self.inner.config.idle_warning() {
            tracing::debug!(
                tenant = %redact(api_key),
                idle_secs = idle.as_secs(),
                "Tenant inactive, winding down but continuing refresh cycle"
            );
        }

        let result = tokio::select! {
            _ = token.cancelled() => return false,
            result = self.fetch(api_key) => result,
        };

        match result {
            Ok(workloads) => {
                let count = workloads.len();
                self.update(api_key, workloads);
                if count == 0 {
                    tracing::warn!(
                        tenant = %redact(api_key),
                        "No workloads found, continuing refresh cycle"
                    );
                } else {
                    tracing::debug!(tenant = %redact(api_key), count, "Refreshed workloads");
                }
            }
            Err(e) => {
                tracing::error!(tenant = %redact(api_key), error = %e, "Failed fetching workloads");
            }
        }

        true
    }

    // Removes the entry only if it still belongs to the task `id` and is
    // still idle once the write lock is held.
    fn evict(&self, api_key: &str, id: u64) -> Eviction {
        let mut tenants = self.inner.tenants.write();
        match tenants.get(api_key) {
            Some(entry) if entry.id == id => {
                if entry.last_access.elapsed() <= self.inner.config.idle_eviction() {
                    return Eviction::Accessed;
                }
            }
            _ => return Eviction::Replaced,
        }

        tenants.remove(api_key);
        gauge!(REGISTRY_TENANTS).set(tenants.len() as f64);
        counter!(REGISTRY_EVICTIONS).increment(1);
        Eviction::Evicted
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Eviction {
    Evicted,
    Accessed,
    Replaced,
}

async fn run_refresh_task(
    inner: Weak<RegistryInner>,
    api_key: String,
    id: u64,
    token: CancellationToken,
) {
    // The entry is created alongside a synchronous fetch, so the first
    // background refresh happens one period later.
    let period = match inner.upgrade() {
        Some(inner) => inner.config.interval(),
        None => return,
    };
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::info!(tenant = %redact(&api_key), "Stopping cache refresh");
                return;
            }
            _ = interval.tick() => {
                tracing::debug!(tenant = %redact(&api_key), "Cache refresh tick");
            }
        }

        let Some(inner) = inner.upgrade() else {
            return;
        };
        let registry = WorkloadRegistry { inner };
        if !registry.tick(&api_key, id, &token).await {
            return;
        }
    }
}

fn log_node_changes(api_key: &str, previous: Option<&Snapshot>, next: &Snapshot) {
    let tenant = redact(api_key);
    let new_nodes: HashSet<&str> = next.running.iter().map(String::as_str).collect();

    let Some(previous) = previous else {
        if next.has_running() {
            tracing::info!(
                tenant = %tenant,
                running = next.running.len(),
                "Initial workloads"
            );
        } else {
            tracing::info!(tenant = %tenant, "No running workloads");
        }
        for node in &next.running {
            tracing::debug!(tenant = %tenant, node = %node, "New node added");
        }
        return;
    };

    let old_nodes: HashSet<&str> = previous.running.iter().map(String::as_str).collect();

    for node in new_nodes.difference(&old_nodes) {
        tracing::info!(tenant = %tenant, node = %node, "New node added");
    }
    for node in old_nodes.difference(&new_nodes) {
        tracing::info!(tenant = %tenant, node = %node, "Node removed");
    }

    if !next.has_running() && previous.has_running() {
        tracing::info!(tenant = %tenant, "All workloads stopped");
    }
}
