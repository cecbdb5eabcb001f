use crate::source::{ListingError, WorkloadSource};
use crate::types::Workload;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// In-memory listing API. Serves the configured workloads to every tenant or
/// fails with a 500 when toggled.
#[derive(Default)]
pub struct FakeSource {
    workloads: Mutex<Vec<Workload>>,
    failing: AtomicBool,
    fetches: AtomicUsize,
}

impl FakeSource {
    pub fn with_workloads(workloads: Vec<Workload>) -> Self {
        FakeSource {
            workloads: Mutex::new(workloads),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        let source = Self::default();
        source.set_failing(true);
        source
    }

    pub fn set_workloads(&self, workloads: Vec<Workload>) {
        *self.workloads.lock() = workloads;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkloadSource for FakeSource {
    async fn fetch(&self, _api_key: &str) -> Result<Vec<Workload>, ListingError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ListingError::Status {
                status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                body: "listing unavailable".to_string(),
            });
        }
        Ok(self.workloads.lock().clone())
    }
}

/// A running workload on `node` with the given tags.
pub fn workload(node: &str, tags: &[&str]) -> Workload {
    Workload {
        created: 0,
        expires: 0,
        node: node.to_string(),
        running: true,
        status: "running".to_string(),
        kind: "gpu".to_string(),
        workload: format!("wl-{node}"),
        tags: (!tags.is_empty()).then(|| tags.iter().map(|t| t.to_string()).collect()),
    }
}
