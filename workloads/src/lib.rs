//! Tenant-scoped view of backend nodes.
//!
//! The [`registry::WorkloadRegistry`] caches the workloads reported by the
//! listing API for every active tenant and keeps them fresh with one
//! background task per tenant. The [`tracker::RequestTracker`] counts requests
//! that are currently being forwarded to each node, and the
//! [`balancer::LoadBalancer`] combines both to pick the least busy node.

pub mod balancer;
pub mod config;
pub mod metrics_defs;
pub mod registry;
pub mod source;
pub mod tracker;
pub mod types;

#[cfg(any(test, feature = "testutils"))]
pub mod testutils;

pub use balancer::{LoadBalancer, SelectError};
pub use config::RefreshConfig;
pub use registry::{RegistryError, Snapshot, WorkloadRegistry};
pub use source::{ListingClient, ListingError, WorkloadSource};
pub use tracker::{InFlightGuard, RequestTracker};
pub use types::{API_KEY_HEADER, Workload, redact};
