//! Metrics definitions for the workload registry and request tracker.

use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of requests currently being forwarded to backend nodes",
};

pub const TRACKER_UNDERFLOW: MetricDef = MetricDef {
    name: "tracker.underflow",
    metric_type: MetricType::Counter,
    description: "Number of in-flight decrements that were clamped at zero",
};

pub const WORKLOADS_FETCH_DURATION: MetricDef = MetricDef {
    name: "workloads.fetch.duration",
    metric_type: MetricType::Histogram,
    description: "Time to fetch a tenant's workloads from the listing API in seconds",
};

pub const WORKLOADS_FETCH_FAILURE: MetricDef = MetricDef {
    name: "workloads.fetch.failure",
    metric_type: MetricType::Counter,
    description: "Number of failed workload listing fetches",
};

pub const REGISTRY_TENANTS: MetricDef = MetricDef {
    name: "registry.tenants",
    metric_type: MetricType::Gauge,
    description: "Number of tenants with a cached registry and refresh task",
};

pub const REGISTRY_EVICTIONS: MetricDef = MetricDef {
    name: "registry.evictions",
    metric_type: MetricType::Counter,
    description: "Number of tenant registries evicted after inactivity",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUESTS_INFLIGHT,
    TRACKER_UNDERFLOW,
    WORKLOADS_FETCH_DURATION,
    WORKLOADS_FETCH_FAILURE,
    REGISTRY_TENANTS,
    REGISTRY_EVICTIONS,
];
