use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Proxy request duration in seconds until response headers. Tagged with status.",
};

pub const STREAM_ERRORS: MetricDef = MetricDef {
    name: "stream.errors",
    metric_type: MetricType::Counter,
    description: "Number of relayed response bodies cut short by an upstream read error",
};

pub const GATEWAY_ERRORS: MetricDef = MetricDef {
    name: "gateway.errors",
    metric_type: MetricType::Counter,
    description: "Number of requests that could not reach the selected node",
};

pub const ALL_METRICS: &[MetricDef] = &[REQUEST_DURATION, STREAM_ERRORS, GATEWAY_ERRORS];
