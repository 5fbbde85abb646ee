use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUESTS: MetricDef = MetricDef {
    name: "webhook.requests",
    metric_type: MetricType::Counter,
    description: "Webhook requests processed. Tagged with receiver, status.",
};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "webhook.request.duration",
    metric_type: MetricType::Histogram,
    description: "Webhook request duration in seconds. Tagged with receiver, status.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "webhook.requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of webhook requests currently being processed",
};

pub const REJECTIONS: MetricDef = MetricDef {
    name: "webhook.rejections",
    metric_type: MetricType::Counter,
    description: "Requests rejected before dispatch. Tagged with receiver, reason.",
};

pub const HANDLER_INVOCATIONS: MetricDef = MetricDef {
    name: "webhook.handler.invocations",
    metric_type: MetricType::Counter,
    description: "Handler invocations. Tagged with receiver, handler, outcome.",
};

pub const HANDLER_DURATION: MetricDef = MetricDef {
    name: "webhook.handler.duration",
    metric_type: MetricType::Histogram,
    description: "Handler invocation duration in seconds. Tagged with handler.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUESTS,
    REQUEST_DURATION,
    REQUESTS_INFLIGHT,
    REJECTIONS,
    HANDLER_INVOCATIONS,
    HANDLER_DURATION,
];
