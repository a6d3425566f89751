use shared::metrics_defs::{MetricDef, MetricType};

pub const RECONCILIATIONS: MetricDef = MetricDef {
    name: "reconciliations",
    metric_type: MetricType::Counter,
    description: "Reconciliation attempts. Tagged with outcome.",
};

pub const TRIGGERS_SKIPPED: MetricDef = MetricDef {
    name: "triggers.skipped",
    metric_type: MetricType::Counter,
    description: "Triggers acknowledged without reconciliation (non-enrolment events)",
};

pub const TRIGGER_DURATION: MetricDef = MetricDef {
    name: "trigger.duration",
    metric_type: MetricType::Histogram,
    description: "Webhook handling duration in seconds",
};

pub const ALL_METRICS: &[MetricDef] = &[RECONCILIATIONS, TRIGGERS_SKIPPED, TRIGGER_DURATION];
