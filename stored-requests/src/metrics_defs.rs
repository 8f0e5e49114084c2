//! Metrics definitions for stored-request caching and sync.

use shared::metrics_defs::{MetricDef, MetricType};

pub const CACHE_HIT: MetricDef = MetricDef {
    name: "stored_requests.cache.hit",
    metric_type: MetricType::Counter,
    description: "Lookups served from the in-memory cache",
};

pub const CACHE_MISS: MetricDef = MetricDef {
    name: "stored_requests.cache.miss",
    metric_type: MetricType::Counter,
    description: "Lookups that fell through to the backend",
};

pub const EVENT_SAVES: MetricDef = MetricDef {
    name: "stored_requests.events.saves",
    metric_type: MetricType::Counter,
    description: "Cache entries upserted by event producers",
};

pub const EVENT_INVALIDATIONS: MetricDef = MetricDef {
    name: "stored_requests.events.invalidations",
    metric_type: MetricType::Counter,
    description: "Cache entries dropped by event producers",
};

pub const POLL_ROWS: MetricDef = MetricDef {
    name: "stored_requests.poll.rows",
    metric_type: MetricType::Histogram,
    description: "Rows returned by one update-polling cycle",
};

pub const ALL_METRICS: &[MetricDef] = &[
    CACHE_HIT,
    CACHE_MISS,
    EVENT_SAVES,
    EVENT_INVALIDATIONS,
    POLL_ROWS,
];
