//! Common types for metrics definitions.
//!
//! Crates declare their metrics as `MetricDef` constants and list them in an
//! `ALL_METRICS` table so the binary can register descriptions up front.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

/// Registers descriptions for a crate's metric table with the installed
/// recorder. Safe to call before any recorder exists.
pub fn register_all(defs: &[MetricDef]) {
    for def in defs {
        match def.metric_type {
            MetricType::Counter => metrics::describe_counter!(def.name, def.description),
            MetricType::Gauge => metrics::describe_gauge!(def.name, def.description),
            MetricType::Histogram => metrics::describe_histogram!(def.name, def.description),
        }
    }
}

pub const REFRESH_ERRORS: MetricDef = MetricDef {
    name: "refresh.errors",
    metric_type: MetricType::Counter,
    description: "Scheduled refresh cycles that failed and kept the previous data",
};

pub const ALL_METRICS: &[MetricDef] = &[REFRESH_ERRORS];

#[macro_export]
macro_rules! counter {
    ($def:expr) => {
        metrics::counter!($def.name)
    };
    ($def:expr, $($key:expr => $value:expr),+ $(,)?) => {
        metrics::counter!($def.name, $($key => $value),+)
    };
}

#[macro_export]
macro_rules! gauge {
    ($def:expr) => {
        metrics::gauge!($def.name)
    };
}

#[macro_export]
macro_rules! histogram {
    ($def:expr) => {
        metrics::histogram!($def.name)
    };
}
