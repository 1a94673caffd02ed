//! Metrics definitions for the media mirror.

use shared::metrics_defs::{MetricDef, MetricType};

pub const CACHE_HIT: MetricDef = MetricDef {
    name: "cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of lookups served from a fresh cache entry",
};

pub const CACHE_MISS: MetricDef = MetricDef {
    name: "cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of lookups that found no fresh cache entry",
};

pub const CACHE_STORE_ERROR: MetricDef = MetricDef {
    name: "cache.store_error",
    metric_type: MetricType::Counter,
    description: "Cache backend failures that were degraded to a miss or a no-op",
};

pub const CACHE_CLEANUP_PURGED: MetricDef = MetricDef {
    name: "cache.cleanup.purged",
    metric_type: MetricType::Counter,
    description: "Entries removed by the retention sweep",
};

pub const UPSTREAM_REQUEST_DURATION: MetricDef = MetricDef {
    name: "upstream.request.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete a request to a third-party API in seconds",
};

pub const UPSTREAM_REQUEST_ERROR: MetricDef = MetricDef {
    name: "upstream.request.error",
    metric_type: MetricType::Counter,
    description: "Requests to a third-party API that failed",
};

pub const API_REQUEST: MetricDef = MetricDef {
    name: "api.request",
    metric_type: MetricType::Counter,
    description: "Requests handled by the public API, tagged by endpoint and status",
};

pub const ALL_METRICS: &[MetricDef] = &[
    CACHE_HIT,
    CACHE_MISS,
    CACHE_STORE_ERROR,
    CACHE_CLEANUP_PURGED,
    UPSTREAM_REQUEST_DURATION,
    UPSTREAM_REQUEST_ERROR,
    API_REQUEST,
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn metric_names_are_unique() {
        let names: HashSet<_> = ALL_METRICS.iter().map(|m| m.name).collect();
        assert_eq!(names.len(), ALL_METRICS.len());
    }
}
