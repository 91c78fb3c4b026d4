//! Authorization metrics.
//!
//! Thin wrappers over the `metrics` facade. The crate installs no exporter;
//! the embedding application chooses one (Prometheus, StatsD, ...).

use metrics::{counter, gauge};

use crate::rbac::models::DecisionKind;

pub const DECISIONS_TOTAL: &str = "authz_decisions_total";
pub const CACHE_HITS_TOTAL: &str = "authz_cache_hits_total";
pub const CACHE_MISSES_TOTAL: &str = "authz_cache_misses_total";
pub const CACHE_INVALIDATIONS_TOTAL: &str = "authz_cache_invalidations_total";
pub const CACHE_ENTRIES: &str = "authz_cache_entries";
pub const STORE_ERRORS_TOTAL: &str = "authz_store_errors_total";

pub fn record_decision(kind: DecisionKind) {
    counter!(DECISIONS_TOTAL, "kind" => kind.as_str()).increment(1);
}

pub fn record_cache_hit() {
    counter!(CACHE_HITS_TOTAL).increment(1);
}

pub fn record_cache_miss(reason: &'static str) {
    counter!(CACHE_MISSES_TOTAL, "reason" => reason).increment(1);
}

pub fn record_cache_invalidation() {
    counter!(CACHE_INVALIDATIONS_TOTAL).increment(1);
}

pub fn record_cache_size(entries: usize) {
    gauge!(CACHE_ENTRIES).set(entries as f64);
}

pub fn record_store_error(backend: &'static str) {
    counter!(STORE_ERRORS_TOTAL, "backend" => backend).increment(1);
}
