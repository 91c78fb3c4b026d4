//! Decision cache for the authorization engine.
//!
//! Memoizes `(subject, action, resource type)` evaluations for a bounded TTL.
//!
//! - **Lazy expiry**: expired entries are treated as misses and removed on read
//! - **Bulk invalidation**: every policy or role mutation clears the whole cache
//! - **Generations**: an evaluation that raced with an invalidation is not stored
//! - **Advisory sweeping**: an optional background task drops expired entries
//!
//! Owned-scope matches are only ever stored as
//! [`Evaluation::PendingOwnership`]; a final allow for an owned-scope rule is
//! refused by [`DecisionCache::put`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use gatekeeper_core::cache::{CacheConfig, DecisionCache, DecisionKey};
//!
//! let cache = DecisionCache::new(CacheConfig::default());
//! let key = DecisionKey::for_subject(&subject, "read", "article");
//!
//! let generation = cache.generation();
//! let evaluation = matcher.evaluate(&subject, "read", "article", &attrs).await?;
//! cache.put_if_current(generation, key, evaluation);
//! ```

pub mod key;

pub use key::{roles_fingerprint, DecisionKey};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::rbac::models::{DecisionKind, Evaluation, Scope};
use crate::telemetry::metrics as authz_metrics;

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Decision cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Disable to evaluate every request against the store.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Time-to-live for cached evaluations.
    #[serde(default = "default_ttl", with = "humantime_serde")]
    pub ttl: Duration,

    /// Maximum number of entries held at once.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Interval of the background expiry sweep (None = lazy expiry only).
    #[serde(default, with = "humantime_serde")]
    pub sweep_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            ttl: default_ttl(),
            max_entries: default_max_entries(),
            sweep_interval: None,
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration builder.
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }
}

/// Builder for cache configuration.
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = ttl;
        self
    }

    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.config.max_entries = max_entries;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = Some(interval);
        self
    }

    pub fn build(self) -> CacheConfig {
        self.config
    }
}

fn default_enabled() -> bool {
    true
}

fn default_ttl() -> Duration {
    Duration::from_secs(60)
}

fn default_max_entries() -> usize {
    10_000
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Statistics
// ═══════════════════════════════════════════════════════════════════════════════

/// Decision cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Total number of cache hits
    pub hits: u64,

    /// Total number of cache misses (including expired entries)
    pub misses: u64,

    /// Current number of entries
    pub entries: u64,

    /// Number of bulk invalidations
    pub invalidations: u64,

    /// Entries dropped for capacity
    pub evictions: u64,

    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

impl CacheStats {
    /// Calculate the hit rate.
    pub fn calculate_hit_rate(&mut self) {
        let total = self.hits + self.misses;
        self.hit_rate = if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        };
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Decision Cache
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct CachedEvaluation {
    evaluation: Evaluation,
    expires_at: Instant,
}

impl CachedEvaluation {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Shared, concurrently readable cache of matcher evaluations.
#[derive(Debug)]
pub struct DecisionCache {
    entries: DashMap<DecisionKey, CachedEvaluation>,
    config: CacheConfig,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    evictions: AtomicU64,
}

impl DecisionCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a live evaluation. Expired entries count as misses.
    pub fn get(&self, key: &DecisionKey) -> Option<Evaluation> {
        if !self.config.enabled {
            return None;
        }

        let now = Instant::now();
        let cached = self.entries.get(key).map(|entry| entry.value().clone());
        match cached {
            Some(cached) if !cached.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                authz_metrics::record_cache_hit();
                debug!(key = %key, "Decision cache hit");
                Some(cached.evaluation)
            }
            Some(_) => {
                // Only drop it if nobody refreshed the entry in the meantime.
                self.entries.remove_if(key, |_, entry| entry.is_expired(now));
                self.misses.fetch_add(1, Ordering::Relaxed);
                authz_metrics::record_cache_miss("expired");
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                authz_metrics::record_cache_miss("not_found");
                None
            }
        }
    }

    /// Store an evaluation with the configured TTL.
    pub fn put(&self, key: DecisionKey, evaluation: Evaluation) -> bool {
        self.put_with_ttl(key, evaluation, self.config.ttl)
    }

    /// Store an evaluation with a specific TTL.
    ///
    /// Returns `false` when the entry was refused.
    pub fn put_with_ttl(&self, key: DecisionKey, evaluation: Evaluation, ttl: Duration) -> bool {
        if !self.config.enabled || ttl.is_zero() {
            return false;
        }
        if is_owned_allow(&evaluation) {
            debug!(key = %key, "Refusing to cache an owned-scope allow");
            return false;
        }

        self.make_room();
        self.entries.insert(
            key,
            CachedEvaluation {
                evaluation,
                expires_at: Instant::now() + ttl,
            },
        );
        authz_metrics::record_cache_size(self.entries.len());
        true
    }

    /// Store an evaluation only if no invalidation happened since `generation`
    /// was read.
    pub fn put_if_current(&self, generation: u64, key: DecisionKey, evaluation: Evaluation) -> bool {
        self.put_if_current_with_ttl(generation, key, evaluation, self.config.ttl)
    }

    /// [`put_if_current`](Self::put_if_current) with a caller-chosen TTL,
    /// clamped to the configured one.
    pub fn put_if_current_with_ttl(
        &self,
        generation: u64,
        key: DecisionKey,
        evaluation: Evaluation,
        ttl: Duration,
    ) -> bool {
        if self.generation() != generation {
            debug!(key = %key, "Skipping cache write after concurrent invalidation");
            return false;
        }

        let stored = self.put_with_ttl(key.clone(), evaluation, ttl.min(self.config.ttl));

        // An invalidation may have slipped in between the check and the insert.
        if stored && self.generation() != generation {
            self.entries.remove(&key);
            return false;
        }
        stored
    }

    /// Current invalidation generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Drop every entry. Called on every policy or role mutation.
    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let dropped = self.entries.len();
        self.entries.clear();
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        authz_metrics::record_cache_invalidation();
        authz_metrics::record_cache_size(0);
        debug!(dropped, "Decision cache invalidated");
    }

    /// Remove expired entries. Returns the number removed.
    pub fn sweep_expired(&self) -> u64 {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len()) as u64;

        if removed > 0 {
            debug!("Swept {} expired decision cache entries", removed);
            authz_metrics::record_cache_size(self.entries.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len() as u64,
            invalidations: self.invalidations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: 0.0,
        };
        stats.calculate_hit_rate();
        stats
    }

    /// Spawn the advisory background sweep. The task ends once the cache is
    /// dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        info!(interval_ms = interval.as_millis() as u64, "Starting decision cache sweeper");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(cache) => {
                        cache.sweep_expired();
                    }
                    None => break,
                }
            }
            debug!("Decision cache sweeper stopped");
        })
    }

    /// Keep the entry count under `max_entries`: sweep expired entries first,
    /// then evict a tenth of the cache.
    fn make_room(&self) {
        if self.entries.len() < self.config.max_entries {
            return;
        }
        self.sweep_expired();
        if self.entries.len() < self.config.max_entries {
            return;
        }

        let to_evict = (self.config.max_entries / 10).max(1);
        let keys: Vec<DecisionKey> = self
            .entries
            .iter()
            .take(to_evict)
            .map(|e| e.key().clone())
            .collect();
        let mut evicted = 0u64;
        for key in keys {
            if self.entries.remove(&key).is_some() {
                evicted += 1;
            }
        }
        self.evictions.fetch_add(evicted, Ordering::Relaxed);
        debug!("Evicted {} entries from decision cache", evicted);
    }
}

impl Default for DecisionCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

fn is_owned_allow(evaluation: &Evaluation) -> bool {
    match evaluation {
        Evaluation::Final(decision) => {
            decision.kind() == DecisionKind::Allow
                && decision
                    .matched_rule()
                    .is_some_and(|rule| rule.scope() == Scope::Owned)
        }
        Evaluation::PendingOwnership(_) => false,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
