use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::llm_providers::ProviderId;

const NO_TIMESTAMP: i64 = i64::MIN;

/// Process-wide orchestration counters. Increment-only between resets; every
/// field is an independent atomic so concurrent requests never lose updates.
#[derive(Debug)]
pub struct OrchestrationStats {
    total_requests: AtomicU64,
    primary_successes: AtomicU64,
    primary_failures: AtomicU64,
    fallback_successes: AtomicU64,
    fallback_failures: AtomicU64,
    last_fallback_at_ms: AtomicI64,
    provider_usage: [AtomicU64; ProviderId::ALL.len()],
}

impl Default for OrchestrationStats {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestrationStats {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            primary_successes: AtomicU64::new(0),
            primary_failures: AtomicU64::new(0),
            fallback_successes: AtomicU64::new(0),
            fallback_failures: AtomicU64::new(0),
            last_fallback_at_ms: AtomicI64::new(NO_TIMESTAMP),
            provider_usage: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub(crate) fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_primary_success(&self, provider: ProviderId) {
        self.primary_successes.fetch_add(1, Ordering::Relaxed);
        self.provider_usage[provider.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_primary_failure(&self) {
        self.primary_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fallback_attempt(&self) {
        self.last_fallback_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub(crate) fn record_fallback_success(&self, provider: ProviderId) {
        self.fallback_successes.fetch_add(1, Ordering::Relaxed);
        self.provider_usage[provider.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fallback_failure(&self) {
        self.fallback_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.primary_successes.store(0, Ordering::Relaxed);
        self.primary_failures.store(0, Ordering::Relaxed);
        self.fallback_successes.store(0, Ordering::Relaxed);
        self.fallback_failures.store(0, Ordering::Relaxed);
        self.last_fallback_at_ms.store(NO_TIMESTAMP, Ordering::Relaxed);
        for counter in &self.provider_usage {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let primary_successes = self.primary_successes.load(Ordering::Relaxed);
        let fallback_successes = self.fallback_successes.load(Ordering::Relaxed);
        let last_fallback_ms = self.last_fallback_at_ms.load(Ordering::Relaxed);

        let provider_usage = ProviderId::ALL
            .iter()
            .map(|id| {
                (
                    id.as_str().to_string(),
                    self.provider_usage[id.index()].load(Ordering::Relaxed),
                )
            })
            .collect();

        StatsSnapshot {
            total_requests,
            primary_successes,
            primary_failures: self.primary_failures.load(Ordering::Relaxed),
            fallback_successes,
            fallback_failures: self.fallback_failures.load(Ordering::Relaxed),
            last_fallback_at: if last_fallback_ms == NO_TIMESTAMP {
                None
            } else {
                Utc.timestamp_millis_opt(last_fallback_ms).single()
            },
            provider_usage,
            success_rate: rate(primary_successes + fallback_successes, total_requests),
            fallback_rate: rate(fallback_successes, total_requests),
        }
    }
}

fn rate(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Point-in-time copy of the counters plus derived rates (percentages).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub primary_successes: u64,
    pub primary_failures: u64,
    pub fallback_successes: u64,
    pub fallback_failures: u64,
    pub last_fallback_at: Option<DateTime<Utc>>,
    pub provider_usage: BTreeMap<String, u64>,
    pub success_rate: f64,
    pub fallback_rate: f64,
}
