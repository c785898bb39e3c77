//! Bounded in-memory usage ledger.
//!
//! Holds the most recent proxy-call outcomes, newest first, and derives
//! aggregate statistics from them on demand. Nothing is persisted; the ledger
//! starts empty on every process start.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::services::price_value;

/// Maximum number of entries retained before the oldest is evicted.
pub const LEDGER_CAPACITY: usize = 1000;

/// Number of entries returned by [`UsageLedger::recent`] callers that do not
/// ask for a specific amount.
pub const DEFAULT_RECENT_LIMIT: usize = 100;

/// Endpoint groups reported by [`UsageLedger::statistics`].
const TOP_ENDPOINTS: usize = 20;

/// One completed (successful or failed) proxy call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageLogEntry {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub backend_host: String,
    pub backend_path: String,
    pub price: String,
    pub status_code: u16,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointUsage {
    pub endpoint: String,
    pub count: u64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostUsage {
    pub host: String,
    pub count: u64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub total_requests: usize,
    /// Sum of entry prices, formatted with four decimals.
    pub total_cost: String,
    pub by_endpoint: Vec<EndpointUsage>,
    pub by_host: Vec<HostUsage>,
}

/// Bounded, most-recent-first store of [`UsageLogEntry`] records.
#[derive(Debug)]
pub struct UsageLedger {
    entries: Mutex<VecDeque<UsageLogEntry>>,
    capacity: usize,
}

impl Default for UsageLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::with_capacity(LEDGER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(LEDGER_CAPACITY))),
            capacity,
        }
    }

    // A panic while holding the lock cannot leave the deque half-mutated,
    // so a poisoned lock is still safe to reuse.
    fn lock(&self) -> MutexGuard<'_, VecDeque<UsageLogEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert `entry` as the most recent record, evicting the oldest when full.
    pub fn record(&self, entry: UsageLogEntry) {
        let mut entries = self.lock();
        entries.push_front(entry);
        while entries.len() > self.capacity {
            entries.pop_back();
        }
    }

    /// Up to `limit` most recent entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<UsageLogEntry> {
        self.lock().iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Aggregate counts and costs over every entry currently held.
    pub fn statistics(&self) -> UsageStats {
        let entries = self.lock();

        let mut total_cost = 0.0;
        let mut by_endpoint: Vec<EndpointUsage> = Vec::new();
        let mut endpoint_index: HashMap<String, usize> = HashMap::new();
        let mut by_host: Vec<HostUsage> = Vec::new();
        let mut host_index: HashMap<&str, usize> = HashMap::new();

        for entry in entries.iter() {
            let cost = price_value(&entry.price).unwrap_or(0.0);
            total_cost += cost;

            let key = format!("{} {}", entry.method, entry.path);
            let idx = *endpoint_index.entry(key.clone()).or_insert_with(|| {
                by_endpoint.push(EndpointUsage {
                    endpoint: key,
                    count: 0,
                    total_cost: 0.0,
                });
                by_endpoint.len() - 1
            });
            by_endpoint[idx].count += 1;
            by_endpoint[idx].total_cost += cost;

            let idx = *host_index
                .entry(entry.backend_host.as_str())
                .or_insert_with(|| {
                    by_host.push(HostUsage {
                        host: entry.backend_host.clone(),
                        count: 0,
                        total_cost: 0.0,
                    });
                    by_host.len() - 1
                });
            by_host[idx].count += 1;
            by_host[idx].total_cost += cost;
        }

        // Stable sorts: ties keep first-seen (most recent) order.
        by_endpoint.sort_by(|a, b| b.count.cmp(&a.count));
        by_endpoint.truncate(TOP_ENDPOINTS);
        by_host.sort_by(|a, b| b.count.cmp(&a.count));

        UsageStats {
            total_requests: entries.len(),
            total_cost: format!("{total_cost:.4}"),
            by_endpoint,
            by_host,
        }
    }
}
