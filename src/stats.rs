use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::models::{ScoreGroup, SourceKind};
use crate::proxy::ProxyStats;

/// Live pipeline counters for one run.
///
/// Monotonic, lock-free, safe to snapshot mid-run. One instance lives
/// as long as the pipeline and backs `get_stats()`.
#[derive(Default)]
pub struct RunStats {
    rows_read: AtomicU64,
    rows_skipped: AtomicU64,
    duplicates_merged: AtomicU64,
    unique_leads: AtomicU64,
    leads_enriched: AtomicU64,
    leads_degraded: AtomicU64,
    leads_scored: AtomicU64,
    errors_logged: AtomicU64,
    score_bands: [AtomicU64; 4],
    groups: [AtomicU64; 4],
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rows_read(&self, n: u64) {
        self.rows_read.fetch_add(n, Ordering::Relaxed);
    }

    pub fn row_skipped(&self) {
        self.rows_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_duplicates_merged(&self, n: u64) {
        self.duplicates_merged.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_unique_leads(&self, n: u64) {
        self.unique_leads.store(n, Ordering::Relaxed);
    }

    pub fn lead_enriched(&self, degraded: bool) {
        self.leads_enriched.fetch_add(1, Ordering::Relaxed);
        if degraded {
            self.leads_degraded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn lead_scored(&self, score: i32, group: ScoreGroup) {
        self.leads_scored.fetch_add(1, Ordering::Relaxed);
        self.score_bands[band_index(score)].fetch_add(1, Ordering::Relaxed);
        self.groups[group_index(group)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_errors(&self, n: u64) {
        self.errors_logged.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RunStatsSnapshot {
        RunStatsSnapshot {
            rows_read: self.rows_read.load(Ordering::Relaxed),
            rows_skipped: self.rows_skipped.load(Ordering::Relaxed),
            duplicates_merged: self.duplicates_merged.load(Ordering::Relaxed),
            unique_leads: self.unique_leads.load(Ordering::Relaxed),
            leads_enriched: self.leads_enriched.load(Ordering::Relaxed),
            leads_degraded: self.leads_degraded.load(Ordering::Relaxed),
            leads_scored: self.leads_scored.load(Ordering::Relaxed),
            errors_logged: self.errors_logged.load(Ordering::Relaxed),
            score_distribution: ScoreDistribution {
                band_0_25: self.score_bands[0].load(Ordering::Relaxed),
                band_26_50: self.score_bands[1].load(Ordering::Relaxed),
                band_51_75: self.score_bands[2].load(Ordering::Relaxed),
                band_76_100: self.score_bands[3].load(Ordering::Relaxed),
            },
            groups: GroupCounts {
                high_priority: self.groups[0].load(Ordering::Relaxed),
                medium_priority: self.groups[1].load(Ordering::Relaxed),
                low_priority: self.groups[2].load(Ordering::Relaxed),
                unqualified: self.groups[3].load(Ordering::Relaxed),
            },
        }
    }
}

fn band_index(score: i32) -> usize {
    match score {
        i32::MIN..=25 => 0,
        26..=50 => 1,
        51..=75 => 2,
        _ => 3,
    }
}

fn group_index(group: ScoreGroup) -> usize {
    match group {
        ScoreGroup::HighPriority => 0,
        ScoreGroup::MediumPriority => 1,
        ScoreGroup::LowPriority => 2,
        ScoreGroup::Unqualified => 3,
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RunStatsSnapshot {
    pub rows_read: u64,
    pub rows_skipped: u64,
    pub duplicates_merged: u64,
    pub unique_leads: u64,
    pub leads_enriched: u64,
    pub leads_degraded: u64,
    pub leads_scored: u64,
    pub errors_logged: u64,
    pub score_distribution: ScoreDistribution,
    pub groups: GroupCounts,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ScoreDistribution {
    #[serde(rename = "0-25")]
    pub band_0_25: u64,
    #[serde(rename = "26-50")]
    pub band_26_50: u64,
    #[serde(rename = "51-75")]
    pub band_51_75: u64,
    #[serde(rename = "76-100")]
    pub band_76_100: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct GroupCounts {
    pub high_priority: u64,
    pub medium_priority: u64,
    pub low_priority: u64,
    pub unqualified: u64,
}

/// Per-source call counters backing `get_api_stats()`.
pub struct ApiStats {
    sources: BTreeMap<SourceKind, SourceCounters>,
}

#[derive(Default)]
struct SourceCounters {
    calls: AtomicU64,
    successes: AtomicU64,
    not_found: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    circuit_open: AtomicU64,
    total_latency_ms: AtomicU64,
}

impl ApiStats {
    pub fn new() -> Self {
        let sources = SourceKind::ALL
            .iter()
            .map(|&source| (source, SourceCounters::default()))
            .collect();
        Self { sources }
    }

    /// Status strings follow the audit-log vocabulary: `success`,
    /// `not_found`, `timeout`, `circuit_open`, or a failure kind.
    pub fn record(&self, source: SourceKind, status: &str, latency_ms: u64) {
        let Some(counters) = self.sources.get(&source) else {
            return;
        };
        counters.calls.fetch_add(1, Ordering::Relaxed);
        counters
            .total_latency_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
        match status {
            "success" => counters.successes.fetch_add(1, Ordering::Relaxed),
            "not_found" => counters.not_found.fetch_add(1, Ordering::Relaxed),
            "timeout" => counters.timeouts.fetch_add(1, Ordering::Relaxed),
            "circuit_open" => counters.circuit_open.fetch_add(1, Ordering::Relaxed),
            _ => counters.failures.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn snapshot(&self, proxies: Option<ProxyStats>) -> ApiStatsSnapshot {
        let sources = self
            .sources
            .iter()
            .map(|(source, c)| {
                let calls = c.calls.load(Ordering::Relaxed);
                let total_latency = c.total_latency_ms.load(Ordering::Relaxed);
                SourceApiSnapshot {
                    source: source.name(),
                    calls,
                    successes: c.successes.load(Ordering::Relaxed),
                    not_found: c.not_found.load(Ordering::Relaxed),
                    failures: c.failures.load(Ordering::Relaxed),
                    timeouts: c.timeouts.load(Ordering::Relaxed),
                    circuit_open: c.circuit_open.load(Ordering::Relaxed),
                    avg_latency_ms: if calls > 0 { total_latency / calls } else { 0 },
                }
            })
            .collect();
        ApiStatsSnapshot { sources, proxies }
    }
}

impl Default for ApiStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceApiSnapshot {
    pub source: &'static str,
    pub calls: u64,
    pub successes: u64,
    pub not_found: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub circuit_open: u64,
    pub avg_latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiStatsSnapshot {
    pub sources: Vec<SourceApiSnapshot>,
    /// Absent when the run egresses directly.
    pub proxies: Option<ProxyStats>,
}
