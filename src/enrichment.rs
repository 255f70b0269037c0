//! Enrichment orchestrator: fans each lead out to every applicable
//! registry behind the shared cache, rate limiter, proxy pool, retry
//! policy and per-source circuit breakers.
//!
//! Failures degrade, never abort: a lead that loses a source keeps the
//! payloads it did get and is scored from the partial profile.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::cache::ResultCache;
use crate::circuit::SourceCircuitBreakers;
use crate::config::Config;
use crate::errors::{AppError, FetchError};
use crate::models::{AggregatedProfile, AttemptStatus, LeadRecord, SourceKind, SourcePayload};
use crate::proxy::{ClientPool, ProxyPool, ProxyStats};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::sink::{ApiAuditLog, ErrorSink};
use crate::sources::SourceAdapter;
use crate::stats::ApiStats;

/// Upper bound on distinct (source, lead) cache entries held in memory.
const CACHE_CAPACITY: u64 = 100_000;
/// Ceiling for exponential retry backoff.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);
/// Rest window before a cooled proxy is eligible again.
const PROXY_COOLDOWN: Duration = Duration::from_secs(300);

pub struct Enricher {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    clients: ClientPool,
    proxies: Arc<ProxyPool>,
    limiter: RateLimiter,
    cache: ResultCache,
    breakers: SourceCircuitBreakers,
    retry: RetryPolicy,
    audit: Arc<ApiAuditLog>,
    api_stats: Arc<ApiStats>,
    errors: Arc<ErrorSink>,
    lead_deadline: Duration,
    max_workers: usize,
}

impl Enricher {
    pub fn new(
        config: &Config,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        errors: Arc<ErrorSink>,
        audit: Arc<ApiAuditLog>,
        api_stats: Arc<ApiStats>,
    ) -> Result<Self, AppError> {
        let proxies = if config.use_proxy {
            Arc::new(ProxyPool::new(&config.proxy_list, PROXY_COOLDOWN))
        } else {
            Arc::new(ProxyPool::disabled())
        };

        let rates: Vec<(SourceKind, u32)> = SourceKind::ALL
            .iter()
            .map(|&s| (s, config.rpm_for(s.name())))
            .collect();

        Ok(Self {
            adapters,
            clients: ClientPool::new(config.source_timeout)?,
            proxies,
            limiter: RateLimiter::new(&rates, config.lead_deadline),
            cache: ResultCache::new(config.cache_ttl, CACHE_CAPACITY),
            breakers: SourceCircuitBreakers::new(),
            retry: RetryPolicy::new(
                config.retry_attempts,
                config.retry_delay,
                MAX_RETRY_DELAY,
            ),
            audit,
            api_stats,
            errors,
            lead_deadline: config.lead_deadline,
            max_workers: config.max_workers,
        })
    }

    /// `None` when the run egresses directly.
    pub fn proxy_stats(&self) -> Option<ProxyStats> {
        let stats = self.proxies.stats();
        (stats.total > 0).then_some(stats)
    }

    /// Runs the cache's pending maintenance (expired-entry eviction)
    /// and reports how many live entries remain.
    pub async fn sweep_cache(&self) -> u64 {
        self.cache.sweep().await;
        self.cache.entry_count()
    }

    /// Enriches a whole batch with bounded concurrency. The returned
    /// vector is index-aligned with `leads`; `None` marks leads that
    /// were never started because cancellation was requested.
    pub async fn enrich_batch(
        self: &Arc<Self>,
        leads: &[LeadRecord],
        cancel: &watch::Receiver<bool>,
    ) -> Vec<Option<AggregatedProfile>> {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut set = JoinSet::new();

        for (idx, lead) in leads.iter().enumerate() {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            // Checked after the permit wait: a cancel that lands while the
            // pool is full must not start one more lead.
            if *cancel.borrow() {
                tracing::warn!(
                    "⚠️ Cancellation requested, {} of {} leads left unenriched",
                    leads.len() - idx,
                    leads.len()
                );
                break;
            }
            let this = Arc::clone(self);
            let lead = lead.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                let profile = this.enrich_lead(&lead, &cancel).await;
                drop(permit);
                (idx, profile)
            });
        }

        let mut profiles: Vec<Option<AggregatedProfile>> = vec![None; leads.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, profile)) => profiles[idx] = Some(profile),
                Err(err) => tracing::error!("❌ Enrichment task panicked: {}", err),
            }
        }
        profiles
    }

    /// Fans one lead out to every applicable source concurrently,
    /// bounded by the lead deadline. Sources still pending at the
    /// deadline are recorded as timeouts; everything already fetched is
    /// kept. Cancellation abandons pending calls without recording them
    /// and the partial profile still goes on to scoring.
    pub async fn enrich_lead(
        self: &Arc<Self>,
        lead: &LeadRecord,
        cancel: &watch::Receiver<bool>,
    ) -> AggregatedProfile {
        let mut profile = AggregatedProfile::default();
        let mut expected = Vec::new();
        let mut set = JoinSet::new();

        for adapter in &self.adapters {
            if !adapter.applicable(lead) {
                tracing::debug!(
                    "{}: {} skipped, lead lacks the search identifier",
                    lead.identity(),
                    adapter.kind()
                );
                continue;
            }
            expected.push(adapter.kind());
            let this = Arc::clone(self);
            let adapter = Arc::clone(adapter);
            let lead = lead.clone();
            set.spawn(async move {
                let started = Instant::now();
                let outcome = this.fetch_source(&lead, adapter.as_ref()).await;
                let latency_ms = started.elapsed().as_millis() as u64;
                (adapter.kind(), outcome, latency_ms)
            });
        }

        let deadline = tokio::time::sleep(self.lead_deadline);
        tokio::pin!(deadline);
        let mut cancel = cancel.clone();
        let cancelled = async move {
            loop {
                if *cancel.borrow_and_update() {
                    return;
                }
                if cancel.changed().await.is_err() {
                    // Sender gone without a cancel: nothing to wait for.
                    std::future::pending::<()>().await;
                }
            }
        };
        tokio::pin!(cancelled);

        loop {
            tokio::select! {
                joined = set.join_next() => {
                    match joined {
                        None => break,
                        Some(Ok((source, outcome, latency_ms))) => {
                            self.apply_outcome(&mut profile, lead, source, outcome, latency_ms);
                        }
                        Some(Err(err)) => {
                            tracing::error!("❌ Source task panicked for {}: {}", lead.identity(), err);
                        }
                    }
                }
                _ = &mut deadline => {
                    set.abort_all();
                    self.drain_after_abort(&mut set, &mut profile, lead).await;
                    let deadline_ms = self.lead_deadline.as_millis() as u64;
                    for source in &expected {
                        if profile.attempts.contains_key(source) {
                            continue;
                        }
                        profile.record_failure(*source, AttemptStatus::Timeout, deadline_ms);
                        self.audit.record(*source, &lead.phone, "timeout", self.lead_deadline);
                        self.api_stats.record(*source, "timeout", deadline_ms);
                        self.errors.source_timeout(lead, *source, self.lead_deadline);
                    }
                    tracing::warn!(
                        "⚠️ {} hit the {}s lead deadline",
                        lead.identity(),
                        self.lead_deadline.as_secs()
                    );
                    break;
                }
                _ = &mut cancelled => {
                    set.abort_all();
                    self.drain_after_abort(&mut set, &mut profile, lead).await;
                    tracing::warn!(
                        "⚠️ {} cancelled mid-enrichment, keeping {} fetched sources",
                        lead.identity(),
                        profile.attempts.len()
                    );
                    break;
                }
            }
        }

        profile.finalize(&expected);
        if profile.degraded {
            let succeeded = profile
                .attempts
                .values()
                .filter(|a| a.status == AttemptStatus::Success)
                .count();
            tracing::warn!(
                "⚠️ {} enriched degraded ({}/{} sources answered)",
                lead.identity(),
                succeeded,
                expected.len()
            );
        }
        profile
    }

    /// Joins what is left after `abort_all`, keeping outcomes from tasks
    /// that had already finished when the abort landed.
    async fn drain_after_abort(
        &self,
        set: &mut JoinSet<(SourceKind, Result<Option<SourcePayload>, FetchError>, u64)>,
        profile: &mut AggregatedProfile,
        lead: &LeadRecord,
    ) {
        while let Some(joined) = set.join_next().await {
            if let Ok((source, outcome, latency_ms)) = joined {
                self.apply_outcome(profile, lead, source, outcome, latency_ms);
            }
        }
    }

    fn apply_outcome(
        &self,
        profile: &mut AggregatedProfile,
        lead: &LeadRecord,
        source: SourceKind,
        outcome: Result<Option<SourcePayload>, FetchError>,
        latency_ms: u64,
    ) {
        match outcome {
            Ok(payload) => profile.record_success(source, payload, latency_ms),
            Err(err) => {
                profile.record_failure(source, AttemptStatus::Failure, latency_ms);
                // Retried attempts reach the sink one by one; only the
                // breaker rejection skips the retry path entirely.
                if matches!(err, FetchError::CircuitOpen) {
                    self.errors.source_failure(lead, source, &err);
                }
            }
        }
    }

    /// The full policy ladder for one source: cache, breaker guard,
    /// then retried attempts. A conclusive NotFound comes back as
    /// `Ok(None)`.
    async fn fetch_source(
        &self,
        lead: &LeadRecord,
        adapter: &dyn SourceAdapter,
    ) -> Result<Option<SourcePayload>, FetchError> {
        let source = adapter.kind();

        if let Some(payload) = self.cache.get(source, lead).await {
            tracing::debug!("{}: {} answered from cache", lead.identity(), source);
            return Ok(Some(payload));
        }

        if let Err(err) = self.breakers.check(source) {
            self.audit
                .record(source, &lead.phone, "circuit_open", Duration::ZERO);
            self.api_stats.record(source, "circuit_open", 0);
            return Err(err);
        }

        let result = self
            .retry
            .run(
                || self.attempt(lead, adapter),
                |attempt, err| {
                    tracing::warn!(
                        "⚠️ {} attempt {} for {} failed: {}",
                        source,
                        attempt,
                        lead.identity(),
                        err
                    );
                    self.errors.source_failure(lead, source, err);
                },
            )
            .await;

        match result {
            Ok(Some(payload)) => {
                self.breakers.record(source, false);
                self.cache.put(source, lead, &payload).await;
                Ok(Some(payload))
            }
            Ok(None) => {
                self.breakers.record(source, false);
                Ok(None)
            }
            Err(FetchError::NotFound) => {
                self.breakers.record(source, false);
                Ok(None)
            }
            Err(err) => {
                self.breakers.record(source, true);
                Err(err)
            }
        }
    }

    /// One attempt: token, proxy lease, client, fetch. Every attempt is
    /// audited with its own latency and outcome.
    async fn attempt(
        &self,
        lead: &LeadRecord,
        adapter: &dyn SourceAdapter,
    ) -> Result<Option<SourcePayload>, FetchError> {
        let source = adapter.kind();
        let started = Instant::now();

        let outcome = async {
            self.limiter.acquire(source).await?;
            let lease = self.proxies.acquire();
            let client = self.clients.client_for(lease.as_ref())?;
            let result = adapter.fetch(&client, lead).await;
            if let Some(lease) = &lease {
                match &result {
                    // Only transport-level failures count against the
                    // proxy; bad payloads and throttling are not its
                    // fault, and NotFound is an answer.
                    Ok(_) | Err(FetchError::NotFound) => self.proxies.report_success(lease),
                    Err(FetchError::Network(_)) => self.proxies.report_failure(lease),
                    Err(_) => {}
                }
            }
            result
        }
        .await;

        let latency = started.elapsed();
        let status = match &outcome {
            Ok(_) => "success",
            Err(err) => err.kind(),
        };
        self.audit.record(source, &lead.phone, status, latency);
        self.api_stats
            .record(source, status, latency.as_millis() as u64);
        outcome
    }
}
