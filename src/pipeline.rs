use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;

use crate::config::Config;
use crate::db::Database;
use crate::dedup::{IdentityIndex, UpsertOutcome};
use crate::enrichment::Enricher;
use crate::errors::AppError;
use crate::models::{BatchOutcome, LeadRecord, RawLeadRow, ScoredRow};
use crate::normalizer::normalize_row;
use crate::scoring::ScoringEngine;
use crate::sink::{ApiAuditLog, ErrorSink};
use crate::sources::build_adapters;
use crate::stats::{ApiStats, ApiStatsSnapshot, RunStats, RunStatsSnapshot};
use crate::storage::ScoringStorage;

/// End-to-end batch pipeline: normalize, dedup, enrich, score, persist.
///
/// One instance lives for the whole run. The identity index spans batches,
/// so a phone first seen in batch one merges instead of duplicating when it
/// reappears in batch five. With storage configured the index starts out
/// preloaded with previously persisted leads, so known phones merge across
/// runs too.
pub struct Pipeline {
    enricher: Arc<Enricher>,
    scoring: ScoringEngine,
    storage: Option<ScoringStorage>,
    index: IdentityIndex,
    /// Phones processed this run; the preloaded part of the index does
    /// not count toward `unique_leads`.
    touched: HashSet<String>,
    errors: Arc<ErrorSink>,
    audit: Arc<ApiAuditLog>,
    run_stats: Arc<RunStats>,
    api_stats: Arc<ApiStats>,
    cancel: watch::Receiver<bool>,
}

impl Pipeline {
    /// Wires every stage from config. Fails fast on a bad database URL or
    /// an unreadable model file rather than mid-batch.
    pub async fn new(config: &Config, cancel: watch::Receiver<bool>) -> anyhow::Result<Self> {
        let errors = Arc::new(ErrorSink::new());
        let audit = Arc::new(ApiAuditLog::new());
        let run_stats = Arc::new(RunStats::new());
        let api_stats = Arc::new(ApiStats::new());

        let enricher = Arc::new(Enricher::new(
            config,
            build_adapters(config),
            errors.clone(),
            audit.clone(),
            api_stats.clone(),
        )?);
        let scoring = ScoringEngine::from_config(config)?;

        let mut index = IdentityIndex::default();
        let storage = match &config.database_url {
            Some(url) => {
                let db = Database::new(url).await?;
                let storage = ScoringStorage::new(db.pool);
                storage.ensure_schema().await?;
                let known = storage.load_leads().await?;
                if !known.is_empty() {
                    tracing::info!("✓ Preloaded {} known leads into the identity index", known.len());
                    index.preload(known);
                }
                Some(storage)
            }
            None => {
                tracing::info!("No DATABASE_URL set, results stay in memory");
                None
            }
        };

        Ok(Self {
            enricher,
            scoring,
            storage,
            index,
            touched: HashSet::new(),
            errors,
            audit,
            run_stats,
            api_stats,
            cancel,
        })
    }

    /// Runs one batch of raw rows through the whole pipeline.
    ///
    /// Row and source failures never abort the batch; they are logged,
    /// counted, and returned in the outcome. Persistence is the only
    /// stage allowed to fail the call.
    pub async fn run_batch(
        &mut self,
        rows: Vec<RawLeadRow>,
        default_tag: &str,
    ) -> Result<BatchOutcome, AppError> {
        self.run_stats.add_rows_read(rows.len() as u64);

        // Normalize into the run-wide identity index, remembering each
        // phone's first input position so export can restore input order.
        let mut batch: Vec<(usize, String)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for (seq, raw) in rows.iter().enumerate() {
            let lead = match normalize_row(raw, default_tag) {
                Ok(lead) => lead,
                Err(err) => {
                    self.run_stats.row_skipped();
                    self.errors.row_rejected(
                        raw.name.as_deref(),
                        raw.phone.as_deref(),
                        &err.to_string(),
                    );
                    tracing::debug!("Row {} rejected: {}", seq, err);
                    continue;
                }
            };
            let phone = lead.phone.clone();
            if let UpsertOutcome::Merged = self.index.upsert(lead) {
                self.run_stats.add_duplicates_merged(1);
            }
            self.touched.insert(phone.clone());
            if seen.insert(phone.clone()) {
                batch.push((seq, phone));
            }
        }
        self.run_stats.set_unique_leads(self.touched.len() as u64);

        let leads: Vec<LeadRecord> = batch
            .iter()
            .filter_map(|(_, phone)| self.index.get(phone).cloned())
            .collect();
        tracing::info!(
            "Batch: {} rows in, {} unique leads to enrich",
            rows.len(),
            leads.len()
        );

        let profiles = self.enricher.enrich_batch(&leads, &self.cancel).await;

        let mut scored = Vec::with_capacity(leads.len());
        for (((seq, _), lead), profile) in batch.iter().zip(&leads).zip(profiles) {
            // A `None` profile means cancellation landed before this lead
            // started; it stays un-scored instead of scoring on air.
            let Some(profile) = profile else { continue };
            self.run_stats.lead_enriched(profile.degraded);
            let record = self.scoring.score(lead, &profile);
            self.run_stats.lead_scored(record.score, record.group);
            scored.push(ScoredRow {
                seq: *seq,
                lead: lead.clone(),
                score: record,
            });
        }

        let errors = self.errors.drain();
        self.run_stats.add_errors(errors.len() as u64);
        let calls = self.audit.drain();

        if let Some(storage) = &self.storage {
            storage.upsert_leads(&leads).await?;
            let records: Vec<_> = scored.iter().map(|row| row.score.clone()).collect();
            storage.record_scores(&records).await?;
            storage.record_errors(&errors).await?;
            storage.record_api_calls(&calls).await?;
        }

        let cached = self.enricher.sweep_cache().await;
        tracing::debug!("Cache swept, {} live entries", cached);

        Ok(BatchOutcome { scored, errors })
    }

    pub fn get_stats(&self) -> RunStatsSnapshot {
        self.run_stats.snapshot()
    }

    pub fn get_api_stats(&self) -> ApiStatsSnapshot {
        self.api_stats.snapshot(self.enricher.proxy_stats())
    }
}
