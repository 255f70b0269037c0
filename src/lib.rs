//! Bankruptcy lead scoring pipeline.
//!
//! Takes raw contact rows, normalizes and deduplicates them, enriches each
//! lead against public debtor registries, and scores the result into
//! priority groups for outreach. Built for unattended batch runs: rows and
//! sources fail individually, a batch never fails as a whole.
//!
//! # Modules
//!
//! - `config`: Environment-driven runtime configuration.
//! - `models`: Leads, source payloads, profiles, scores.
//! - `normalizer`: Raw row cleanup (phones, INN, names, amounts).
//! - `dedup`: Phone-keyed identity index with field merging.
//! - `proxy`: Rotating egress proxy pool and per-proxy HTTP clients.
//! - `rate_limit`: Per-source request budgets.
//! - `cache`: TTL cache for registry answers.
//! - `retry`: Backoff policy for transient source failures.
//! - `circuit`: Per-source circuit breakers.
//! - `sources`: Registry adapters (FSSP, Fedresurs, Rosreestr, courts, FNS).
//! - `enrichment`: Concurrent per-lead fan-out across sources.
//! - `scoring`: Rule table plus optional linear-model blend.
//! - `pipeline`: The batch orchestrator tying the stages together.
//! - `sink`: Error and API-call collection.
//! - `stats`: Run and per-source counters.
//! - `db`: Postgres connection management.
//! - `storage`: Leads, score history, and log persistence.
//! - `csv_io`: CSV ingestion and scored-row export.
//! - `errors`: Error handling types.

pub mod cache;
pub mod circuit;
pub mod config;
pub mod csv_io;
pub mod db;
pub mod dedup;
pub mod enrichment;
pub mod errors;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod proxy;
pub mod rate_limit;
pub mod retry;
pub mod scoring;
pub mod sink;
pub mod sources;
pub mod stats;
pub mod storage;
