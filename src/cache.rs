use chrono::{DateTime, Utc};
use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::models::{LeadRecord, SourceKind, SourcePayload};

/// One cached source lookup.
///
/// The payload travels as JSON with a SHA-256 checksum computed at store
/// time; a mismatch on read means corruption and is treated as a miss,
/// so a poisoned cache can only cost an extra external call, never a
/// corrupt profile.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    payload_json: String,
    checksum: String,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn new(payload_json: String, ttl: Duration) -> Self {
        let checksum = compute_checksum(&payload_json);
        Self {
            payload_json,
            checksum,
            expires_at: Utc::now()
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24)),
        }
    }

    fn is_valid(&self) -> bool {
        compute_checksum(&self.payload_json) == self.checksum
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

fn compute_checksum(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

/// TTL-keyed store of prior successful source lookups.
///
/// Keyed by SHA-256 of (source, phone, inn). Expiry is enforced twice:
/// eagerly by moka's own TTL housekeeping and lazily by the `expires_at`
/// check on read, so an entry is never served past its deadline even if
/// the two clocks disagree. Only successful payloads are stored;
/// failures and NotFound absences always go back to the source.
pub struct ResultCache {
    inner: Cache<String, CacheEntry>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let inner = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(max_capacity)
            .build();
        Self { inner, ttl }
    }

    fn key(source: SourceKind, lead: &LeadRecord) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.name().as_bytes());
        hasher.update(b"|");
        hasher.update(lead.phone.as_bytes());
        hasher.update(b"|");
        hasher.update(lead.inn.as_deref().unwrap_or("").as_bytes());
        hex::encode(hasher.finalize())
    }

    pub async fn get(&self, source: SourceKind, lead: &LeadRecord) -> Option<SourcePayload> {
        let key = Self::key(source, lead);
        let entry = self.inner.get(&key).await?;

        if entry.is_expired(Utc::now()) {
            self.inner.invalidate(&key).await;
            return None;
        }
        if !entry.is_valid() {
            tracing::warn!(
                "⚠️ Cache checksum mismatch for {} / {}, dropping entry",
                source,
                lead.phone
            );
            self.inner.invalidate(&key).await;
            return None;
        }
        match serde_json::from_str(&entry.payload_json) {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::warn!("⚠️ Undecodable cache entry for {}: {}", source, e);
                self.inner.invalidate(&key).await;
                None
            }
        }
    }

    pub async fn put(&self, source: SourceKind, lead: &LeadRecord, payload: &SourcePayload) {
        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("⚠️ Skipping cache write for {}: {}", source, e);
                return;
            }
        };
        let key = Self::key(source, lead);
        self.inner.insert(key, CacheEntry::new(json, self.ttl)).await;
    }

    /// Eager sweep: runs moka's pending maintenance (expired-entry
    /// eviction). Called between batches.
    pub async fn sweep(&self) {
        self.inner.run_pending_tasks().await;
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    #[cfg(test)]
    async fn insert_raw(&self, source: SourceKind, lead: &LeadRecord, entry: CacheEntry) {
        self.inner.insert(Self::key(source, lead), entry).await;
    }
}
