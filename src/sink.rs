use chrono::Utc;
use std::sync::Mutex;
use std::time::Duration;

use crate::errors::FetchError;
use crate::models::{ApiCallRecord, ErrorLogEntry, LeadRecord, SourceKind};

/// Collects failures during a run without ever failing the run itself.
///
/// Entries are drained once at persist time; a batch's errors also ride
/// along in its [`crate::models::BatchOutcome`].
#[derive(Default)]
pub struct ErrorSink {
    entries: Mutex<Vec<ErrorLogEntry>>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: ErrorLogEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push(entry);
    }

    /// One per-lead, per-source enrichment failure.
    pub fn source_failure(&self, lead: &LeadRecord, source: SourceKind, error: &FetchError) {
        self.record(ErrorLogEntry {
            name: Some(lead.name.clone()).filter(|n| !n.is_empty()),
            inn: lead.inn.clone(),
            phone: Some(lead.phone.clone()),
            source: source.name().to_string(),
            error: error.to_string(),
            occurred_at: Utc::now(),
        });
    }

    /// A source that never produced an outcome before the lead's
    /// enrichment deadline.
    pub fn source_timeout(&self, lead: &LeadRecord, source: SourceKind, deadline: Duration) {
        self.record(ErrorLogEntry {
            name: Some(lead.name.clone()).filter(|n| !n.is_empty()),
            inn: lead.inn.clone(),
            phone: Some(lead.phone.clone()),
            source: source.name().to_string(),
            error: format!("no answer within the {:?} lead deadline", deadline),
            occurred_at: Utc::now(),
        });
    }

    /// A row rejected before it ever became a lead.
    pub fn row_rejected(&self, name: Option<&str>, phone: Option<&str>, error: &str) {
        self.record(ErrorLogEntry {
            name: name.map(str::to_string).filter(|n| !n.is_empty()),
            inn: None,
            phone: phone.map(str::to_string).filter(|p| !p.is_empty()),
            source: "normalizer".to_string(),
            error: error.to_string(),
            occurred_at: Utc::now(),
        });
    }

    pub fn drain(&self) -> Vec<ErrorLogEntry> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *entries)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Append-only log of every outbound registry call, successful or not.
#[derive(Default)]
pub struct ApiAuditLog {
    calls: Mutex<Vec<ApiCallRecord>>,
}

impl ApiAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, source: SourceKind, phone: &str, status: &str, latency: Duration) {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.push(ApiCallRecord {
            source,
            phone: phone.to_string(),
            status: status.to_string(),
            latency_ms: latency.as_millis() as u64,
            attempted_at: Utc::now(),
        });
    }

    pub fn drain(&self) -> Vec<ApiCallRecord> {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *calls)
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead() -> LeadRecord {
        LeadRecord {
            lead_id: "deadbeef".to_string(),
            phone: "+79161234567".to_string(),
            name: "Иванов Иван".to_string(),
            inn: Some("772345678901".to_string()),
            inn_invalid: false,
            kpp: None,
            ogrn: None,
            dob: None,
            email: None,
            address: None,
            region: None,
            debt_amount: 0.0,
            revenue: None,
            source_tags: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn drain_empties_the_sink() {
        let sink = ErrorSink::new();
        sink.source_failure(
            &lead(),
            SourceKind::Fssp,
            &FetchError::Network("connection reset".to_string()),
        );
        assert_eq!(sink.len(), 1);

        let drained = sink.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].source, "fssp");
        assert_eq!(drained[0].phone.as_deref(), Some("+79161234567"));
        assert!(drained[0].error.contains("connection reset"));
        assert!(sink.is_empty());
    }

    #[test]
    fn rejected_rows_carry_what_identity_they_had() {
        let sink = ErrorSink::new();
        sink.row_rejected(Some("Петров"), None, "no usable phone");

        let drained = sink.drain();
        assert_eq!(drained[0].name.as_deref(), Some("Петров"));
        assert_eq!(drained[0].phone, None);
        assert_eq!(drained[0].source, "normalizer");
    }

    #[test]
    fn audit_log_keeps_call_order() {
        let log = ApiAuditLog::new();
        log.record(
            SourceKind::Fssp,
            "+79161234567",
            "success",
            Duration::from_millis(120),
        );
        log.record(
            SourceKind::Nalog,
            "+79161234567",
            "network_failure",
            Duration::from_millis(45),
        );

        let drained = log.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].source, SourceKind::Fssp);
        assert_eq!(drained[0].latency_ms, 120);
        assert_eq!(drained[1].status, "network_failure");
        assert!(log.is_empty());
    }
}
