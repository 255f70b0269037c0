use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::fmt;

// ============ Lead records ============

/// One raw input row as read from a delimited file, before normalization.
///
/// All fields are optional at this stage; the Normalizer decides what is
/// usable. `source_tag` is the declared origin, or the file name when the
/// caller did not declare one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLeadRow {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub inn: Option<String>,
    pub kpp: Option<String>,
    pub ogrn: Option<String>,
    pub dob: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub region: Option<String>,
    pub debt_amount: Option<String>,
    pub revenue: Option<String>,
    pub source_tag: Option<String>,
}

/// A normalized, deduplicated lead.
///
/// The phone is the primary identity key: two records with the same
/// normalized phone are the same lead regardless of other differences.
/// Immutable after ingestion except for tag accumulation during merge.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct LeadRecord {
    /// Deterministic digest of (name, phone, inn); stable across runs.
    pub lead_id: String,
    /// Canonical `+7XXXXXXXXXX` form.
    pub phone: String,
    pub name: String,
    /// Taxpayer identifier, 10 digits (organization) or 12 (person).
    pub inn: Option<String>,
    /// Set when a tax ID was present in the input but malformed; the row
    /// is kept, the bad value is not.
    pub inn_invalid: bool,
    pub kpp: Option<String>,
    pub ogrn: Option<String>,
    pub dob: Option<NaiveDate>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub region: Option<String>,
    pub debt_amount: f64,
    pub revenue: Option<f64>,
    /// Every source tag that contributed to this lead, in first-seen order.
    pub source_tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl LeadRecord {
    /// Short identity string for logs and error correlation.
    pub fn identity(&self) -> String {
        match &self.inn {
            Some(inn) => format!("{} ({})", self.phone, inn),
            None => self.phone.clone(),
        }
    }
}

// ============ External registries ============

/// The five external registries a lead is enriched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Enforcement records (FSSP).
    Fssp,
    /// Bankruptcy registry (Fedresurs).
    Fedresurs,
    /// Property registry (Rosreestr).
    Rosreestr,
    /// Court records (arbitration case files).
    Court,
    /// Tax records (FNS).
    Nalog,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::Fssp,
        SourceKind::Fedresurs,
        SourceKind::Rosreestr,
        SourceKind::Court,
        SourceKind::Nalog,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::Fssp => "fssp",
            SourceKind::Fedresurs => "fedresurs",
            SourceKind::Rosreestr => "rosreestr",
            SourceKind::Court => "court",
            SourceKind::Nalog => "nalog",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Debt classification derived from the creditor name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebtKind {
    Bank,
    Mfo,
    Tax,
    Utilities,
    Other,
}

impl DebtKind {
    /// Classifies a creditor by name keywords.
    pub fn classify(creditor: &str) -> Self {
        let lower = creditor.to_lowercase();
        if ["банк", "bank", "сбер", "втб", "альфа", "тинькофф"]
            .iter()
            .any(|kw| lower.contains(kw))
        {
            DebtKind::Bank
        } else if ["мфо", "микрофинанс", "микрозайм", "займ"]
            .iter()
            .any(|kw| lower.contains(kw))
        {
            DebtKind::Mfo
        } else if ["фнс", "налог", "ифнс"].iter().any(|kw| lower.contains(kw)) {
            DebtKind::Tax
        } else if ["жкх", "коммунал", "энергосбыт", "водоканал", "теплосеть"]
            .iter()
            .any(|kw| lower.contains(kw))
        {
            DebtKind::Utilities
        } else {
            DebtKind::Other
        }
    }
}

/// One outstanding debt reported by the enforcement registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Debt {
    pub creditor: String,
    pub amount: f64,
    pub kind: DebtKind,
    pub case_number: Option<String>,
    /// Whether the enforcement case is still open.
    pub active: bool,
}

/// One court case found for the lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourtOrder {
    pub case_number: String,
    pub case_type: Option<String>,
    pub court: Option<String>,
    pub status: Option<String>,
    pub decided_at: Option<NaiveDate>,
}

/// Enforcement-records payload (open cases, debt list, totals).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnforcementData {
    pub debts: Vec<Debt>,
    pub total_debt: f64,
    pub active_cases: u32,
}

/// Bankruptcy-registry payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BankruptcyData {
    pub is_bankrupt: bool,
    /// Procedure kinds found (наблюдение, реализация имущества, ...).
    pub procedures: Vec<String>,
    pub last_message_date: Option<NaiveDate>,
}

/// Property-registry payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyData {
    pub has_property: bool,
    pub property_count: u32,
    pub kinds: Vec<String>,
}

/// Court-records payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourtData {
    pub orders: Vec<CourtOrder>,
}

/// Tax-records payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxData {
    pub inn_active: bool,
    pub tax_debt: f64,
    pub is_wanted: bool,
    pub is_dead: bool,
}

impl Default for TaxData {
    fn default() -> Self {
        Self {
            inn_active: true,
            tax_debt: 0.0,
            is_wanted: false,
            is_dead: false,
        }
    }
}

/// Structured result of one successful source fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SourcePayload {
    Enforcement(EnforcementData),
    Bankruptcy(BankruptcyData),
    Property(PropertyData),
    CourtRecords(CourtData),
    Tax(TaxData),
}

impl SourcePayload {
    pub fn source(&self) -> SourceKind {
        match self {
            SourcePayload::Enforcement(_) => SourceKind::Fssp,
            SourcePayload::Bankruptcy(_) => SourceKind::Fedresurs,
            SourcePayload::Property(_) => SourceKind::Rosreestr,
            SourcePayload::CourtRecords(_) => SourceKind::Court,
            SourcePayload::Tax(_) => SourceKind::Nalog,
        }
    }
}

// ============ Enrichment ============

/// Terminal status of the last attempt against one source for one lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Fetched a payload, or the registry confirmed absence (NotFound).
    Success,
    Failure,
    Timeout,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::Failure => "failure",
            AttemptStatus::Timeout => "timeout",
        }
    }
}

/// Latest terminal attempt per (lead, source) within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentAttempt {
    pub source: SourceKind,
    pub status: AttemptStatus,
    pub latency_ms: u64,
    pub attempted_at: DateTime<Utc>,
}

/// Per-lead union of the latest successful source payloads.
///
/// Monotonic within a run: once a source has succeeded for a lead its
/// payload stays in the profile, regardless of later failures of other
/// sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedProfile {
    pub payloads: BTreeMap<SourceKind, SourcePayload>,
    pub attempts: BTreeMap<SourceKind, EnrichmentAttempt>,
    /// Set at finalization when one or more configured sources never
    /// reached a success-shaped outcome.
    pub degraded: bool,
}

impl AggregatedProfile {
    /// Records a successful fetch. `payload` is `None` for a NotFound
    /// absence, which still counts as success.
    pub fn record_success(
        &mut self,
        source: SourceKind,
        payload: Option<SourcePayload>,
        latency_ms: u64,
    ) {
        if let Some(p) = payload {
            self.payloads.insert(source, p);
        }
        self.attempts.insert(
            source,
            EnrichmentAttempt {
                source,
                status: AttemptStatus::Success,
                latency_ms,
                attempted_at: Utc::now(),
            },
        );
    }

    /// Records a terminal failure. Never removes an existing payload.
    pub fn record_failure(&mut self, source: SourceKind, status: AttemptStatus, latency_ms: u64) {
        debug_assert!(status != AttemptStatus::Success);
        self.attempts.insert(
            source,
            EnrichmentAttempt {
                source,
                status,
                latency_ms,
                attempted_at: Utc::now(),
            },
        );
    }

    /// Finalizes the profile against the configured source set.
    pub fn finalize(&mut self, expected: &[SourceKind]) {
        self.degraded = expected.iter().any(|s| {
            self.attempts
                .get(s)
                .map(|a| a.status != AttemptStatus::Success)
                .unwrap_or(true)
        });
    }

    pub fn enforcement(&self) -> Option<&EnforcementData> {
        match self.payloads.get(&SourceKind::Fssp) {
            Some(SourcePayload::Enforcement(d)) => Some(d),
            _ => None,
        }
    }

    pub fn bankruptcy(&self) -> Option<&BankruptcyData> {
        match self.payloads.get(&SourceKind::Fedresurs) {
            Some(SourcePayload::Bankruptcy(d)) => Some(d),
            _ => None,
        }
    }

    pub fn property(&self) -> Option<&PropertyData> {
        match self.payloads.get(&SourceKind::Rosreestr) {
            Some(SourcePayload::Property(d)) => Some(d),
            _ => None,
        }
    }

    pub fn court(&self) -> Option<&CourtData> {
        match self.payloads.get(&SourceKind::Court) {
            Some(SourcePayload::CourtRecords(d)) => Some(d),
            _ => None,
        }
    }

    pub fn tax(&self) -> Option<&TaxData> {
        match self.payloads.get(&SourceKind::Nalog) {
            Some(SourcePayload::Tax(d)) => Some(d),
            _ => None,
        }
    }
}

// ============ Scoring ============

/// Discrete classification bucket, assigned by fixed score thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreGroup {
    HighPriority,
    MediumPriority,
    LowPriority,
    Unqualified,
}

impl ScoreGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreGroup::HighPriority => "high_priority",
            ScoreGroup::MediumPriority => "medium_priority",
            ScoreGroup::LowPriority => "low_priority",
            ScoreGroup::Unqualified => "unqualified",
        }
    }
}

impl fmt::Display for ScoreGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scoring outcome for one lead. Append-only history across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub lead_id: String,
    pub phone: String,
    /// Final score after the optional model blend, clamped to 0..=100.
    pub score: i32,
    /// Rule-stage score, always retained for auditability.
    pub rule_score: i32,
    pub group: ScoreGroup,
    /// Up to three rule codes ranked by absolute contribution.
    pub reasons: Vec<String>,
    pub model_version: Option<String>,
    pub degraded: bool,
    pub scored_at: DateTime<Utc>,
}

impl ScoreRecord {
    pub fn reason(&self, idx: usize) -> &str {
        self.reasons.get(idx).map(String::as_str).unwrap_or("")
    }
}

/// One fully processed output row.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredRow {
    /// Position of the first contributing input row; used by the sink to
    /// restore input order for export.
    pub seq: usize,
    pub lead: LeadRecord,
    pub score: ScoreRecord,
}

/// Everything a `run_batch` call hands back to the caller.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Scored rows in input order.
    pub scored: Vec<ScoredRow>,
    /// Per-row and per-source failures collected during the batch.
    pub errors: Vec<ErrorLogEntry>,
}

// ============ Failure & audit trails ============

/// Durable record of one per-lead, per-source failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub name: Option<String>,
    pub inn: Option<String>,
    pub phone: Option<String>,
    /// Source name, or a pipeline stage label for non-source failures.
    pub source: String,
    pub error: String,
    pub occurred_at: DateTime<Utc>,
}

/// One entry of the API-call audit log backing `get_api_stats()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCallRecord {
    pub source: SourceKind,
    pub phone: String,
    /// `success`, `not_found`, `network_failure`, `parse_failure`,
    /// `rate_limited`, `timeout` or `circuit_open`.
    pub status: String,
    pub latency_ms: u64,
    pub attempted_at: DateTime<Utc>,
}
