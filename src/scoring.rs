//! Two-stage scoring: an ordered weighted rule table over the
//! aggregated profile, then an optional model refinement blended into
//! the final score. The rule stage is deterministic; the rule score is
//! always kept alongside the blended one.

use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;

use crate::config::Config;
use crate::errors::AppError;
use crate::models::{
    AggregatedProfile, Debt, DebtKind, LeadRecord, ScoreGroup, ScoreRecord,
};

/// Window in which a court order counts as recent.
const RECENT_ORDER_DAYS: i64 = 90;
/// Fixed width of the model input vector.
const MODEL_FEATURES: usize = 6;
/// Blend proportions of the final score when a model is configured.
const RULE_WEIGHT: f64 = 0.7;
const MODEL_WEIGHT: f64 = 0.3;

/// Profile facts the rule table and the model stage consume, derived
/// once per lead.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    /// Claimed debt from the input row plus every registry-discovered
    /// debt, the tax arrears included.
    pub total_debt: f64,
    pub debt_count: usize,
    pub has_active_enforcement: bool,
    pub has_bank_mfo_debt: bool,
    pub has_property: bool,
    pub has_recent_court_order: bool,
    pub is_bankrupt: bool,
    pub inn_active: bool,
    pub is_wanted: bool,
    pub is_dead: bool,
    pub only_tax_utilities: bool,
    pub high_debt: bool,
    pub low_debt: bool,
}

impl FeatureVector {
    /// Absent payloads read as absence-of-signal: no property, no
    /// bankruptcy record, active INN. A registry that confirmed nothing
    /// negative still lets the corresponding positive rules fire.
    pub fn from_profile(
        lead: &LeadRecord,
        profile: &AggregatedProfile,
        high_debt_threshold: f64,
        min_debt_amount: f64,
        today: NaiveDate,
    ) -> Self {
        let debts = registry_debts(profile);
        let total_debt: f64 = lead.debt_amount + debts.iter().map(|d| d.amount).sum::<f64>();

        let has_active_enforcement = profile
            .enforcement()
            .map(|e| e.active_cases > 0)
            .unwrap_or(false);
        let has_property = profile.property().map(|p| p.has_property).unwrap_or(false);
        let is_bankrupt = profile
            .bankruptcy()
            .map(|b| b.is_bankrupt)
            .unwrap_or(false);
        let (inn_active, is_wanted, is_dead) = match profile.tax() {
            Some(t) => (t.inn_active, t.is_wanted, t.is_dead),
            None => (true, false, false),
        };
        let cutoff = today - Duration::days(RECENT_ORDER_DAYS);
        let has_recent_court_order = profile
            .court()
            .map(|c| c.orders.iter().any(|o| o.decided_at.is_some_and(|d| d >= cutoff)))
            .unwrap_or(false);

        let has_bank_mfo_debt = debts
            .iter()
            .any(|d| matches!(d.kind, DebtKind::Bank | DebtKind::Mfo));
        let only_tax_utilities = !debts.is_empty()
            && debts
                .iter()
                .all(|d| matches!(d.kind, DebtKind::Tax | DebtKind::Utilities));

        Self {
            total_debt,
            debt_count: debts.len(),
            has_active_enforcement,
            has_bank_mfo_debt,
            has_property,
            has_recent_court_order,
            is_bankrupt,
            inn_active,
            is_wanted,
            is_dead,
            only_tax_utilities,
            high_debt: total_debt > high_debt_threshold,
            low_debt: total_debt < min_debt_amount,
        }
    }

    /// Model inputs in their fixed order: total_debt, debt_count,
    /// has_property, has_recent_court_order, inn_active, is_bankrupt.
    pub fn as_model_inputs(&self) -> [f64; MODEL_FEATURES] {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        [
            self.total_debt,
            self.debt_count as f64,
            flag(self.has_property),
            flag(self.has_recent_court_order),
            flag(self.inn_active),
            flag(self.is_bankrupt),
        ]
    }
}

/// Enforcement debts plus a synthetic tax-arrears debt when the tax
/// registry reported one. These are what the debt-count and debt-kind
/// rules see.
fn registry_debts(profile: &AggregatedProfile) -> Vec<Debt> {
    let mut debts: Vec<Debt> = profile
        .enforcement()
        .map(|e| e.debts.clone())
        .unwrap_or_default();
    if let Some(tax) = profile.tax() {
        if tax.tax_debt > 0.0 {
            debts.push(Debt {
                creditor: "ФНС России".to_string(),
                amount: tax.tax_debt,
                kind: DebtKind::Tax,
                case_number: None,
                active: true,
            });
        }
    }
    debts
}

struct Rule {
    code: &'static str,
    points: i32,
    /// Disqualifying rules force the unqualified group regardless of
    /// the clamped score.
    excludes: bool,
    applies: fn(&FeatureVector) -> bool,
}

/// The rule table. Declaration order is the tie-break for equally
/// weighted reasons, so reordering entries changes output.
const RULES: &[Rule] = &[
    Rule {
        code: "active_enforcement",
        points: 30,
        excludes: false,
        applies: |f| f.has_active_enforcement,
    },
    Rule {
        code: "high_debt",
        points: 25,
        excludes: false,
        applies: |f| f.high_debt,
    },
    Rule {
        code: "bank_mfo_debt",
        points: 20,
        excludes: false,
        applies: |f| f.has_bank_mfo_debt,
    },
    Rule {
        code: "recent_court_order",
        points: 15,
        excludes: false,
        applies: |f| f.has_recent_court_order,
    },
    Rule {
        code: "no_property",
        points: 10,
        excludes: false,
        applies: |f| !f.has_property,
    },
    Rule {
        code: "no_bankruptcy_signs",
        points: 10,
        excludes: false,
        applies: |f| !f.is_bankrupt,
    },
    Rule {
        code: "active_inn",
        points: 5,
        excludes: false,
        applies: |f| f.inn_active,
    },
    Rule {
        code: "multiple_debts",
        points: 5,
        excludes: false,
        applies: |f| f.debt_count > 2,
    },
    Rule {
        code: "low_debt",
        points: -15,
        excludes: false,
        applies: |f| f.low_debt,
    },
    Rule {
        code: "tax_utilities_only",
        points: -10,
        excludes: false,
        applies: |f| f.only_tax_utilities,
    },
    Rule {
        code: "bankrupt_exclusion",
        points: -100,
        excludes: true,
        applies: |f| f.is_bankrupt,
    },
    Rule {
        code: "dead_inn_exclusion",
        points: -100,
        excludes: true,
        applies: |f| !f.inn_active || f.is_wanted || f.is_dead,
    },
];

/// Rule-stage result before the optional model blend.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    /// Summed weights clamped to 0..=100.
    pub score: i32,
    /// Up to three rule codes, ranked by absolute contribution with
    /// declaration order breaking ties.
    pub reasons: Vec<String>,
    pub excluded: bool,
}

pub fn evaluate_rules(features: &FeatureVector) -> RuleOutcome {
    let mut total = 0;
    let mut excluded = false;
    let mut fired: Vec<(usize, &Rule)> = Vec::new();

    for (idx, rule) in RULES.iter().enumerate() {
        if (rule.applies)(features) {
            total += rule.points;
            excluded |= rule.excludes;
            fired.push((idx, rule));
        }
    }

    fired.sort_by(|(a_idx, a), (b_idx, b)| {
        b.points
            .abs()
            .cmp(&a.points.abs())
            .then(a_idx.cmp(b_idx))
    });
    let reasons = fired
        .iter()
        .take(3)
        .map(|(_, rule)| rule.code.to_string())
        .collect();

    RuleOutcome {
        score: total.clamp(0, 100),
        reasons,
        excluded,
    }
}

fn group_for(score: i32, excluded: bool) -> ScoreGroup {
    if excluded {
        return ScoreGroup::Unqualified;
    }
    match score {
        s if s >= 70 => ScoreGroup::HighPriority,
        s if s >= 50 => ScoreGroup::MediumPriority,
        s if s >= 25 => ScoreGroup::LowPriority,
        _ => ScoreGroup::Unqualified,
    }
}

/// Refinement stage contract: same features the rules saw, plus the
/// rule score, mapped to a 0..=100 estimate.
pub trait ScoringModel: Send + Sync {
    fn version(&self) -> &str;
    fn predict(&self, features: &FeatureVector, rule_score: i32) -> f64;
}

/// Linear model over the fixed feature vector, loaded from a JSON
/// weight file.
#[derive(Debug, Clone, Deserialize)]
pub struct LinearModel {
    version: String,
    #[serde(default)]
    bias: f64,
    /// Aligned with [`FeatureVector::as_model_inputs`].
    weights: [f64; MODEL_FEATURES],
    /// Weight applied to the rule score fed in as an extra input.
    #[serde(default)]
    rule_weight: f64,
}

impl LinearModel {
    pub fn load(path: &str) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(AppError::Io)?;
        serde_json::from_str(&raw)
            .map_err(|e| AppError::Config(format!("invalid model file {}: {}", path, e)))
    }
}

impl ScoringModel for LinearModel {
    fn version(&self) -> &str {
        &self.version
    }

    fn predict(&self, features: &FeatureVector, rule_score: i32) -> f64 {
        let inputs = features.as_model_inputs();
        let mut estimate = self.bias + self.rule_weight * f64::from(rule_score);
        for (weight, input) in self.weights.iter().zip(inputs) {
            estimate += weight * input;
        }
        estimate.clamp(0.0, 100.0)
    }
}

pub struct ScoringEngine {
    high_debt_threshold: f64,
    min_debt_amount: f64,
    model: Option<Box<dyn ScoringModel>>,
}

impl ScoringEngine {
    /// Loads the model stage eagerly so a broken weight file fails the
    /// run at startup instead of mid-batch.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let model: Option<Box<dyn ScoringModel>> = match &config.ml_model_path {
            Some(path) => {
                let model = LinearModel::load(path)?;
                tracing::info!("✓ Scoring model '{}' loaded from {}", model.version, path);
                Some(Box::new(model))
            }
            None => None,
        };
        Ok(Self::with_model(config, model))
    }

    pub fn with_model(config: &Config, model: Option<Box<dyn ScoringModel>>) -> Self {
        Self {
            high_debt_threshold: config.high_debt_threshold,
            min_debt_amount: config.min_debt_amount,
            model,
        }
    }

    pub fn score(&self, lead: &LeadRecord, profile: &AggregatedProfile) -> ScoreRecord {
        self.score_at(lead, profile, Utc::now().date_naive())
    }

    /// Deterministic variant with an explicit reference date for the
    /// recent-court-order window.
    pub fn score_at(
        &self,
        lead: &LeadRecord,
        profile: &AggregatedProfile,
        today: NaiveDate,
    ) -> ScoreRecord {
        let features = FeatureVector::from_profile(
            lead,
            profile,
            self.high_debt_threshold,
            self.min_debt_amount,
            today,
        );
        let outcome = evaluate_rules(&features);

        let (score, model_version) = match &self.model {
            Some(model) => {
                let refined = model.predict(&features, outcome.score);
                let blended = (RULE_WEIGHT * f64::from(outcome.score) + MODEL_WEIGHT * refined)
                    .round() as i32;
                (
                    blended.clamp(0, 100),
                    Some(model.version().to_string()),
                )
            }
            None => (outcome.score, None),
        };

        tracing::debug!(
            "{} scored {} ({}, rule {})",
            lead.identity(),
            score,
            group_for(score, outcome.excluded),
            outcome.score
        );

        ScoreRecord {
            lead_id: lead.lead_id.clone(),
            phone: lead.phone.clone(),
            score,
            rule_score: outcome.score,
            group: group_for(score, outcome.excluded),
            reasons: outcome.reasons,
            model_version,
            degraded: profile.degraded,
            scored_at: Utc::now(),
        }
    }
}
