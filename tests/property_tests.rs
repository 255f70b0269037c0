//! Property-based tests over normalization, dedup and scoring.
//!
//! These pin the invariants the pipeline leans on: canonical phones stay
//! canonical, merging never loses identity, scores never leave 0..=100.

use chrono::{NaiveDate, Utc};
use proptest::prelude::*;

use bankruptcy_scoring::config::Config;
use bankruptcy_scoring::dedup::IdentityIndex;
use bankruptcy_scoring::models::{
    AggregatedProfile, BankruptcyData, Debt, DebtKind, EnforcementData, LeadRecord,
    PropertyData, ScoreGroup, SourceKind, SourcePayload, TaxData,
};
use bankruptcy_scoring::normalizer::{
    lead_id, normalize_name, normalize_phone, parse_amount, parse_date,
};
use bankruptcy_scoring::scoring::ScoringEngine;

fn mk_lead(name: &str, phone: &str, debt: f64, tag: &str) -> LeadRecord {
    LeadRecord {
        lead_id: lead_id(name, phone, None),
        phone: phone.to_string(),
        name: name.to_string(),
        inn: None,
        inn_invalid: false,
        kpp: None,
        ogrn: None,
        dob: None,
        email: None,
        address: None,
        region: None,
        debt_amount: debt,
        revenue: None,
        source_tags: vec![tag.to_string()],
        created_at: Utc::now(),
    }
}

fn profile_from(
    debts: Vec<(f64, bool)>,
    tax_debt: f64,
    inn_active: bool,
    is_wanted: bool,
    is_dead: bool,
    has_property: bool,
    is_bankrupt: bool,
) -> AggregatedProfile {
    let mut enforcement = EnforcementData::default();
    for (amount, active) in debts {
        enforcement.total_debt += amount;
        if active {
            enforcement.active_cases += 1;
        }
        enforcement.debts.push(Debt {
            creditor: "ООО Организация".to_string(),
            amount,
            kind: DebtKind::Other,
            case_number: None,
            active,
        });
    }

    let mut profile = AggregatedProfile::default();
    profile.record_success(
        SourceKind::Fssp,
        Some(SourcePayload::Enforcement(enforcement)),
        10,
    );
    profile.record_success(
        SourceKind::Fedresurs,
        Some(SourcePayload::Bankruptcy(BankruptcyData {
            is_bankrupt,
            ..Default::default()
        })),
        10,
    );
    profile.record_success(
        SourceKind::Rosreestr,
        Some(SourcePayload::Property(PropertyData {
            has_property,
            property_count: has_property as u32,
            kinds: Vec::new(),
        })),
        10,
    );
    profile.record_success(
        SourceKind::Nalog,
        Some(SourcePayload::Tax(TaxData {
            inn_active,
            tax_debt,
            is_wanted,
            is_dead,
        })),
        10,
    );
    profile
}

// Property: phone canonicalization is total and idempotent.
proptest! {
    #[test]
    fn phone_normalization_never_panics(raw in "\\PC*") {
        let _ = normalize_phone(&raw);
    }

    #[test]
    fn ten_digit_mobiles_canonicalize(digits in "9[0-9]{9}") {
        let normalized = normalize_phone(&digits).unwrap();
        prop_assert!(normalized.starts_with("+79"));
        prop_assert_eq!(normalized.len(), 12);
        // A canonical phone renormalizes to itself.
        prop_assert_eq!(normalize_phone(&normalized).unwrap(), normalized);
    }

    #[test]
    fn eleven_digit_forms_converge(suffix in "[0-9]{10}") {
        let with_eight = format!("8{}", suffix);
        let with_seven = format!("7{}", suffix);
        prop_assert_eq!(normalize_phone(&with_eight), normalize_phone(&with_seven));
    }
}

// Property: field cleanup never rejects by panicking.
proptest! {
    #[test]
    fn amount_parsing_never_panics(raw in "\\PC*") {
        if let Some(v) = parse_amount(&raw) {
            prop_assert!(v.is_finite());
            prop_assert!(v >= 0.0);
        }
    }

    #[test]
    fn date_parsing_never_panics(raw in "\\PC*") {
        let _ = parse_date(&raw);
    }

    #[test]
    fn normalized_names_carry_no_punctuation(raw in "\\PC{0,40}") {
        let name = normalize_name(&raw);
        prop_assert!(name.chars().all(|c| c.is_alphanumeric() || c == ' ' || c == '-'));
        prop_assert!(!name.starts_with(' ') && !name.ends_with(' '));
        prop_assert!(!name.contains("  "));
    }

    #[test]
    fn lead_ids_are_sixteen_hex_chars(
        name in "\\PC{0,20}",
        phone in "[0-9]{10,11}",
        inn in proptest::option::of("[0-9]{10,12}")
    ) {
        let id = lead_id(&name, &phone, inn.as_deref());
        prop_assert_eq!(id.len(), 16);
        prop_assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

// Property: merging duplicates keeps identity and accumulates tags.
proptest! {
    #[test]
    fn merging_duplicates_is_stable(
        name_a in "[а-я]{2,10}",
        name_b in "[а-я]{2,10}",
        debt_a in 0.0f64..1e6,
        debt_b in 0.0f64..1e6,
        tag_a in prop::sample::select(vec!["fns", "gosuslugi", "delivery", "generic"]),
        tag_b in prop::sample::select(vec!["fns", "gosuslugi", "delivery", "generic"]),
    ) {
        let mut index = IdentityIndex::default();
        index.upsert(mk_lead(&name_a, "+79991234567", debt_a, tag_a));
        index.upsert(mk_lead(&name_b, "+79991234567", debt_b, tag_b));

        prop_assert_eq!(index.len(), 1);
        prop_assert_eq!(index.duplicates_merged(), 1);

        let merged = index.get("+79991234567").unwrap();
        prop_assert_eq!(merged.phone.as_str(), "+79991234567");
        prop_assert!(merged.source_tags.iter().any(|t| t == tag_a));
        prop_assert!(merged.source_tags.iter().any(|t| t == tag_b));
        // A zero claim never erases a positive one.
        if debt_b > 0.0 {
            prop_assert_eq!(merged.debt_amount, debt_b);
        } else {
            prop_assert_eq!(merged.debt_amount, debt_a);
        }
    }

    #[test]
    fn reinserting_the_same_lead_is_idempotent(
        name in "[а-я]{2,10}",
        debt in 0.0f64..1e6,
    ) {
        let lead = mk_lead(&name, "+79991234567", debt, "generic");
        let mut index = IdentityIndex::default();
        index.upsert(lead.clone());
        index.upsert(lead.clone());
        index.upsert(lead);

        prop_assert_eq!(index.len(), 1);
        let merged = index.get("+79991234567").unwrap();
        prop_assert_eq!(merged.debt_amount, debt);
        prop_assert_eq!(merged.source_tags.len(), 1);
    }
}

// Property: scoring is bounded, deterministic, and exclusions always win.
proptest! {
    #[test]
    fn scores_stay_in_bounds_and_deterministic(
        debts in prop::collection::vec((0.0f64..500_000.0, any::<bool>()), 0..4),
        tax_debt in 0.0f64..100_000.0,
        inn_active in any::<bool>(),
        is_wanted in any::<bool>(),
        is_dead in any::<bool>(),
        has_property in any::<bool>(),
        is_bankrupt in any::<bool>(),
        lead_debt in 0.0f64..1_000_000.0,
    ) {
        let profile = profile_from(
            debts, tax_debt, inn_active, is_wanted, is_dead, has_property, is_bankrupt,
        );
        let lead = mk_lead("Тестов Тест", "+79161234567", lead_debt, "generic");
        let engine = ScoringEngine::from_config(&Config::default()).unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();

        let first = engine.score_at(&lead, &profile, today);
        let second = engine.score_at(&lead, &profile, today);

        prop_assert!((0..=100).contains(&first.score));
        prop_assert_eq!(first.score, second.score);
        prop_assert_eq!(&first.reasons, &second.reasons);
        prop_assert!(first.reasons.len() <= 3);

        if is_bankrupt || !inn_active || is_wanted || is_dead {
            prop_assert_eq!(first.group, ScoreGroup::Unqualified);
        }
    }
}
