use std::collections::HashMap;

use crate::models::LeadRecord;
use crate::normalizer;

/// Outcome of offering one normalized record to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// Same phone already present; the records were merged.
    Merged,
}

/// Identity index spanning the whole run: normalized phone → canonical
/// lead.
///
/// O(1) amortized per row. Only this index and the current batch are
/// memory-resident; raw rows are not retained. Dedup runs single-threaded
/// before the concurrent enrichment stage.
#[derive(Debug, Default)]
pub struct IdentityIndex {
    map: HashMap<String, LeadRecord>,
    duplicates_merged: u64,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new lead or merges into the existing one with the same
    /// phone. Merging is idempotent: offering the same record twice
    /// changes nothing after the first merge.
    pub fn upsert(&mut self, record: LeadRecord) -> UpsertOutcome {
        match self.map.get_mut(&record.phone) {
            None => {
                self.map.insert(record.phone.clone(), record);
                UpsertOutcome::Inserted
            }
            Some(existing) => {
                self.duplicates_merged += 1;
                merge_into(existing, record);
                UpsertOutcome::Merged
            }
        }
    }

    pub fn get(&self, phone: &str) -> Option<&LeadRecord> {
        self.map.get(phone)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn duplicates_merged(&self) -> u64 {
        self.duplicates_merged
    }

    /// Pre-seeds the index from a prior run's persisted leads.
    pub fn preload(&mut self, records: Vec<LeadRecord>) {
        for record in records {
            self.map.entry(record.phone.clone()).or_insert(record);
        }
    }
}

/// Merge policy: union non-conflicting fields and tags; for conflicting
/// scalars the most recently seen non-null value wins; contributing
/// source tags accumulate in first-seen order; the earliest creation
/// timestamp survives.
fn merge_into(existing: &mut LeadRecord, incoming: LeadRecord) {
    if !incoming.name.is_empty() && incoming.name != existing.name {
        existing.name = incoming.name;
    }
    if incoming.inn.is_some() {
        existing.inn = incoming.inn;
        existing.inn_invalid = false;
    } else if incoming.inn_invalid && existing.inn.is_none() {
        existing.inn_invalid = true;
    }
    if incoming.kpp.is_some() {
        existing.kpp = incoming.kpp;
    }
    if incoming.ogrn.is_some() {
        existing.ogrn = incoming.ogrn;
    }
    if incoming.dob.is_some() {
        existing.dob = incoming.dob;
    }
    if incoming.email.is_some() {
        existing.email = incoming.email;
    }
    if incoming.address.is_some() {
        existing.address = incoming.address;
    }
    if incoming.region.is_some() {
        existing.region = incoming.region;
    }
    if incoming.debt_amount > 0.0 {
        existing.debt_amount = incoming.debt_amount;
    }
    if incoming.revenue.is_some() {
        existing.revenue = incoming.revenue;
    }
    for tag in incoming.source_tags {
        if !existing.source_tags.contains(&tag) {
            existing.source_tags.push(tag);
        }
    }
    if incoming.created_at < existing.created_at {
        existing.created_at = incoming.created_at;
    }
    // Identity digest tracks the merged name/inn state.
    existing.lead_id =
        normalizer::lead_id(&existing.name, &existing.phone, existing.inn.as_deref());
}
