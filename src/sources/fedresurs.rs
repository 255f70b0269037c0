use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};

use super::{post_json, str_field, SourceAdapter};
use crate::errors::FetchError;
use crate::models::{BankruptcyData, LeadRecord, SourceKind, SourcePayload};

/// Bankruptcy register (Федресурс).
///
/// Any published procedure marks the lead as bankrupt, which excludes
/// them from scoring. An empty search result is the "no bankruptcy
/// signs" answer the scoring rules reward.
pub struct FedresursAdapter {
    base_url: String,
}

impl FedresursAdapter {
    pub fn new(base_url: String) -> Self {
        Self { base_url }
    }
}

#[async_trait]
impl SourceAdapter for FedresursAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Fedresurs
    }

    fn applicable(&self, lead: &LeadRecord) -> bool {
        lead.inn.is_some() || !lead.name.is_empty()
    }

    async fn fetch(
        &self,
        client: &reqwest::Client,
        lead: &LeadRecord,
    ) -> Result<Option<SourcePayload>, FetchError> {
        let body = if let Some(inn) = &lead.inn {
            search_body(json!(inn), Value::Null)
        } else if !lead.name.is_empty() {
            search_body(Value::Null, json!(lead.name))
        } else {
            return Ok(None);
        };

        let url = format!("{}/backend/persons", self.base_url);
        let value = post_json(client, &url, &body).await?;
        let data = parse_bankruptcy(&value)?;
        Ok(Some(SourcePayload::Bankruptcy(data)))
    }
}

fn search_body(inn: Value, name: Value) -> Value {
    json!({
        "searchType": "parties",
        "inn": inn,
        "name": name,
        "limit": 50,
        "offset": 0,
        "orderBy": "relevance",
        "isAscending": false
    })
}

fn parse_bankruptcy(value: &Value) -> Result<BankruptcyData, FetchError> {
    let results = value
        .get("data")
        .and_then(|d| d.get("searchResult"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            FetchError::Parse("bankruptcy response missing data.searchResult".to_string())
        })?;

    let mut data = BankruptcyData {
        is_bankrupt: !results.is_empty(),
        ..Default::default()
    };
    for item in results {
        let stage = item
            .get("bankruptcyStage")
            .and_then(|s| s.get("name"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(stage) = stage {
            if !data.procedures.iter().any(|p| p == stage) {
                data.procedures.push(stage.to_string());
            }
        }

        let published = str_field(item, "publishDate")
            .as_deref()
            .and_then(parse_publish_date);
        if let Some(published) = published {
            if data.last_message_date.map_or(true, |d| published > d) {
                data.last_message_date = Some(published);
            }
        }
    }
    Ok(data)
}

// Publish dates arrive either as full RFC 3339 timestamps or as bare
// dates.
fn parse_publish_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}
