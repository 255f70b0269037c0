use async_trait::async_trait;
use serde_json::Value;

use super::{get_json, SourceAdapter};
use crate::errors::FetchError;
use crate::models::{LeadRecord, PropertyData, SourceKind, SourcePayload};

/// Property registry (Росреестр).
///
/// Owner lookups need an INN; leads without one skip this source. A
/// 200 with an empty object list is a conclusive "no holdings" answer,
/// which is a positive scoring signal for bankruptcy leads.
pub struct RosreestrAdapter {
    base_url: String,
}

impl RosreestrAdapter {
    pub fn new(base_url: String) -> Self {
        Self { base_url }
    }
}

#[async_trait]
impl SourceAdapter for RosreestrAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Rosreestr
    }

    fn applicable(&self, lead: &LeadRecord) -> bool {
        lead.inn.is_some()
    }

    async fn fetch(
        &self,
        client: &reqwest::Client,
        lead: &LeadRecord,
    ) -> Result<Option<SourcePayload>, FetchError> {
        let Some(inn) = &lead.inn else {
            return Ok(None);
        };

        let url = format!("{}/online/fir_obj", self.base_url);
        let value = get_json(client, &url, &[("inn", inn)]).await?;
        let data = parse_property(&value)?;
        Ok(Some(SourcePayload::Property(data)))
    }
}

fn parse_property(value: &Value) -> Result<PropertyData, FetchError> {
    let objects = value
        .get("objects")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Parse("property response missing objects".to_string()))?;

    let mut data = PropertyData {
        has_property: !objects.is_empty(),
        property_count: objects.len() as u32,
        kinds: Vec::new(),
    };
    for object in objects {
        let kind = object
            .get("objectType")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(kind) = kind {
            if !data.kinds.iter().any(|k| k == kind) {
                data.kinds.push(kind.to_string());
            }
        }
    }
    Ok(data)
}
