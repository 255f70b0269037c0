use async_trait::async_trait;
use serde_json::Value;

use super::{check_status, number_field, SourceAdapter};
use crate::errors::FetchError;
use crate::models::{LeadRecord, SourceKind, SourcePayload, TaxData};

/// Tax service INN status check (ФНС).
///
/// The one source where a 404 carries meaning: an INN the service does
/// not know is not on the active register, so the absence itself is the
/// payload instead of a NotFound.
pub struct NalogAdapter {
    base_url: String,
}

impl NalogAdapter {
    pub fn new(base_url: String) -> Self {
        Self { base_url }
    }
}

#[async_trait]
impl SourceAdapter for NalogAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Nalog
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

        let url = format!("{}/inn/{}", self.base_url, inn);
        let response = client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            let data = TaxData {
                inn_active: false,
                ..TaxData::default()
            };
            return Ok(Some(SourcePayload::Tax(data)));
        }

        let response = check_status(response)?;
        let value: Value = response.json().await?;
        let data = parse_tax(&value)?;
        Ok(Some(SourcePayload::Tax(data)))
    }
}

fn parse_tax(value: &Value) -> Result<TaxData, FetchError> {
    if !value.is_object() {
        return Err(FetchError::Parse(
            "tax response is not an object".to_string(),
        ));
    }
    Ok(TaxData {
        inn_active: value
            .get("inn_active")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        tax_debt: number_field(value, "tax_debt"),
        is_wanted: value
            .get("is_wanted")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        is_dead: value.get("is_dead").and_then(Value::as_bool).unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_status() {
        let value = json!({
            "inn_active": true,
            "tax_debt": 38000.0,
            "is_wanted": false,
            "is_dead": false
        });
        let data = parse_tax(&value).unwrap();
        assert!(data.inn_active);
        assert_eq!(data.tax_debt, 38000.0);
        assert!(!data.is_wanted);
        assert!(!data.is_dead);
    }

    #[test]
    fn sparse_answers_fall_back_to_defaults() {
        let value = json!({"tax_debt": 0});
        let data = parse_tax(&value).unwrap();
        assert!(data.inn_active);
        assert_eq!(data.tax_debt, 0.0);
    }

    #[test]
    fn non_object_is_a_parse_error() {
        assert!(matches!(
            parse_tax(&json!("temporarily unavailable")),
            Err(FetchError::Parse(_))
        ));
        assert!(matches!(parse_tax(&json!([1, 2])), Err(FetchError::Parse(_))));
    }
}
