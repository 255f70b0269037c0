//! Adapters for the five external registries a lead is checked against.
//!
//! Every adapter answers through the same narrow surface so the
//! orchestrator can treat sources uniformly: `Ok(Some(_))` is a
//! conclusive answer (a "nothing on record" payload is still an
//! answer), `Ok(None)` means the lead lacks the identifier this source
//! needs and the call was skipped, and errors follow the
//! [`FetchError`] taxonomy.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::config::Config;
use crate::errors::FetchError;
use crate::models::{LeadRecord, SourceKind, SourcePayload};

pub mod courts;
pub mod fedresurs;
pub mod fssp;
pub mod nalog;
pub mod rosreestr;

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Whether the lead carries the identifier this source searches by.
    /// Inapplicable sources are skipped without burning a rate-limit
    /// token and without counting toward degradation.
    fn applicable(&self, lead: &LeadRecord) -> bool;

    /// One lookup against the registry for one lead. The caller owns
    /// throttling, retries and circuit breaking; the adapter only
    /// speaks the registry's protocol.
    async fn fetch(
        &self,
        client: &reqwest::Client,
        lead: &LeadRecord,
    ) -> Result<Option<SourcePayload>, FetchError>;
}

/// Builds the full adapter set from configured base URLs, in registry
/// order.
pub fn build_adapters(config: &Config) -> Vec<Arc<dyn SourceAdapter>> {
    vec![
        Arc::new(fssp::FsspAdapter::new(
            config.base_url_for(SourceKind::Fssp).to_string(),
        )),
        Arc::new(fedresurs::FedresursAdapter::new(
            config.base_url_for(SourceKind::Fedresurs).to_string(),
        )),
        Arc::new(rosreestr::RosreestrAdapter::new(
            config.base_url_for(SourceKind::Rosreestr).to_string(),
        )),
        Arc::new(courts::CourtAdapter::new(
            config.base_url_for(SourceKind::Court).to_string(),
        )),
        Arc::new(nalog::NalogAdapter::new(
            config.base_url_for(SourceKind::Nalog).to_string(),
        )),
    ]
}

/// Maps a non-success HTTP status onto the fetch taxonomy.
///
/// 404 is a definitive "no record" answer, not a failure. 429 is the
/// registry throttling us. 403 almost always means bot detection, which
/// a different proxy may get past, so it stays retryable.
pub(crate) fn check_status(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status.as_u16() {
        404 => Err(FetchError::NotFound),
        429 => Err(FetchError::RateLimited(format!(
            "registry throttled the request ({})",
            status
        ))),
        403 => Err(FetchError::Network(
            "request blocked (403), possible bot detection".to_string(),
        )),
        _ => Err(FetchError::Network(format!("unexpected status {}", status))),
    }
}

pub(crate) async fn get_json(
    client: &reqwest::Client,
    url: &str,
    query: &[(&str, &str)],
) -> Result<Value, FetchError> {
    let response = client.get(url).query(query).send().await?;
    let response = check_status(response)?;
    let value = response.json().await?;
    Ok(value)
}

pub(crate) async fn post_json(
    client: &reqwest::Client,
    url: &str,
    body: &Value,
) -> Result<Value, FetchError> {
    let response = client.post(url).json(body).send().await?;
    let response = check_status(response)?;
    let value = response.json().await?;
    Ok(value)
}

pub(crate) async fn get_text(
    client: &reqwest::Client,
    url: &str,
    query: &[(&str, &str)],
) -> Result<String, FetchError> {
    let response = client.get(url).query(query).send().await?;
    let response = check_status(response)?;
    let body = response.text().await?;
    Ok(body)
}

/// Numeric field that registries send either as a JSON number or as a
/// string.
pub(crate) fn number_field(item: &Value, key: &str) -> f64 {
    match item.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().replace(' ', "").replace(',', ".").parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

pub(crate) fn str_field(item: &Value, key: &str) -> Option<String> {
    item.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn adapter_registry_covers_every_source_in_order() {
        let config = Config::default();
        let kinds: Vec<SourceKind> = build_adapters(&config).iter().map(|a| a.kind()).collect();
        assert_eq!(kinds, SourceKind::ALL.to_vec());
    }

    #[test]
    fn number_field_accepts_string_amounts() {
        let item = json!({"debt_amount": "125 000,50"});
        assert_eq!(number_field(&item, "debt_amount"), 125000.50);
    }

    #[test]
    fn number_field_defaults_missing_to_zero() {
        let item = json!({"other": 1});
        assert_eq!(number_field(&item, "debt_amount"), 0.0);
    }

    #[test]
    fn str_field_drops_blank_values() {
        let item = json!({"creditor": "   ", "court": "АС города Москвы"});
        assert_eq!(str_field(&item, "creditor"), None);
        assert_eq!(str_field(&item, "court"), Some("АС города Москвы".to_string()));
    }
}
