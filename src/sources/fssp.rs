use async_trait::async_trait;
use serde_json::Value;

use super::{get_json, number_field, str_field, SourceAdapter};
use crate::errors::FetchError;
use crate::models::{Debt, DebtKind, EnforcementData, LeadRecord, SourceKind, SourcePayload};

/// Enforcement-proceedings registry (ФССП).
///
/// Queried by INN when the lead has one, otherwise by full name and
/// birth date. The answer is the list of enforcement cases with
/// creditor, amount and open/closed status; an empty list is a
/// conclusive "no proceedings" answer.
pub struct FsspAdapter {
    base_url: String,
}

impl FsspAdapter {
    pub fn new(base_url: String) -> Self {
        Self { base_url }
    }
}

#[async_trait]
impl SourceAdapter for FsspAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Fssp
    }

    fn applicable(&self, lead: &LeadRecord) -> bool {
        lead.inn.is_some() || !lead.name.is_empty()
    }

    async fn fetch(
        &self,
        client: &reqwest::Client,
        lead: &LeadRecord,
    ) -> Result<Option<SourcePayload>, FetchError> {
        let url = format!("{}/search", self.base_url);

        let value = if let Some(inn) = &lead.inn {
            get_json(client, &url, &[("type", "ip"), ("inn", inn)]).await?
        } else if !lead.name.is_empty() {
            let (lastname, firstname, middlename) = split_fio(&lead.name);
            let birthdate = lead
                .dob
                .map(|d| d.format("%d.%m.%Y").to_string())
                .unwrap_or_default();
            get_json(
                client,
                &url,
                &[
                    ("type", "physical"),
                    ("lastname", lastname),
                    ("firstname", firstname),
                    ("middlename", middlename),
                    ("birthdate", &birthdate),
                ],
            )
            .await?
        } else {
            return Ok(None);
        };

        let data = parse_enforcement(&value)?;
        Ok(Some(SourcePayload::Enforcement(data)))
    }
}

fn split_fio(name: &str) -> (&str, &str, &str) {
    let mut parts = name.split_whitespace();
    let lastname = parts.next().unwrap_or("");
    let firstname = parts.next().unwrap_or("");
    let middlename = parts.next().unwrap_or("");
    (lastname, firstname, middlename)
}

fn parse_enforcement(value: &Value) -> Result<EnforcementData, FetchError> {
    let result = value
        .get("result")
        .ok_or_else(|| FetchError::Parse("enforcement response missing result".to_string()))?;
    let empty = Vec::new();
    let items = result
        .get("items")
        .and_then(Value::as_array)
        .unwrap_or(&empty);

    let mut data = EnforcementData::default();
    for item in items {
        let creditor = str_field(item, "creditor").unwrap_or_default();
        let active = item
            .get("status")
            .and_then(Value::as_str)
            .map(is_active_status)
            .unwrap_or(false);
        let debt = Debt {
            kind: DebtKind::classify(&creditor),
            creditor,
            amount: number_field(item, "debt_amount"),
            case_number: str_field(item, "case_number"),
            active,
        };
        data.total_debt += debt.amount;
        if debt.active {
            data.active_cases += 1;
        }
        data.debts.push(debt);
    }
    Ok(data)
}

/// Open-case heuristics over registry status strings. Closed markers
/// win when both appear in one status.
fn is_active_status(status: &str) -> bool {
    let status = status.to_lowercase();
    if status.contains("окончено") || status.contains("прекращено") {
        return false;
    }
    status == "active" || status.contains("производство") || status.contains("взыскание")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_items_into_debts() {
        let value = json!({
            "result": {
                "items": [
                    {
                        "creditor": "ПАО Сбербанк",
                        "debt_amount": 300000.0,
                        "status": "Исполнительное производство",
                        "case_number": "12345/24/77001-ИП"
                    },
                    {
                        "creditor": "ООО МФО Займы",
                        "debt_amount": "45 000,00",
                        "status": "Окончено",
                        "case_number": "99/23/77001-ИП"
                    }
                ]
            }
        });

        let data = parse_enforcement(&value).unwrap();
        assert_eq!(data.debts.len(), 2);
        assert_eq!(data.total_debt, 345000.0);
        assert_eq!(data.active_cases, 1);
        assert_eq!(data.debts[0].kind, DebtKind::Bank);
        assert!(data.debts[0].active);
        assert_eq!(data.debts[1].kind, DebtKind::Mfo);
        assert!(!data.debts[1].active);
    }

    #[test]
    fn empty_items_means_no_proceedings() {
        let value = json!({"result": {"items": []}});
        let data = parse_enforcement(&value).unwrap();
        assert!(data.debts.is_empty());
        assert_eq!(data.total_debt, 0.0);
    }

    #[test]
    fn missing_result_is_a_parse_error() {
        let value = json!({"error": "captcha required"});
        assert!(matches!(
            parse_enforcement(&value),
            Err(FetchError::Parse(_))
        ));
    }

    #[test]
    fn status_keywords_decide_openness() {
        assert!(is_active_status("Исполнительное производство"));
        assert!(is_active_status("Взыскание"));
        assert!(is_active_status("active"));
        assert!(!is_active_status("Окончено"));
        assert!(!is_active_status("Производство прекращено"));
        assert!(!is_active_status(""));
    }

    #[test]
    fn fio_splits_into_three_parts() {
        assert_eq!(
            split_fio("Иванов Иван Иванович"),
            ("Иванов", "Иван", "Иванович")
        );
        assert_eq!(split_fio("Петров Петр"), ("Петров", "Петр", ""));
    }
}
