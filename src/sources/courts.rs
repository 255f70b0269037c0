use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};

use super::{get_text, SourceAdapter};
use crate::errors::FetchError;
use crate::models::{CourtData, CourtOrder, LeadRecord, SourceKind, SourcePayload};
use crate::normalizer;

/// Arbitration court record search (картотека арбитражных дел).
///
/// The only source that answers with HTML instead of JSON. Results live
/// in a `table.custom_table` whose columns are case number, case type,
/// court, judge, parties, status and date of last action. A page
/// without the table is a conclusive "no cases" answer.
pub struct CourtAdapter {
    base_url: String,
}

impl CourtAdapter {
    pub fn new(base_url: String) -> Self {
        Self { base_url }
    }
}

#[async_trait]
impl SourceAdapter for CourtAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Court
    }

    fn applicable(&self, lead: &LeadRecord) -> bool {
        !lead.name.is_empty()
    }

    async fn fetch(
        &self,
        client: &reqwest::Client,
        lead: &LeadRecord,
    ) -> Result<Option<SourcePayload>, FetchError> {
        if lead.name.is_empty() {
            return Ok(None);
        }

        let url = format!("{}/Kad/SearchInstances", self.base_url);
        let inn = lead.inn.as_deref().unwrap_or("");
        let body = get_text(
            client,
            &url,
            &[
                ("Cases.Participant.Name", lead.name.as_str()),
                ("Cases.Participant.Inn", inn),
            ],
        )
        .await?;

        let orders = parse_orders(&body);
        Ok(Some(SourcePayload::CourtRecords(CourtData { orders })))
    }
}

// Kept synchronous: `Html` is not Send and must not live across an
// await point.
fn parse_orders(html: &str) -> Vec<CourtOrder> {
    let document = Html::parse_document(html);
    let table_selector = Selector::parse("table.custom_table").unwrap();
    let row_selector = Selector::parse("tr").unwrap();
    let cell_selector = Selector::parse("td").unwrap();

    let mut orders = Vec::new();
    let Some(table) = document.select(&table_selector).next() else {
        return orders;
    };

    // First row is the header.
    for row in table.select(&row_selector).skip(1) {
        let cells: Vec<String> = row
            .select(&cell_selector)
            .map(|cell| cell.text().collect::<String>().trim().to_string())
            .collect();
        if cells.len() < 6 || cells[0].is_empty() {
            continue;
        }

        orders.push(CourtOrder {
            case_number: cells[0].clone(),
            case_type: non_empty(&cells[1]),
            court: non_empty(&cells[2]),
            status: non_empty(&cells[5]),
            decided_at: cells.get(6).and_then(|text| extract_date(text)),
        });
    }
    orders
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Pulls the first recognizable date out of free-form cell text.
fn extract_date(text: &str) -> Option<chrono::NaiveDate> {
    let pattern = Regex::new(r"\d{2}\.\d{2}\.\d{4}|\d{4}-\d{2}-\d{2}").unwrap();
    pattern
        .find(text)
        .and_then(|m| normalizer::parse_date(m.as_str()))
}
