//! Delimited input/output. The reader is header-driven: columns are
//! recognized by alias (Russian and Latin header names), unknown
//! columns are ignored, and nothing is validated here beyond shape.
//! Validation is the normalizer's job.

use std::io;
use std::path::Path;

use crate::errors::AppError;
use crate::models::{RawLeadRow, ScoredRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    Phone,
    Inn,
    Kpp,
    Ogrn,
    Dob,
    Email,
    Address,
    Region,
    DebtAmount,
    Revenue,
    SourceTag,
}

/// Maps one header cell to a known input field. Comparison is on the
/// lowercased header with spaces collapsed to underscores, so
/// `Дата рождения` and `дата_рождения` resolve identically.
fn field_for(header: &str) -> Option<Field> {
    let normalized = header
        .trim()
        .trim_start_matches('\u{feff}')
        .to_lowercase()
        .replace(' ', "_");
    match normalized.as_str() {
        "фио" | "fio" | "имя" | "name" | "фамилия_имя_отчество" | "full_name" => {
            Some(Field::Name)
        }
        "телефон" | "phone" | "тел" | "tel" | "номер_телефона" | "mobile" => {
            Some(Field::Phone)
        }
        "инн" | "inn" => Some(Field::Inn),
        "кпп" | "kpp" => Some(Field::Kpp),
        "огрн" | "ogrn" => Some(Field::Ogrn),
        "дата_рождения" | "date_birth" | "dob" | "birthdate" => Some(Field::Dob),
        "email" | "e-mail" | "почта" => Some(Field::Email),
        "адрес" | "address" => Some(Field::Address),
        "регион" | "region" => Some(Field::Region),
        "долг" | "сумма_долга" | "debt" | "debt_amount" => Some(Field::DebtAmount),
        "выручка" | "revenue" | "доход" => Some(Field::Revenue),
        "источник" | "source" | "тег" | "tag" => Some(Field::SourceTag),
        _ => None,
    }
}

pub fn read_rows(path: &Path) -> Result<Vec<RawLeadRow>, AppError> {
    let reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    rows_from_reader(reader)
}

fn rows_from_reader<R: io::Read>(mut reader: csv::Reader<R>) -> Result<Vec<RawLeadRow>, AppError> {
    let headers = reader.headers()?.clone();
    let mapping: Vec<Option<Field>> = headers.iter().map(field_for).collect();

    if !mapping.contains(&Some(Field::Phone)) {
        // Not fatal: every row will be rejected by the normalizer with
        // its own reason, but the root cause deserves one loud line.
        tracing::warn!("⚠️ No recognizable phone column among headers {:?}", headers);
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = RawLeadRow::default();
        for (idx, value) in record.iter().enumerate() {
            let Some(field) = mapping.get(idx).copied().flatten() else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            let value = value.to_string();
            match field {
                Field::Name => row.name = Some(value),
                Field::Phone => row.phone = Some(value),
                Field::Inn => row.inn = Some(value),
                Field::Kpp => row.kpp = Some(value),
                Field::Ogrn => row.ogrn = Some(value),
                Field::Dob => row.dob = Some(value),
                Field::Email => row.email = Some(value),
                Field::Address => row.address = Some(value),
                Field::Region => row.region = Some(value),
                Field::DebtAmount => row.debt_amount = Some(value),
                Field::Revenue => row.revenue = Some(value),
                Field::SourceTag => row.source_tag = Some(value),
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Writes scored rows, which the pipeline already holds in input order:
/// every normalized field, then the scoring columns.
pub fn write_scored(path: &Path, rows: &[ScoredRow]) -> Result<(), AppError> {
    let writer = csv::Writer::from_path(path)?;
    write_to(writer, rows)
}

fn write_to<W: io::Write>(mut writer: csv::Writer<W>, rows: &[ScoredRow]) -> Result<(), AppError> {
    writer.write_record([
        "lead_id",
        "name",
        "phone",
        "inn",
        "kpp",
        "ogrn",
        "dob",
        "email",
        "address",
        "region",
        "debt_amount",
        "revenue",
        "source_tags",
        "score",
        "group",
        "reason_1",
        "reason_2",
        "reason_3",
        "degraded",
    ])?;

    for row in rows {
        let lead = &row.lead;
        let score = &row.score;
        let dob = lead
            .dob
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let debt_amount = lead.debt_amount.to_string();
        let revenue = lead.revenue.map(|r| r.to_string()).unwrap_or_default();
        let tags = lead.source_tags.join(",");
        let final_score = score.score.to_string();
        writer.write_record([
            lead.lead_id.as_str(),
            lead.name.as_str(),
            lead.phone.as_str(),
            lead.inn.as_deref().unwrap_or(""),
            lead.kpp.as_deref().unwrap_or(""),
            lead.ogrn.as_deref().unwrap_or(""),
            dob.as_str(),
            lead.email.as_deref().unwrap_or(""),
            lead.address.as_deref().unwrap_or(""),
            lead.region.as_deref().unwrap_or(""),
            debt_amount.as_str(),
            revenue.as_str(),
            tags.as_str(),
            final_score.as_str(),
            score.group.as_str(),
            score.reason(0),
            score.reason(1),
            score.reason(2),
            if score.degraded { "true" } else { "false" },
        ])?;
    }

    writer.flush()?;
    Ok(())
}
