use chrono::{NaiveDate, Utc};
use phonenumber::{country::Id as CountryId, Mode};
use sha2::{Digest, Sha256};

use crate::errors::AppError;
use crate::models::{LeadRecord, RawLeadRow};

/// Region keyword table checked against lowercased addresses.
const ADDRESS_REGIONS: &[(&str, &str)] = &[
    ("москва", "Москва"),
    ("moscow", "Москва"),
    ("санкт-петербург", "Санкт-Петербург"),
    ("спб", "Санкт-Петербург"),
    ("петербург", "Санкт-Петербург"),
    ("татарстан", "Татарстан"),
    ("казань", "Татарстан"),
    ("саратов", "Саратов"),
    ("калуга", "Калуга"),
    ("краснодар", "Краснодар"),
    ("екатеринбург", "Екатеринбург"),
    ("новосибирск", "Новосибирск"),
];

/// City-code prefixes of canonical `+7...` phones.
const PHONE_REGIONS: &[(&str, &str)] = &[
    ("+7495", "Москва"),
    ("+7499", "Москва"),
    ("+7812", "Санкт-Петербург"),
    ("+7843", "Татарстан"),
    ("+7845", "Саратов"),
    ("+7484", "Калуга"),
    ("+7861", "Краснодар"),
    ("+7343", "Екатеринбург"),
    ("+7383", "Новосибирск"),
];

/// Normalizes one raw row into a canonical [`LeadRecord`].
///
/// The phone is the mandatory identity anchor: a row without a usable
/// phone fails with `AppError::Validation` and must be skipped and logged
/// by the caller, never silently dropped. Everything else degrades to
/// `None` rather than rejecting the row. Running the normalizer over an
/// already-normalized row is a no-op.
pub fn normalize_row(raw: &RawLeadRow, default_tag: &str) -> Result<LeadRecord, AppError> {
    let phone = raw
        .phone
        .as_deref()
        .and_then(normalize_phone)
        .ok_or_else(|| {
            AppError::Validation(format!(
                "no usable phone in row (name={:?})",
                raw.name.as_deref().unwrap_or("")
            ))
        })?;

    let name = raw.name.as_deref().map(normalize_name).unwrap_or_default();
    let (inn, inn_invalid) = normalize_inn(raw.inn.as_deref());
    let kpp = normalize_digits(raw.kpp.as_deref(), 9);
    let ogrn = raw
        .ogrn
        .as_deref()
        .and_then(|v| normalize_digits(Some(v), 13).or_else(|| normalize_digits(Some(v), 15)));
    let address = raw
        .address
        .as_deref()
        .map(normalize_whitespace)
        .filter(|s| !s.is_empty());
    let region = raw
        .region
        .as_deref()
        .map(normalize_whitespace)
        .filter(|s| !s.is_empty())
        .or_else(|| extract_region(address.as_deref(), &phone));

    let tag = raw
        .source_tag
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| default_tag.to_string());

    Ok(LeadRecord {
        lead_id: lead_id(&name, &phone, inn.as_deref()),
        phone,
        name,
        inn,
        inn_invalid,
        kpp,
        ogrn,
        dob: raw.dob.as_deref().and_then(parse_date),
        email: raw
            .email
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| e.contains('@')),
        address,
        region,
        debt_amount: raw
            .debt_amount
            .as_deref()
            .and_then(parse_amount)
            .unwrap_or(0.0),
        revenue: raw.revenue.as_deref().and_then(parse_amount),
        source_tags: vec![tag],
        created_at: Utc::now(),
    })
}

/// Canonicalizes a phone to `+7XXXXXXXXXX`.
///
/// Digit-rule fast path first (the overwhelming majority of rows), full
/// `phonenumber` validation as the fallback for anything unusual.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    match digits.len() {
        11 if digits.starts_with('8') => return Some(format!("+7{}", &digits[1..])),
        11 if digits.starts_with('7') => return Some(format!("+{}", digits)),
        10 => return Some(format!("+7{}", digits)),
        _ => {}
    }

    match phonenumber::parse(Some(CountryId::RU), raw) {
        Ok(number) if phonenumber::is_valid(&number) => {
            Some(number.format().mode(Mode::E164).to_string())
        }
        _ => None,
    }
}

/// Validates a tax ID: 12 digits for a person, 10 for an organization.
///
/// Returns `(None, true)` when a value was present but malformed; the
/// row is kept and the flag travels with the lead.
pub fn normalize_inn(raw: Option<&str>) -> (Option<String>, bool) {
    let Some(raw) = raw else {
        return (None, false);
    };
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() && raw.trim().is_empty() {
        return (None, false);
    }
    match digits.len() {
        10 | 12 => (Some(digits), false),
        _ => (None, true),
    }
}

/// Collapses whitespace, title-cases each word, strips everything except
/// letters, digits, spaces and hyphens.
pub fn normalize_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect();

    cleaned
        .split_whitespace()
        .map(title_case_word)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => {
            first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
        }
        None => String::new(),
    }
}

fn normalize_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_digits(raw: Option<&str>, expected_len: usize) -> Option<String> {
    let digits: String = raw?.chars().filter(|c| c.is_ascii_digit()).collect();
    (digits.len() == expected_len).then_some(digits)
}

/// Infers the region from address keywords first, then from the phone's
/// city-code prefix.
pub fn extract_region(address: Option<&str>, phone: &str) -> Option<String> {
    if let Some(address) = address {
        let lower = address.to_lowercase();
        for (keyword, region) in ADDRESS_REGIONS {
            if lower.contains(keyword) {
                return Some((*region).to_string());
            }
        }
    }
    for (prefix, region) in PHONE_REGIONS {
        if phone.starts_with(prefix) {
            return Some((*region).to_string());
        }
    }
    None
}

/// Deterministic lead identifier: first 16 hex chars of
/// SHA-256(name|phone|inn).
pub fn lead_id(name: &str, phone: &str, inn: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b"|");
    hasher.update(phone.as_bytes());
    hasher.update(b"|");
    hasher.update(inn.unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Parses money fields tolerant of `300 000,50`, `300000.50` and
/// currency suffixes.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    // A single comma with no dot is a decimal separator, thousands
    // separators were already stripped with the spaces.
    let candidate = if cleaned.contains(',') && !cleaned.contains('.') {
        cleaned.replacen(',', ".", 1)
    } else {
        cleaned.replace(',', "")
    };
    candidate.parse().ok().filter(|v: &f64| v.is_finite() && *v >= 0.0)
}

/// Accepts `dd.mm.yyyy` and ISO `yyyy-mm-dd`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%d.%m.%Y")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d"))
        .ok()
}

/// Derives a source tag from an input file name when the caller did not
/// declare one.
pub fn infer_source_tag(file_name: &str) -> String {
    let lower = file_name.to_lowercase();
    if lower.contains("фнс") || lower.contains("fns") {
        "fns".to_string()
    } else if lower.contains("госуслуги") || lower.contains("gosuslugi") {
        "gosuslugi".to_string()
    } else if lower.contains("доставка") || lower.contains("delivery") || lower.contains("еда")
    {
        "delivery".to_string()
    } else {
        "generic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_digit_rules() {
        assert_eq!(normalize_phone("89991234567").as_deref(), Some("+79991234567"));
        assert_eq!(normalize_phone("79991234567").as_deref(), Some("+79991234567"));
        assert_eq!(normalize_phone("9991234567").as_deref(), Some("+79991234567"));
        assert_eq!(
            normalize_phone("8 (999) 123-45-67").as_deref(),
            Some("+79991234567")
        );
        assert_eq!(normalize_phone("12345").as_deref(), None);
        assert_eq!(normalize_phone("").as_deref(), None);
    }

    #[test]
    fn phone_normalization_is_idempotent() {
        let once = normalize_phone("8 999 123 45 67").unwrap();
        let twice = normalize_phone(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn inn_validation() {
        assert_eq!(normalize_inn(Some("771234567890")), (Some("771234567890".into()), false));
        assert_eq!(normalize_inn(Some("7712345678")), (Some("7712345678".into()), false));
        // Present but malformed: flagged, not rejected.
        assert_eq!(normalize_inn(Some("12345")), (None, true));
        assert_eq!(normalize_inn(Some("")), (None, false));
        assert_eq!(normalize_inn(None), (None, false));
    }

    #[test]
    fn name_title_case() {
        assert_eq!(normalize_name("  иванов   иван  иванович "), "Иванов Иван Иванович");
        assert_eq!(normalize_name("ПЕТРОВ-ВОДКИН кузьма"), "Петров-водкин Кузьма");
        assert_eq!(normalize_name("Сидоров С.С."), "Сидоров Сс");
    }

    #[test]
    fn region_from_address_wins_over_phone() {
        let region = extract_region(Some("г. Казань, ул. Баумана 1"), "+74951234567");
        assert_eq!(region.as_deref(), Some("Татарстан"));
    }

    #[test]
    fn region_from_phone_prefix() {
        assert_eq!(extract_region(None, "+78121234567").as_deref(), Some("Санкт-Петербург"));
        assert_eq!(extract_region(None, "+79991234567"), None);
    }

    #[test]
    fn amount_parsing() {
        assert_eq!(parse_amount("300000"), Some(300000.0));
        assert_eq!(parse_amount("300 000,50"), Some(300000.5));
        assert_eq!(parse_amount("1,234,567.89"), Some(1234567.89));
        assert_eq!(parse_amount("руб."), None);
    }

    #[test]
    fn row_without_phone_is_validation_error() {
        let raw = RawLeadRow {
            name: Some("Иванов Иван".into()),
            inn: Some("771234567890".into()),
            ..Default::default()
        };
        assert!(matches!(
            normalize_row(&raw, "generic"),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn normalized_row_is_stable_under_renormalization() {
        let raw = RawLeadRow {
            name: Some("иванов иван".into()),
            phone: Some("8 (999) 123-45-67".into()),
            inn: Some("771234567890".into()),
            address: Some("г. Москва, Тверская 1".into()),
            debt_amount: Some("250 000".into()),
            ..Default::default()
        };
        let first = normalize_row(&raw, "generic").unwrap();

        let renormalized = RawLeadRow {
            name: Some(first.name.clone()),
            phone: Some(first.phone.clone()),
            inn: first.inn.clone(),
            address: first.address.clone(),
            region: first.region.clone(),
            debt_amount: Some(format!("{}", first.debt_amount)),
            ..Default::default()
        };
        let second = normalize_row(&renormalized, "generic").unwrap();

        assert_eq!(first.phone, second.phone);
        assert_eq!(first.name, second.name);
        assert_eq!(first.inn, second.inn);
        assert_eq!(first.region, second.region);
        assert_eq!(first.lead_id, second.lead_id);
        assert_eq!(first.debt_amount, second.debt_amount);
    }

    #[test]
    fn lead_id_is_deterministic() {
        let a = lead_id("Иванов Иван", "+79991234567", Some("771234567890"));
        let b = lead_id("Иванов Иван", "+79991234567", Some("771234567890"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        let c = lead_id("Иванов Иван", "+79991234568", Some("771234567890"));
        assert_ne!(a, c);
    }

    #[test]
    fn source_tag_inference() {
        assert_eq!(infer_source_tag("leads_fns_2024.csv"), "fns");
        assert_eq!(infer_source_tag("выгрузка_госуслуги.csv"), "gosuslugi");
        assert_eq!(infer_source_tag("delivery-app-export.csv"), "delivery");
        assert_eq!(infer_source_tag("batch_01.csv"), "generic");
    }
}
