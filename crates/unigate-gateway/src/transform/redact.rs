//! Sensitive-data detection and masking
//!
//! Pattern-based detection over every string in a JSON tree. Matched spans
//! are replaced with a category marker so downstream consumers can tell that
//! a value was present without learning it.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use unigate_core::PiiInfoType;

lazy_static! {
    static ref EMAIL: Regex =
        Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap();
    static ref PHONE: Regex =
        Regex::new(r"(?:\+\d{1,3}[ .\-]?)?\(?\d{3}\)?[ .\-]?\d{3}[ .\-]?\d{4}\b").unwrap();
    static ref CREDIT_CARD: Regex =
        Regex::new(r"\b\d{4}[ \-]?\d{4}[ \-]?\d{4}[ \-]?\d{4}\b").unwrap();
    static ref SSN: Regex = Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap();
    static ref IP_ADDRESS: Regex = Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap();
}

fn pattern(info_type: PiiInfoType) -> (&'static Regex, &'static str) {
    match info_type {
        PiiInfoType::EmailAddress => (&EMAIL, "[REDACTED_EMAIL_ADDRESS]"),
        PiiInfoType::PhoneNumber => (&PHONE, "[REDACTED_PHONE_NUMBER]"),
        PiiInfoType::CreditCardNumber => (&CREDIT_CARD, "[REDACTED_CREDIT_CARD_NUMBER]"),
        PiiInfoType::SocialSecurityNumber => (&SSN, "[REDACTED_SOCIAL_SECURITY_NUMBER]"),
        PiiInfoType::IpAddress => (&IP_ADDRESS, "[REDACTED_IP_ADDRESS]"),
    }
}

/// Mask every configured info type throughout a JSON payload. An empty
/// restriction list means all known categories.
pub fn apply(payload: Value, info_types: &[PiiInfoType]) -> Value {
    let info_types = if info_types.is_empty() {
        PiiInfoType::all()
    } else {
        info_types.to_vec()
    };
    walk(payload, &info_types)
}

fn walk(value: Value, info_types: &[PiiInfoType]) -> Value {
    match value {
        Value::String(text) => Value::String(mask_text(text, info_types)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| walk(item, info_types))
                .collect(),
        ),
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(key, item)| (key, walk(item, info_types)))
                .collect(),
        ),
        other => other,
    }
}

fn mask_text(text: String, info_types: &[PiiInfoType]) -> String {
    let mut masked = text;
    // Credit cards before phone numbers: a 16-digit pan would otherwise be
    // partially eaten by the looser phone pattern.
    let mut ordered = info_types.to_vec();
    ordered.sort_by_key(|t| match t {
        PiiInfoType::CreditCardNumber => 0,
        PiiInfoType::SocialSecurityNumber => 1,
        PiiInfoType::EmailAddress => 2,
        PiiInfoType::IpAddress => 3,
        PiiInfoType::PhoneNumber => 4,
    });
    for info_type in ordered {
        let (regex, marker) = pattern(info_type);
        if regex.is_match(&masked) {
            masked = regex.replace_all(&masked, marker).into_owned();
        }
    }
    masked
}
