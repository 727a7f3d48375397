use crate::SCAM_PATTERNS;
use chrono::{DateTime, Utc};
use regex::Regex;
use snare_core::{ExtractedIntelligence, IntelKind, IntelligenceItem};
use std::sync::OnceLock;

const EMAIL_PROVIDERS: [&str; 7] = [
    "gmail",
    "yahoo",
    "hotmail",
    "outlook",
    "mail",
    "protonmail",
    "icloud",
];

/// The first nine entries are real payment providers and earn the higher confidence.
const PAYMENT_PROVIDERS: [&str; 11] = [
    "paytm",
    "phonepe",
    "gpay",
    "upi",
    "okaxis",
    "ybl",
    "okhdfcbank",
    "oksbi",
    "axl",
    "fakebank",
    "bank",
];
const STRONG_PROVIDER_COUNT: usize = 9;

const BANK_TYPICAL_CONFIDENCE: f64 = 0.9;
const BANK_ATYPICAL_CONFIDENCE: f64 = 0.6;
const HANDLE_STRONG_CONFIDENCE: f64 = 0.95;
const HANDLE_WEAK_CONFIDENCE: f64 = 0.8;
const PHONE_INTERNATIONAL_CONFIDENCE: f64 = 0.9;
const PHONE_LOCAL_CONFIDENCE: f64 = 0.7;
const LINK_CONFIDENCE: f64 = 1.0;

/// What a single extraction pass added to the set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionOutcome {
    pub new_items: Vec<IntelligenceItem>,
    pub new_keywords: Vec<String>,
}

impl ExtractionOutcome {
    pub fn is_empty(&self) -> bool {
        self.new_items.is_empty() && self.new_keywords.is_empty()
    }
}

fn bank_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b(\d{9,18})\b").expect("valid regex"))
}

fn handle_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[\w.-]+@[\w.-]+").expect("valid regex"))
}

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\+?\d{10,13}").expect("valid regex"))
}

fn link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"https?://[^\s<>"']+"#).expect("valid regex"))
}

/// Returns a copy of `existing` with anything new in `text` appended.
pub fn extract(text: &str, existing: &ExtractedIntelligence, at: DateTime<Utc>) -> ExtractedIntelligence {
    let mut updated = existing.clone();
    extract_into(&mut updated, text, at);
    updated
}

/// Appends new intelligence from `text` in place and reports what was added.
/// Must only be fed counterparty text.
pub fn extract_into(
    intel: &mut ExtractedIntelligence,
    text: &str,
    at: DateTime<Utc>,
) -> ExtractionOutcome {
    let mut outcome = ExtractionOutcome::default();
    if text.trim().is_empty() {
        return outcome;
    }

    for captures in bank_pattern().captures_iter(text) {
        if let Some(digits) = captures.get(1) {
            let value = digits.as_str();
            push_item(intel, &mut outcome, IntelKind::BankAccount, value, bank_confidence(value), at);
        }
    }

    for candidate in handle_pattern().find_iter(text) {
        let value = candidate.as_str();
        if let Some(confidence) = handle_confidence(value) {
            push_item(intel, &mut outcome, IntelKind::PaymentHandle, value, confidence, at);
        }
    }

    for phone in phone_pattern().find_iter(text) {
        let value = phone.as_str();
        let confidence = if value.starts_with('+') {
            PHONE_INTERNATIONAL_CONFIDENCE
        } else {
            PHONE_LOCAL_CONFIDENCE
        };
        push_item(intel, &mut outcome, IntelKind::PhoneNumber, value, confidence, at);
    }

    for link in link_pattern().find_iter(text) {
        push_item(
            intel,
            &mut outcome,
            IntelKind::PhishingLink,
            link.as_str(),
            LINK_CONFIDENCE,
            at,
        );
    }

    let lowered = text.to_lowercase();
    for (_, keywords) in SCAM_PATTERNS.iter() {
        for keyword in keywords.iter() {
            if lowered.contains(keyword) && intel.insert_keyword(keyword) {
                outcome.new_keywords.push((*keyword).to_string());
            }
        }
    }

    outcome
}

fn push_item(
    intel: &mut ExtractedIntelligence,
    outcome: &mut ExtractionOutcome,
    kind: IntelKind,
    value: &str,
    confidence: f64,
    at: DateTime<Utc>,
) {
    if intel.contains(kind, value) {
        return;
    }
    let Ok(item) = IntelligenceItem::new(kind, value, confidence, at) else {
        return;
    };
    if intel.insert(item.clone()) {
        outcome.new_items.push(item);
    }
}

fn bank_confidence(digits: &str) -> f64 {
    if (11..=16).contains(&digits.chars().count()) {
        BANK_TYPICAL_CONFIDENCE
    } else {
        BANK_ATYPICAL_CONFIDENCE
    }
}

/// `None` means the candidate reads as an ordinary email address.
///
/// A payment-provider keyword anywhere in the candidate overrides the email
/// check, which favours recall and will admit some ambiguous handles.
fn handle_confidence(candidate: &str) -> Option<f64> {
    let lowered = candidate.to_lowercase();
    let domain = lowered.split_once('@').map(|(_, domain)| domain).unwrap_or("");

    let looks_like_email =
        domain.contains('.') && EMAIL_PROVIDERS.iter().any(|provider| domain.contains(provider));
    let provider_match = PAYMENT_PROVIDERS.iter().any(|provider| lowered.contains(provider));

    if looks_like_email && !provider_match {
        return None;
    }

    let strong = PAYMENT_PROVIDERS[..STRONG_PROVIDER_COUNT]
        .iter()
        .any(|provider| lowered.contains(provider));
    Some(if strong {
        HANDLE_STRONG_CONFIDENCE
    } else {
        HANDLE_WEAK_CONFIDENCE
    })
}
