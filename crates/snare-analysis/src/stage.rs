use crate::contains_any;
use snare_core::{ExtractedIntelligence, Stage};

const HOOK_WINDOW: u32 = 2;
const TRUST_WINDOW: u32 = 4;

const ALARM_CUES: [&str; 7] = [
    "urgent",
    "blocked",
    "suspended",
    "expired",
    "alert",
    "warning",
    "attention",
];
const AUTHORITY_CUES: [&str; 8] = [
    "bank",
    "government",
    "police",
    "officer",
    "department",
    "official",
    "rbi",
    "income tax",
];
const PAYMENT_CUES: [&str; 10] = [
    "pay", "send", "transfer", "amount", "fee", "penalty", "fine", "deposit", "rupees", "rs",
];
const CREDENTIAL_CUES: [&str; 9] = [
    "share",
    "provide",
    "enter",
    "otp",
    "password",
    "cvv",
    "pin",
    "card number",
    "details",
];
const LINK_CUES: [&str; 4] = ["http", "link", ".com", "click"];

/// Classifies the counterparty's script stage from the current message alone.
///
/// `message_count` is the session count including this message. The previous
/// stage is deliberately not an input; every message is reclassified fresh.
pub fn classify_stage(message_count: u32, text: &str, intel: &ExtractedIntelligence) -> Stage {
    if text.trim().is_empty() {
        return Stage::Exploratory;
    }
    let lowered = text.to_lowercase();

    if message_count <= HOOK_WINDOW && contains_any(&lowered, &ALARM_CUES) {
        return Stage::Hook;
    }
    if message_count <= TRUST_WINDOW && contains_any(&lowered, &AUTHORITY_CUES) {
        return Stage::TrustBuilding;
    }
    if contains_any(&lowered, &PAYMENT_CUES) {
        return Stage::PaymentAsk;
    }
    if contains_any(&lowered, &CREDENTIAL_CUES) {
        return Stage::CredentialRequest;
    }
    if contains_any(&lowered, &LINK_CUES) {
        return Stage::LinkDrop;
    }
    if intel.has_payment_identifier() {
        return Stage::Closing;
    }
    Stage::Exploratory
}
