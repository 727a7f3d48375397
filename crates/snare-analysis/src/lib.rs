//! Stateless analysis over counterparty text: intent scoring, intelligence
//! extraction, script-stage classification and persona selection.

pub mod extraction;
pub mod persona;
pub mod scoring;
pub mod stage;

pub use extraction::{extract, extract_into, ExtractionOutcome};
pub use persona::select_persona;
pub use scoring::{score, ScamAssessment};
pub use stage::classify_stage;

/// Keyword tables per scam category. A keyword may appear in more than one category.
pub const SCAM_PATTERNS: [(&str, &[&str]); 6] = [
    (
        "urgency",
        &["immediately", "urgent", "now", "today", "expire", "limited time"],
    ),
    (
        "financial",
        &[
            "bank", "account", "upi", "payment", "transfer", "verify", "suspend", "block",
        ],
    ),
    (
        "threats",
        &["blocked", "suspended", "legal action", "arrest", "penalty", "fine"],
    ),
    (
        "requests",
        &["share", "send", "provide", "click", "download", "install", "update"],
    ),
    (
        "impersonation",
        &["bank", "government", "police", "income tax", "customs", "rbi"],
    ),
    (
        "reward",
        &["won", "prize", "lottery", "reward", "cashback", "free", "offer"],
    ),
];

pub(crate) fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}
