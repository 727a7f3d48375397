use crate::session::Session;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snare_core::{
    ExtractedIntelligence, IntelKind, ReportedIntelligence, SessionReport,
};
use thiserror::Error;

const DEFAULT_BASE_NOTES: &str = "Scam detected and intelligence extracted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizationPolicy {
    /// Finalize unconditionally at this many inbound messages.
    pub hard_message_limit: u32,
    /// Earliest message count at which gathered intelligence can finalize.
    pub intel_message_floor: u32,
    pub min_phone_numbers: usize,
    pub require_scam_detection: bool,
}

impl Default for FinalizationPolicy {
    fn default() -> Self {
        Self {
            hard_message_limit: 15,
            intel_message_floor: 8,
            min_phone_numbers: 2,
            require_scam_detection: false,
        }
    }
}

impl FinalizationPolicy {
    pub fn should_finalize(
        &self,
        message_count: u32,
        intel: &ExtractedIntelligence,
        scam_detected: bool,
    ) -> bool {
        if self.require_scam_detection && !scam_detected {
            return false;
        }
        if message_count >= self.hard_message_limit {
            return true;
        }
        message_count >= self.intel_message_floor && self.has_critical_intel(intel)
    }

    fn has_critical_intel(&self, intel: &ExtractedIntelligence) -> bool {
        !intel.bank_accounts.is_empty()
            || !intel.upi_ids.is_empty()
            || !intel.phishing_links.is_empty()
            || intel.phone_numbers.len() >= self.min_phone_numbers
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CallbackState {
    NotAttempted,
    Delivered { status: u16 },
    Failed { error: String },
}

impl Default for CallbackState {
    fn default() -> Self {
        Self::NotAttempted
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyReceipt {
    pub status: u16,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("callback transport failed: {0}")]
    Transport(String),
    #[error("callback rejected with status {status}")]
    Rejected { status: u16 },
    #[error("callback payload serialization failed: {0}")]
    Serialization(String),
}

/// Sink for the one-shot finalization summary.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, report: &SessionReport) -> Result<NotifyReceipt, NotifyError>;
}

/// Distinct identifier values in kind order, first occurrence wins the kind.
pub fn distinct_identifiers(intel: &ExtractedIntelligence) -> Vec<(String, IntelKind)> {
    let mut seen: Vec<(String, IntelKind)> = Vec::new();
    for item in intel.iter_items() {
        if !seen.iter().any(|(value, _)| value == &item.value) {
            seen.push((item.value.clone(), item.kind));
        }
    }
    seen
}

/// Every unordered pair of distinct identifier values.
pub fn identifier_pairs(intel: &ExtractedIntelligence) -> Vec<(String, String)> {
    let values = distinct_identifiers(intel);
    let mut pairs = Vec::new();
    for (index, (left, _)) in values.iter().enumerate() {
        for (right, _) in values.iter().skip(index + 1) {
            pairs.push((left.clone(), right.clone()));
        }
    }
    pairs
}

pub fn summary_notes(session: &Session) -> String {
    let intel = &session.intelligence;
    format!(
        "{}. Persona: {}. Final Stage: {}. Extracted intel: {} banks, {} UPIs, {} phones, {} links.",
        session.agent_notes.as_deref().unwrap_or(DEFAULT_BASE_NOTES),
        session.persona_or_default(),
        session.stage,
        intel.count(IntelKind::BankAccount),
        intel.count(IntelKind::PaymentHandle),
        intel.count(IntelKind::PhoneNumber),
        intel.count(IntelKind::PhishingLink),
    )
}

pub fn build_report(session: &Session, max_keywords: usize) -> SessionReport {
    SessionReport {
        session_id: session.session_id.clone(),
        scam_detected: session.scam_detected,
        total_messages_exchanged: session.message_count,
        extracted_intelligence: ReportedIntelligence::from_extracted(
            &session.intelligence,
            max_keywords,
        ),
        agent_notes: summary_notes(session),
    }
}
