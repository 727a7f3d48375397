use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_REPORT_KEYWORD_LIMIT: usize = 20;

#[derive(Debug, Error)]
pub enum IntelContractError {
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("confidence out of range for {field}: {value}")]
    InvalidConfidence { field: &'static str, value: f64 },
    #[error("intelligence value cannot be empty")]
    EmptyValue,
    #[error("network link endpoints must differ: {value}")]
    SelfLink { value: String },
}

/// Category of an extracted identifier. String forms match the storage kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IntelKind {
    #[serde(rename = "bank_account")]
    BankAccount,
    #[serde(rename = "upi_id")]
    PaymentHandle,
    #[serde(rename = "phone")]
    PhoneNumber,
    #[serde(rename = "link")]
    PhishingLink,
}

impl IntelKind {
    pub const ALL: [IntelKind; 4] = [
        IntelKind::BankAccount,
        IntelKind::PaymentHandle,
        IntelKind::PhoneNumber,
        IntelKind::PhishingLink,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntelKind::BankAccount => "bank_account",
            IntelKind::PaymentHandle => "upi_id",
            IntelKind::PhoneNumber => "phone",
            IntelKind::PhishingLink => "link",
        }
    }

    pub fn extraction_method(&self) -> &'static str {
        match self {
            IntelKind::BankAccount => "regex_bank",
            IntelKind::PaymentHandle => "regex_upi",
            IntelKind::PhoneNumber => "regex_phone",
            IntelKind::PhishingLink => "regex_url",
        }
    }

    pub fn is_payment_identifier(&self) -> bool {
        matches!(self, IntelKind::BankAccount | IntelKind::PaymentHandle)
    }
}

impl fmt::Display for IntelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntelKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "bank_account" | "bank-account" => Ok(IntelKind::BankAccount),
            "upi_id" | "upi" | "payment_handle" | "payment-handle" => Ok(IntelKind::PaymentHandle),
            "phone" | "phone_number" | "phone-number" => Ok(IntelKind::PhoneNumber),
            "link" | "phishing_link" | "phishing-link" | "url" => Ok(IntelKind::PhishingLink),
            other => Err(format!("Unknown intelligence kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntelligenceItem {
    pub kind: IntelKind,
    pub value: String,
    pub confidence: f64,
    pub extraction_method: String,
    pub extracted_at: DateTime<Utc>,
}

impl IntelligenceItem {
    pub fn new(
        kind: IntelKind,
        value: impl Into<String>,
        confidence: f64,
        extracted_at: DateTime<Utc>,
    ) -> Result<Self, IntelContractError> {
        let value = value.into();
        if value.is_empty() {
            return Err(IntelContractError::EmptyValue);
        }
        validate_confidence("intelligence_item.confidence", confidence)?;
        Ok(Self {
            kind,
            value,
            confidence,
            extraction_method: kind.extraction_method().to_string(),
            extracted_at,
        })
    }
}

pub fn validate_confidence(field: &'static str, value: f64) -> Result<(), IntelContractError> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(IntelContractError::InvalidConfidence { field, value });
    }
    Ok(())
}

/// Per-session intelligence set. Items are unique by (kind, exact value).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedIntelligence {
    #[serde(default)]
    pub bank_accounts: Vec<IntelligenceItem>,
    #[serde(default)]
    pub upi_ids: Vec<IntelligenceItem>,
    #[serde(default)]
    pub phone_numbers: Vec<IntelligenceItem>,
    #[serde(default)]
    pub phishing_links: Vec<IntelligenceItem>,
    #[serde(default)]
    pub suspicious_keywords: Vec<String>,
}

impl ExtractedIntelligence {
    pub fn items(&self, kind: IntelKind) -> &[IntelligenceItem] {
        match kind {
            IntelKind::BankAccount => &self.bank_accounts,
            IntelKind::PaymentHandle => &self.upi_ids,
            IntelKind::PhoneNumber => &self.phone_numbers,
            IntelKind::PhishingLink => &self.phishing_links,
        }
    }

    fn items_mut(&mut self, kind: IntelKind) -> &mut Vec<IntelligenceItem> {
        match kind {
            IntelKind::BankAccount => &mut self.bank_accounts,
            IntelKind::PaymentHandle => &mut self.upi_ids,
            IntelKind::PhoneNumber => &mut self.phone_numbers,
            IntelKind::PhishingLink => &mut self.phishing_links,
        }
    }

    pub fn contains(&self, kind: IntelKind, value: &str) -> bool {
        self.items(kind).iter().any(|item| item.value == value)
    }

    /// Returns false when an item with the same kind and value is already held.
    pub fn insert(&mut self, item: IntelligenceItem) -> bool {
        if self.contains(item.kind, &item.value) {
            return false;
        }
        self.items_mut(item.kind).push(item);
        true
    }

    pub fn insert_keyword(&mut self, keyword: &str) -> bool {
        if self.suspicious_keywords.iter().any(|existing| existing == keyword) {
            return false;
        }
        self.suspicious_keywords.push(keyword.to_string());
        true
    }

    pub fn count(&self, kind: IntelKind) -> usize {
        self.items(kind).len()
    }

    pub fn total_items(&self) -> usize {
        IntelKind::ALL.iter().map(|kind| self.count(*kind)).sum()
    }

    pub fn has_payment_identifier(&self) -> bool {
        !self.bank_accounts.is_empty() || !self.upi_ids.is_empty()
    }

    /// All items in kind order: bank accounts, payment handles, phones, links.
    pub fn iter_items(&self) -> impl Iterator<Item = &IntelligenceItem> {
        self.bank_accounts
            .iter()
            .chain(self.upi_ids.iter())
            .chain(self.phone_numbers.iter())
            .chain(self.phishing_links.iter())
    }

    pub fn values(&self, kind: IntelKind) -> Vec<String> {
        self.items(kind).iter().map(|item| item.value.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    Medium,
    High,
    Critical,
}

impl Default for ThreatLevel {
    fn default() -> Self {
        Self::Medium
    }
}

impl ThreatLevel {
    pub fn from_session_count(session_count: u32) -> Self {
        match session_count {
            0 | 1 => ThreatLevel::Medium,
            2..=4 => ThreatLevel::High,
            _ => ThreatLevel::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Medium => "medium",
            ThreatLevel::High => "high",
            ThreatLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreatLevel {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "medium" => Ok(ThreatLevel::Medium),
            "high" => Ok(ThreatLevel::High),
            "critical" => Ok(ThreatLevel::Critical),
            other => Err(format!("Unknown threat level: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScammerProfile {
    pub identifier: String,
    pub identifier_kind: IntelKind,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub session_count: u32,
    pub threat_level: ThreatLevel,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    SameSession,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::SameSession => "same_session",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkType {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim() {
            "same_session" => Ok(LinkType::SameSession),
            other => Err(format!("Unknown link type: {other}")),
        }
    }
}

/// Undirected: endpoints are stored in lexical order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkLink {
    pub source: String,
    pub target: String,
    pub link_type: LinkType,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

impl NetworkLink {
    pub fn same_session(
        source: impl Into<String>,
        target: impl Into<String>,
        session_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, IntelContractError> {
        let (source, target) = {
            let (left, right) = (source.into(), target.into());
            if left <= right {
                (left, right)
            } else {
                (right, left)
            }
        };
        if source.is_empty() || target.is_empty() {
            return Err(IntelContractError::EmptyValue);
        }
        if source == target {
            return Err(IntelContractError::SelfLink { value: source });
        }
        Ok(Self {
            source,
            target,
            link_type: LinkType::SameSession,
            session_id: session_id.into(),
            created_at,
        })
    }
}

/// Identifier lists as reported in the finalization summary, confidence dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReportedIntelligence {
    pub bank_accounts: Vec<String>,
    pub upi_ids: Vec<String>,
    pub phishing_links: Vec<String>,
    pub phone_numbers: Vec<String>,
    pub suspicious_keywords: Vec<String>,
}

impl ReportedIntelligence {
    pub fn from_extracted(intel: &ExtractedIntelligence, max_keywords: usize) -> Self {
        Self {
            bank_accounts: intel.values(IntelKind::BankAccount),
            upi_ids: intel.values(IntelKind::PaymentHandle),
            phishing_links: intel.values(IntelKind::PhishingLink),
            phone_numbers: intel.values(IntelKind::PhoneNumber),
            suspicious_keywords: intel
                .suspicious_keywords
                .iter()
                .take(max_keywords)
                .cloned()
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session_id: String,
    pub scam_detected: bool,
    pub total_messages_exchanged: u32,
    pub extracted_intelligence: ReportedIntelligence,
    pub agent_notes: String,
}

impl SessionReport {
    pub fn to_json(&self) -> Result<String, IntelContractError> {
        serde_json::to_string(self).map_err(|err| IntelContractError::Serialization(err.to_string()))
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

/// Keeps the first and last four characters of long identifiers for log output.
pub fn mask_identifier(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(chars.len() - 8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 23, 14, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn item(kind: IntelKind, value: &str, confidence: f64) -> IntelligenceItem {
        IntelligenceItem::new(kind, value, confidence, ts()).expect("valid item")
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let err = IntelligenceItem::new(IntelKind::BankAccount, "123456789012", 1.2, ts())
            .expect_err("confidence should be rejected");
        assert!(matches!(err, IntelContractError::InvalidConfidence { .. }));
        assert!(IntelligenceItem::new(IntelKind::BankAccount, "", 0.5, ts()).is_err());
    }

    #[test]
    fn insert_suppresses_exact_duplicates_only() {
        let mut intel = ExtractedIntelligence::default();
        assert!(intel.insert(item(IntelKind::PhoneNumber, "+919876543210", 0.9)));
        assert!(!intel.insert(item(IntelKind::PhoneNumber, "+919876543210", 0.7)));
        assert!(intel.insert(item(IntelKind::PhoneNumber, "919876543210", 0.7)));
        assert_eq!(intel.count(IntelKind::PhoneNumber), 2);
        assert_eq!(intel.phone_numbers[0].confidence, 0.9);
    }

    #[test]
    fn same_value_under_different_kinds_is_distinct() {
        let mut intel = ExtractedIntelligence::default();
        assert!(intel.insert(item(IntelKind::BankAccount, "9876543210", 0.6)));
        assert!(intel.insert(item(IntelKind::PhoneNumber, "9876543210", 0.7)));
        assert_eq!(intel.total_items(), 2);
        assert!(intel.has_payment_identifier());
    }

    #[test]
    fn threat_level_tracks_session_count() {
        assert_eq!(ThreatLevel::from_session_count(1), ThreatLevel::Medium);
        assert_eq!(ThreatLevel::from_session_count(2), ThreatLevel::High);
        assert_eq!(ThreatLevel::from_session_count(4), ThreatLevel::High);
        assert_eq!(ThreatLevel::from_session_count(5), ThreatLevel::Critical);
    }

    #[test]
    fn network_link_orders_endpoints() {
        let link = NetworkLink::same_session("zeta@ybl", "1234567890123", "s-1", ts())
            .expect("valid link");
        assert_eq!(link.source, "1234567890123");
        assert_eq!(link.target, "zeta@ybl");
        assert_eq!(link.link_type, LinkType::SameSession);
    }

    #[test]
    fn network_link_rejects_self_pairs() {
        let err = NetworkLink::same_session("a@paytm", "a@paytm", "s-1", ts())
            .expect_err("self link rejected");
        assert!(matches!(err, IntelContractError::SelfLink { .. }));
    }

    #[test]
    fn report_serializes_camel_case_and_caps_keywords() {
        let mut intel = ExtractedIntelligence::default();
        intel.insert(item(IntelKind::PaymentHandle, "rewards@paytm", 0.95));
        for index in 0..25 {
            intel.insert_keyword(&format!("kw{index}"));
        }

        let report = SessionReport {
            session_id: "s-1".to_string(),
            scam_detected: true,
            total_messages_exchanged: 8,
            extracted_intelligence: ReportedIntelligence::from_extracted(
                &intel,
                DEFAULT_REPORT_KEYWORD_LIMIT,
            ),
            agent_notes: "notes".to_string(),
        };
        let json: serde_json::Value =
            serde_json::from_str(&report.to_json().expect("json")).expect("parse");

        assert_eq!(json["sessionId"], "s-1");
        assert_eq!(json["totalMessagesExchanged"], 8);
        assert_eq!(json["extractedIntelligence"]["upiIds"][0], "rewards@paytm");
        assert_eq!(
            json["extractedIntelligence"]["suspiciousKeywords"]
                .as_array()
                .expect("keywords")
                .len(),
            20
        );
    }

    #[test]
    fn mask_identifier_keeps_edges() {
        assert_eq!(mask_identifier("1234567890123456"), "1234********3456");
        assert_eq!(mask_identifier("short"), "*****");
    }
}
