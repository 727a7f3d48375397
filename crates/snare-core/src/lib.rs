use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod intel_contracts;

pub use intel_contracts::{
    ExtractedIntelligence, IntelContractError, IntelKind, IntelligenceItem, LinkType,
    NetworkLink, ReportedIntelligence, ScammerProfile, SessionReport, ThreatLevel,
};

/// Which side of the conversation authored a turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Sender {
    #[serde(rename = "scammer", alias = "counterparty")]
    Counterparty,
    #[serde(rename = "user", alias = "system")]
    System,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::Counterparty => "scammer",
            Sender::System => "user",
        }
    }

    pub fn is_counterparty(&self) -> bool {
        matches!(self, Sender::Counterparty)
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sender {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "scammer" | "counterparty" => Ok(Sender::Counterparty),
            "user" | "system" | "agent" | "honeypot" => Ok(Sender::System),
            other => Err(format!("Unknown sender: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Cosmetic channel framing supplied by the transport. Never used for decisions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMetadata {
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_locale")]
    pub locale: String,
}

impl Default for ChannelMetadata {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            language: default_language(),
            locale: default_locale(),
        }
    }
}

fn default_channel() -> String {
    "SMS".to_string()
}

fn default_language() -> String {
    "English".to_string()
}

fn default_locale() -> String {
    "IN".to_string()
}

/// What a transport layer hands the engine for one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub session_id: String,
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<ChannelMetadata>,
}

impl InboundMessage {
    pub fn from_counterparty(
        session_id: impl Into<String>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            sender: Sender::Counterparty,
            text: text.into(),
            timestamp,
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Hook,
    TrustBuilding,
    PaymentAsk,
    CredentialRequest,
    LinkDrop,
    Closing,
    Exploratory,
}

impl Default for Stage {
    fn default() -> Self {
        Self::Exploratory
    }
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Hook => "HOOK",
            Stage::TrustBuilding => "TRUST_BUILDING",
            Stage::PaymentAsk => "PAYMENT_ASK",
            Stage::CredentialRequest => "CREDENTIAL_REQUEST",
            Stage::LinkDrop => "LINK_DROP",
            Stage::Closing => "CLOSING",
            Stage::Exploratory => "EXPLORATORY",
        }
    }

    /// Engagement strategy handed to the reply generator for this stage.
    pub fn strategy(&self) -> &'static str {
        match self {
            Stage::Hook => "Express panic and confusion. Ask what's wrong with your account.",
            Stage::TrustBuilding => {
                "Pretend to believe them but ask for verification. Ask for their ID or department."
            }
            Stage::PaymentAsk => {
                "Act willing to pay but ask WHERE and HOW to send money. Request account/UPI details."
            }
            Stage::CredentialRequest => {
                "Show hesitation about sharing details. Ask if it's safe and why they need it."
            }
            Stage::LinkDrop => "Say you're not tech-savvy. Ask what the link does before clicking.",
            Stage::Closing => {
                "Act ready to complete but need one final confirmation of payment details."
            }
            Stage::Exploratory => "Continue conversation naturally, ask clarifying questions.",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_uppercase().replace('-', "_");
        match normalized.as_str() {
            "HOOK" => Ok(Stage::Hook),
            "TRUST_BUILDING" => Ok(Stage::TrustBuilding),
            "PAYMENT_ASK" => Ok(Stage::PaymentAsk),
            "CREDENTIAL_REQUEST" => Ok(Stage::CredentialRequest),
            "LINK_DROP" => Ok(Stage::LinkDrop),
            "CLOSING" => Ok(Stage::Closing),
            "EXPLORATORY" => Ok(Stage::Exploratory),
            other => Err(format!("Unknown stage: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Persona {
    YoungNaive,
    ElderlyConfused,
    ExcitedSkeptical,
    WorriedParent,
}

impl Default for Persona {
    fn default() -> Self {
        Self::WorriedParent
    }
}

impl Persona {
    pub fn as_str(&self) -> &'static str {
        match self {
            Persona::YoungNaive => "YOUNG_NAIVE",
            Persona::ElderlyConfused => "ELDERLY_CONFUSED",
            Persona::ExcitedSkeptical => "EXCITED_SKEPTICAL",
            Persona::WorriedParent => "WORRIED_PARENT",
        }
    }

    /// Behavioral profile used to condition the reply generator.
    pub fn profile(&self) -> &'static str {
        match self {
            Persona::YoungNaive => {
                "You're a 20-something person who's not great with technology. You use casual \
                 language like 'omg', 'pls', 'idk'. You're easily confused by official-sounding things."
            }
            Persona::ElderlyConfused => {
                "You're 65+ years old, very worried about official matters and your pension/savings. \
                 You speak formally and politely. You're easily scared by authority figures and government."
            }
            Persona::ExcitedSkeptical => {
                "You're excited about potentially winning something but also cautious. You ask how \
                 to claim prizes and need reassurance that it's legitimate."
            }
            Persona::WorriedParent => {
                "You're a middle-aged working person with family responsibilities. You're concerned \
                 about your family's financial security and want to solve problems quickly to protect \
                 your savings."
            }
        }
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Persona {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_uppercase().replace('-', "_");
        match normalized.as_str() {
            "YOUNG_NAIVE" => Ok(Persona::YoungNaive),
            "ELDERLY_CONFUSED" => Ok(Persona::ElderlyConfused),
            "EXCITED_SKEPTICAL" => Ok(Persona::ExcitedSkeptical),
            "WORRIED_PARENT" => Ok(Persona::WorriedParent),
            other => Err(format!("Unknown persona: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "active" => Ok(SessionStatus::Active),
            "completed" | "ended" => Ok(SessionStatus::Completed),
            other => Err(format!("Unknown session status: {other}")),
        }
    }
}
