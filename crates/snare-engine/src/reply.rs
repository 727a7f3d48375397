use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use snare_core::{ChannelMetadata, ConversationTurn, ExtractedIntelligence, Persona, Stage};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const ROLE_PREFIXES: [&str; 10] = [
    "Victim:",
    "victim:",
    "Reply:",
    "reply:",
    "Response:",
    "response:",
    "User:",
    "user:",
    "Here's my response:",
    "Here is my response:",
];

const EARLY_PHASE_MAX: u32 = 2;
const MID_PHASE_MAX: u32 = 5;

const EARLY_REPLIES: [&str; 4] = [
    "What?? My account has a problem? Why is this hapening to me?",
    "Oh no I'm so worried now. Who am I speaking with please?",
    "I don't understand sir, what is wrong with my account?",
    "This is very scary for me. Please explain what happened?",
];
const MID_NEED_PAYMENT: [&str; 4] = [
    "Ok I want to fix this. Where should I send the payment sir?",
    "Please tell me the account number or UPI to send money?",
    "I have money ready. What are the payment detials?",
    "How do I pay? Give me your paytm or bank account please.",
];
const MID_NEED_PHONE: [&str; 3] = [
    "Can you give me a number to call back? I'm very worried.",
    "Should I call you on some number? Please share contact.",
    "What number should I reach you at if there is any problem?",
];
const MID_NEED_LINK: [&str; 3] = [
    "Is there a website where I can verify this? Please send link.",
    "Can you send me the official link to check my account?",
    "Which website should I go to? I don't know technology well.",
];
const MID_COMPLETE: [&str; 2] = [
    "Ok I understand now. What is the next step please?",
    "I will do as you say. Please tell me the procedure.",
];
const LATE_CONFIRM_PAYMENT: [&str; 3] = [
    "Just to confirm, I send the money to the same number you said?",
    "Ok I am ready to pay. Please confirm the account details again?",
    "I'm at the bank now. Please repeat the account number once more?",
];
const LATE_NEED_PAYMENT: [&str; 3] = [
    "I want to resolve this today itself. Tell me payment method please?",
    "I have arranged the money. Where exactly should I send it?",
    "I'm ready to cooperate fully. Please give me the details to pay.",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplyFailureKind {
    Timeout,
    RateLimited,
    Provider,
    InvalidOutput,
}

impl ReplyFailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Provider => "provider",
            Self::InvalidOutput => "invalid_output",
        }
    }

    fn is_retryable(self) -> bool {
        !matches!(self, Self::InvalidOutput)
    }
}

impl fmt::Display for ReplyFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("reply generator error ({kind}): {message}")]
pub struct ReplyError {
    pub kind: ReplyFailureKind,
    pub message: String,
}

impl ReplyError {
    pub fn new(kind: ReplyFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Read-only view of the session handed to a reply generator.
#[derive(Debug, Clone, Copy)]
pub struct ReplyContext<'a> {
    pub session_id: &'a str,
    pub persona: Persona,
    pub stage: Stage,
    pub message_count: u32,
    pub history: &'a [ConversationTurn],
    pub latest_message: &'a str,
    pub intelligence: &'a ExtractedIntelligence,
    pub metadata: Option<&'a ChannelMetadata>,
}

impl ReplyContext<'_> {
    /// Intelligence still worth eliciting, in prompt order.
    pub fn missing_intelligence(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.intelligence.has_payment_identifier() {
            missing.push("payment details (bank/UPI)");
        }
        if self.intelligence.phone_numbers.is_empty() {
            missing.push("phone number");
        }
        if self.intelligence.phishing_links.is_empty() {
            missing.push("website link");
        }
        missing
    }
}

/// Produces a short in-character reply. Implementations must not retry internally.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, context: &ReplyContext<'_>) -> Result<String, ReplyError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyPolicy {
    pub timeout_ms: u64,
    pub max_retries: u8,
    pub rate_limit_backoff_ms: u64,
    pub error_backoff_ms: u64,
    pub max_reply_chars: usize,
}

impl Default for ReplyPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            max_retries: 1,
            rate_limit_backoff_ms: 2_000,
            error_backoff_ms: 1_000,
            max_reply_chars: 200,
        }
    }
}

impl ReplyPolicy {
    fn backoff_for(&self, kind: ReplyFailureKind) -> Duration {
        match kind {
            ReplyFailureKind::RateLimited => Duration::from_millis(self.rate_limit_backoff_ms),
            _ => Duration::from_millis(self.error_backoff_ms),
        }
    }
}

/// Simulated typing pause: `min(base + per_char * chars, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingDelay {
    pub base_ms: u64,
    pub per_char_ms: u64,
    pub max_ms: u64,
}

impl Default for TypingDelay {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            per_char_ms: 30,
            max_ms: 3_000,
        }
    }
}

impl TypingDelay {
    pub fn for_reply(&self, reply: &str) -> Duration {
        let chars = reply.chars().count() as u64;
        let total = self
            .base_ms
            .saturating_add(self.per_char_ms.saturating_mul(chars));
        Duration::from_millis(total.min(self.max_ms))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Generated,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplyProvenance {
    pub source: ReplySource,
    pub attempt_count: u8,
    pub failure_kind: Option<ReplyFailureKind>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedReply {
    pub text: String,
    pub provenance: ReplyProvenance,
}

/// Runs the generator under the policy's timeout and retry budget, degrading
/// to the deterministic fallback. Never fails.
pub async fn produce_reply(
    generator: Option<&dyn ReplyGenerator>,
    context: &ReplyContext<'_>,
    policy: &ReplyPolicy,
) -> ProducedReply {
    let Some(generator) = generator else {
        return ProducedReply {
            text: fallback_reply(context).to_string(),
            provenance: ReplyProvenance {
                source: ReplySource::Fallback,
                attempt_count: 0,
                failure_kind: None,
                fallback_reason: Some("generator not configured".to_string()),
            },
        };
    };

    let max_attempts = policy.max_retries.saturating_add(1);
    let timeout = Duration::from_millis(policy.timeout_ms);
    let mut last_error: Option<ReplyError> = None;
    let mut attempts = 0u8;

    while attempts < max_attempts {
        attempts += 1;
        let result = match tokio::time::timeout(timeout, generator.generate(context)).await {
            Ok(result) => result,
            Err(_) => Err(ReplyError::new(
                ReplyFailureKind::Timeout,
                format!("no reply within {}ms", policy.timeout_ms),
            )),
        };

        let error = match result {
            Ok(raw) => {
                let text = sanitize_reply(&raw, policy.max_reply_chars);
                if !text.is_empty() {
                    debug!(
                        event = "reply_generated",
                        session_id = %context.session_id,
                        attempt = attempts,
                        chars = text.chars().count()
                    );
                    return ProducedReply {
                        text,
                        provenance: ReplyProvenance {
                            source: ReplySource::Generated,
                            attempt_count: attempts,
                            failure_kind: None,
                            fallback_reason: None,
                        },
                    };
                }
                ReplyError::new(ReplyFailureKind::InvalidOutput, "reply empty after sanitizing")
            }
            Err(err) => err,
        };

        warn!(
            event = "reply_attempt_failed",
            session_id = %context.session_id,
            attempt = attempts,
            kind = %error.kind,
            error = %error.message
        );

        let retry = error.kind.is_retryable() && attempts < max_attempts;
        let backoff = policy.backoff_for(error.kind);
        last_error = Some(error);
        if !retry {
            break;
        }
        tokio::time::sleep(backoff).await;
    }

    ProducedReply {
        text: fallback_reply(context).to_string(),
        provenance: ReplyProvenance {
            source: ReplySource::Fallback,
            attempt_count: attempts,
            failure_kind: last_error.as_ref().map(|err| err.kind),
            fallback_reason: last_error.map(|err| err.message),
        },
    }
}

/// Picks a canned reply from the conversation phase and missing intelligence.
/// The same session id and message count always select the same variant.
pub fn fallback_reply(context: &ReplyContext<'_>) -> &'static str {
    let intel = context.intelligence;
    let group: &[&'static str] = if context.message_count <= EARLY_PHASE_MAX {
        &EARLY_REPLIES
    } else if context.message_count <= MID_PHASE_MAX {
        if !intel.has_payment_identifier() {
            &MID_NEED_PAYMENT
        } else if intel.phone_numbers.is_empty() {
            &MID_NEED_PHONE
        } else if intel.phishing_links.is_empty() {
            &MID_NEED_LINK
        } else {
            &MID_COMPLETE
        }
    } else if intel.has_payment_identifier() {
        &LATE_CONFIRM_PAYMENT
    } else {
        &LATE_NEED_PAYMENT
    };

    let digest = Sha256::digest(format!("{}:{}", context.session_id, context.message_count));
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let index = (u64::from_be_bytes(prefix) % group.len() as u64) as usize;
    group[index]
}

/// Strips role prefixes, wrapping quotes and markdown emphasis, then caps the
/// length, preferring to cut at a sentence end in the back half.
pub fn sanitize_reply(raw: &str, max_chars: usize) -> String {
    let mut reply = raw.trim().to_string();
    for prefix in ROLE_PREFIXES {
        if let Some(rest) = reply.strip_prefix(prefix) {
            reply = rest.trim().to_string();
        }
    }

    let reply = reply
        .trim_matches('"')
        .trim_matches('\'')
        .trim()
        .replace('*', "");

    let chars: Vec<char> = reply.chars().collect();
    if chars.len() <= max_chars {
        return reply.trim().to_string();
    }

    let window = &chars[..max_chars];
    let floor = max_chars / 2;
    let cut = last_position(window, '.')
        .filter(|index| *index > floor)
        .or_else(|| last_position(window, '?').filter(|index| *index > floor));
    let kept: String = match cut {
        Some(index) => chars[..=index].iter().collect(),
        None => window.iter().collect(),
    };
    kept.trim().to_string()
}

fn last_position(chars: &[char], needle: char) -> Option<usize> {
    chars.iter().rposition(|ch| *ch == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use snare_core::{IntelKind, IntelligenceItem};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn intel_with(kinds: &[(IntelKind, &str)]) -> ExtractedIntelligence {
        let at = Utc
            .with_ymd_and_hms(2026, 2, 23, 14, 0, 0)
            .single()
            .expect("valid timestamp");
        let mut intel = ExtractedIntelligence::default();
        for (kind, value) in kinds {
            intel.insert(IntelligenceItem::new(*kind, *value, 0.9, at).expect("valid item"));
        }
        intel
    }

    fn context<'a>(count: u32, intel: &'a ExtractedIntelligence) -> ReplyContext<'a> {
        ReplyContext {
            session_id: "session-1",
            persona: Persona::WorriedParent,
            stage: Stage::Exploratory,
            message_count: count,
            history: &[],
            latest_message: "hello",
            intelligence: intel,
            metadata: None,
        }
    }

    fn fast_policy() -> ReplyPolicy {
        ReplyPolicy {
            timeout_ms: 50,
            rate_limit_backoff_ms: 1,
            error_backoff_ms: 1,
            ..ReplyPolicy::default()
        }
    }

    struct Scripted {
        results: Mutex<Vec<Result<String, ReplyError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(results: Vec<Result<String, ReplyError>>) -> Self {
            Self {
                results: Mutex::new(results),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ReplyGenerator for Scripted {
        async fn generate(&self, _context: &ReplyContext<'_>) -> Result<String, ReplyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut results = self.results.lock().expect("results lock");
            if results.is_empty() {
                return Err(ReplyError::new(ReplyFailureKind::Provider, "exhausted"));
            }
            results.remove(0)
        }
    }

    struct Sleepy;

    #[async_trait]
    impl ReplyGenerator for Sleepy {
        async fn generate(&self, _context: &ReplyContext<'_>) -> Result<String, ReplyError> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok("too late".to_string())
        }
    }

    #[test]
    fn sanitize_strips_prefixes_quotes_and_emphasis() {
        assert_eq!(
            sanitize_reply("Victim: \"Oh no, *what* happened?\"", 200),
            "Oh no, what happened?"
        );
        assert_eq!(
            sanitize_reply("Here's my response: 'Who is this?'", 200),
            "Who is this?"
        );
        assert_eq!(sanitize_reply("  \"\"  ", 200), "");
    }

    #[test]
    fn role_prefix_after_leading_whitespace_is_stripped() {
        assert_eq!(sanitize_reply("  Victim: hi", 200), "hi");
        assert_eq!(sanitize_reply("\nReply: sir what is this", 200), "sir what is this");
    }

    #[test]
    fn sanitize_cuts_at_late_sentence_boundary() {
        let long = format!("{}. {}", "a".repeat(150), "b".repeat(100));
        let cut = sanitize_reply(&long, 200);
        assert_eq!(cut.chars().count(), 151);
        assert!(cut.ends_with('.'));

        let no_boundary = "c".repeat(250);
        assert_eq!(sanitize_reply(&no_boundary, 200).chars().count(), 200);

        let early_period = format!("Hi. {}", "d".repeat(250));
        assert_eq!(sanitize_reply(&early_period, 200).chars().count(), 200);
    }

    #[test]
    fn fallback_groups_follow_phase_and_missing_intel() {
        let empty = ExtractedIntelligence::default();
        assert!(EARLY_REPLIES.contains(&fallback_reply(&context(1, &empty))));
        assert!(MID_NEED_PAYMENT.contains(&fallback_reply(&context(4, &empty))));
        assert!(LATE_NEED_PAYMENT.contains(&fallback_reply(&context(9, &empty))));

        let paid = intel_with(&[(IntelKind::PaymentHandle, "a@paytm")]);
        assert!(MID_NEED_PHONE.contains(&fallback_reply(&context(3, &paid))));
        assert!(LATE_CONFIRM_PAYMENT.contains(&fallback_reply(&context(6, &paid))));

        let most = intel_with(&[
            (IntelKind::BankAccount, "123456789012"),
            (IntelKind::PhoneNumber, "9876543210"),
        ]);
        assert!(MID_NEED_LINK.contains(&fallback_reply(&context(5, &most))));

        let all = intel_with(&[
            (IntelKind::BankAccount, "123456789012"),
            (IntelKind::PhoneNumber, "9876543210"),
            (IntelKind::PhishingLink, "http://x.example"),
        ]);
        assert!(MID_COMPLETE.contains(&fallback_reply(&context(5, &all))));
    }

    #[test]
    fn fallback_is_deterministic() {
        let empty = ExtractedIntelligence::default();
        for count in 1..12 {
            assert_eq!(
                fallback_reply(&context(count, &empty)),
                fallback_reply(&context(count, &empty))
            );
        }
    }

    #[test]
    fn typing_delay_is_capped() {
        let delay = TypingDelay::default();
        assert_eq!(delay.for_reply("hi"), Duration::from_millis(1_060));
        assert_eq!(delay.for_reply(&"x".repeat(200)), Duration::from_millis(3_000));
    }

    #[tokio::test]
    async fn generated_reply_is_sanitized() {
        let intel = ExtractedIntelligence::default();
        let generator = Scripted::new(vec![Ok("Reply: *Who* is calling?".to_string())]);
        let produced = produce_reply(Some(&generator), &context(1, &intel), &fast_policy()).await;
        assert_eq!(produced.text, "Who is calling?");
        assert_eq!(produced.provenance.source, ReplySource::Generated);
        assert_eq!(produced.provenance.attempt_count, 1);
    }

    #[tokio::test]
    async fn rate_limit_is_retried_once() {
        let intel = ExtractedIntelligence::default();
        let generator = Scripted::new(vec![
            Err(ReplyError::new(ReplyFailureKind::RateLimited, "429")),
            Ok("ok which account?".to_string()),
        ]);
        let produced = produce_reply(Some(&generator), &context(3, &intel), &fast_policy()).await;
        assert_eq!(produced.text, "ok which account?");
        assert_eq!(produced.provenance.attempt_count, 2);
    }

    #[tokio::test]
    async fn exhausted_retries_fall_back() {
        let intel = ExtractedIntelligence::default();
        let generator = Scripted::new(vec![
            Err(ReplyError::new(ReplyFailureKind::Provider, "500")),
            Err(ReplyError::new(ReplyFailureKind::Provider, "502")),
            Ok("never reached".to_string()),
        ]);
        let produced = produce_reply(Some(&generator), &context(1, &intel), &fast_policy()).await;
        assert!(EARLY_REPLIES.contains(&produced.text.as_str()));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
        assert_eq!(produced.provenance.source, ReplySource::Fallback);
        assert_eq!(produced.provenance.failure_kind, Some(ReplyFailureKind::Provider));
        assert_eq!(produced.provenance.fallback_reason.as_deref(), Some("502"));
    }

    #[tokio::test]
    async fn empty_output_falls_back_without_retry() {
        let intel = ExtractedIntelligence::default();
        let generator = Scripted::new(vec![Ok("\"**\"".to_string()), Ok("unused".to_string())]);
        let produced = produce_reply(Some(&generator), &context(1, &intel), &fast_policy()).await;
        assert_eq!(produced.provenance.source, ReplySource::Fallback);
        assert_eq!(
            produced.provenance.failure_kind,
            Some(ReplyFailureKind::InvalidOutput)
        );
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_generator_times_out() {
        let intel = ExtractedIntelligence::default();
        let policy = ReplyPolicy {
            max_retries: 0,
            ..fast_policy()
        };
        let produced = produce_reply(Some(&Sleepy), &context(1, &intel), &policy).await;
        assert_eq!(produced.provenance.failure_kind, Some(ReplyFailureKind::Timeout));
        assert_eq!(produced.provenance.attempt_count, 1);
    }

    #[tokio::test]
    async fn missing_generator_uses_fallback() {
        let intel = ExtractedIntelligence::default();
        let produced = produce_reply(None, &context(7, &intel), &fast_policy()).await;
        assert!(LATE_NEED_PAYMENT.contains(&produced.text.as_str()));
        assert_eq!(produced.provenance.attempt_count, 0);
    }
}
