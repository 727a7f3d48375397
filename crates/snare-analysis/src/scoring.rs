use crate::SCAM_PATTERNS;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const KEYWORD_BPS: u32 = 1_500;
const LONG_DIGIT_RUN_BPS: u32 = 2_000;
const LINK_BPS: u32 = 2_500;
const EMAIL_BPS: u32 = 1_500;
const SCAM_THRESHOLD_BPS: u32 = 3_000;
const FULL_CONFIDENCE_BPS: u32 = 10_000;

pub const TAG_PHONE_NUMBER: &str = "phone_number_present";
pub const TAG_LINK: &str = "link_present";
pub const TAG_EMAIL: &str = "email_present";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScamAssessment {
    pub is_scam: bool,
    pub confidence: f64,
    pub tags: Vec<String>,
    /// Unclamped sum of increments, in basis points.
    pub raw_score_bps: u32,
}

fn long_digit_run() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d{10,}").expect("valid regex"))
}

fn link_prefix() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"https?://").expect("valid regex"))
}

fn email_like() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}").expect("valid regex")
    })
}

/// Scores text for scam intent. Pure: identical text always yields an identical assessment.
pub fn score(text: &str) -> ScamAssessment {
    let lowered = text.to_lowercase();
    let mut tags = Vec::new();
    let mut raw = 0u32;

    for (category, keywords) in SCAM_PATTERNS.iter() {
        for keyword in keywords.iter() {
            if lowered.contains(keyword) {
                tags.push(format!("{category}:{keyword}"));
                raw += KEYWORD_BPS;
            }
        }
    }

    if long_digit_run().is_match(text) {
        raw += LONG_DIGIT_RUN_BPS;
        tags.push(TAG_PHONE_NUMBER.to_string());
    }
    if link_prefix().is_match(text) {
        raw += LINK_BPS;
        tags.push(TAG_LINK.to_string());
    }
    if email_like().is_match(text) {
        raw += EMAIL_BPS;
        tags.push(TAG_EMAIL.to_string());
    }

    ScamAssessment {
        is_scam: raw >= SCAM_THRESHOLD_BPS,
        confidence: f64::from(raw.min(FULL_CONFIDENCE_BPS)) / f64::from(FULL_CONFIDENCE_BPS),
        tags,
        raw_score_bps: raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn benign_text_scores_zero() {
        let assessment = score("hello, how was the cricket match?");
        assert!(!assessment.is_scam);
        assert_eq!(assessment.confidence, 0.0);
        assert!(assessment.tags.is_empty());
    }

    #[test]
    fn two_keywords_reach_threshold_exactly() {
        let assessment = score("URGENT: police");
        assert_eq!(assessment.raw_score_bps, 3_000);
        assert!(assessment.is_scam);
        assert_eq!(assessment.tags, vec!["urgency:urgent", "impersonation:police"]);
    }

    #[test]
    fn single_keyword_is_not_scam() {
        let assessment = score("a free sample");
        assert_eq!(assessment.tags, vec!["reward:free"]);
        assert!(!assessment.is_scam);
        assert!((assessment.confidence - 0.15).abs() < f64::EPSILON);
    }

    #[test]
    fn shared_keywords_tag_every_category() {
        let assessment = score("your bank");
        assert_eq!(assessment.tags, vec!["financial:bank", "impersonation:bank"]);
        assert!(assessment.is_scam);
    }

    #[test]
    fn heuristics_add_tags_and_weight() {
        let assessment = score("call 9876543210 or visit https://x.io or mail a@b.co");
        assert!(assessment.tags.contains(&TAG_PHONE_NUMBER.to_string()));
        assert!(assessment.tags.contains(&TAG_LINK.to_string()));
        assert!(assessment.tags.contains(&TAG_EMAIL.to_string()));
        assert!(assessment.raw_score_bps >= 6_000);
    }

    #[test]
    fn confidence_clamps_after_threshold_check() {
        let text = "URGENT your bank account is blocked and suspended, police arrest today, \
                    send payment now to claim your prize https://pay.example";
        let assessment = score(text);
        assert!(assessment.raw_score_bps > 10_000);
        assert_eq!(assessment.confidence, 1.0);
        assert!(assessment.is_scam);
    }

    #[test]
    fn scoring_is_deterministic() {
        let text = "Your account will be suspended today. Verify at http://bank.example";
        assert_eq!(score(text), score(text));
        for input in ["", "   ", "\u{1F600} emoji only", "0000000000000000000000"] {
            let assessment = score(input);
            assert!((0.0..=1.0).contains(&assessment.confidence));
            assert_eq!(assessment, score(input));
        }
    }
}
