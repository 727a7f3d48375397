use crate::finalize::CallbackState;
use crate::reply::ReplyProvenance;
use chrono::{DateTime, Utc};
use serde::Serialize;
use snare_analysis::ScamAssessment;
use snare_core::{
    ChannelMetadata, ConversationTurn, ExtractedIntelligence, Persona, Sender, SessionStatus,
    Stage,
};
use snare_storage::StoredSession;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// Mutable per-conversation state. Only touched while its handle's lock is held.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub history: Vec<ConversationTurn>,
    /// Inbound messages processed; replies are not counted.
    pub message_count: u32,
    pub stage: Stage,
    pub persona: Option<Persona>,
    pub initial_tags: Vec<String>,
    pub scam_detected: bool,
    pub scam_confidence: f64,
    pub intelligence: ExtractedIntelligence,
    pub agent_notes: Option<String>,
    pub metadata: Option<ChannelMetadata>,
    pub status: SessionStatus,
    pub finalized_at: Option<DateTime<Utc>>,
    pub callback: CallbackState,
    pub last_reply: Option<ReplyProvenance>,
    pub bookkeeping_errors: Vec<String>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            created_at: now,
            last_activity: now,
            history: Vec::new(),
            message_count: 0,
            stage: Stage::default(),
            persona: None,
            initial_tags: Vec::new(),
            scam_detected: false,
            scam_confidence: 0.0,
            intelligence: ExtractedIntelligence::default(),
            agent_notes: None,
            metadata: None,
            status: SessionStatus::Active,
            finalized_at: None,
            callback: CallbackState::NotAttempted,
            last_reply: None,
            bookkeeping_errors: Vec::new(),
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized_at.is_some()
    }

    pub fn record_inbound(
        &mut self,
        sender: Sender,
        text: &str,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        self.history.push(ConversationTurn {
            sender,
            text: text.to_string(),
            timestamp,
        });
        self.message_count += 1;
        self.last_activity = now;
    }

    pub fn record_reply(&mut self, text: &str, now: DateTime<Utc>, provenance: ReplyProvenance) {
        self.history.push(ConversationTurn {
            sender: Sender::System,
            text: text.to_string(),
            timestamp: now,
        });
        self.last_reply = Some(provenance);
        self.last_activity = now;
    }

    /// Applies the first message's assessment. The persona is only ever set here.
    pub fn apply_initial_assessment(&mut self, assessment: &ScamAssessment, persona: Persona) {
        self.initial_tags = assessment.tags.clone();
        if self.persona.is_none() {
            self.persona = Some(persona);
        }
        self.escalate(assessment);
        if assessment.is_scam {
            self.agent_notes = Some(format!(
                "Scam detected with {:.2} confidence. Patterns: {}",
                assessment.confidence,
                assessment.tags.join(", ")
            ));
        }
    }

    /// Merges a later assessment. Detection is sticky and confidence never drops.
    pub fn escalate(&mut self, assessment: &ScamAssessment) {
        self.scam_detected = self.scam_detected || assessment.is_scam;
        if assessment.confidence > self.scam_confidence {
            self.scam_confidence = assessment.confidence;
        }
    }

    pub fn persona_or_default(&self) -> Persona {
        self.persona.unwrap_or_default()
    }

    pub fn to_stored(&self) -> StoredSession {
        StoredSession {
            session_id: self.session_id.clone(),
            started_at: self.created_at,
            ended_at: self.finalized_at,
            persona: self.persona,
            final_stage: Some(self.stage),
            message_count: self.message_count,
            scam_detected: self.scam_detected,
            scam_confidence: self.scam_confidence,
            agent_notes: self.agent_notes.clone(),
            status: self.status,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            message_count: self.message_count,
            stage: self.stage,
            persona: self.persona,
            scam_detected: self.scam_detected,
            scam_confidence: self.scam_confidence,
            status: self.status,
            callback_sent: matches!(self.callback, CallbackState::Delivered { .. }),
            callback: self.callback.clone(),
            intelligence_count: self.intelligence.total_items(),
            intelligence: self.intelligence.clone(),
            agent_notes: self.agent_notes.clone(),
            last_reply: self.last_reply.clone(),
            bookkeeping_errors: self.bookkeeping_errors.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: u32,
    pub stage: Stage,
    pub persona: Option<Persona>,
    pub scam_detected: bool,
    pub scam_confidence: f64,
    pub status: SessionStatus,
    pub callback_sent: bool,
    pub callback: CallbackState,
    pub intelligence_count: usize,
    pub intelligence: ExtractedIntelligence,
    pub agent_notes: Option<String>,
    pub last_reply: Option<ReplyProvenance>,
    pub bookkeeping_errors: Vec<String>,
}

pub type SessionHandle = Arc<Mutex<Session>>;

/// Maps session ids to their lock-guarded state. The map lock is only held
/// for lookups and insertion, never across session work.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle and whether this call created it.
    pub async fn get_or_create(&self, session_id: &str, now: DateTime<Utc>) -> (SessionHandle, bool) {
        if let Some(handle) = self.sessions.read().await.get(session_id) {
            return (handle.clone(), false);
        }

        let mut sessions = self.sessions.write().await;
        if let Some(handle) = sessions.get(session_id) {
            return (handle.clone(), false);
        }
        let handle = Arc::new(Mutex::new(Session::new(session_id, now)));
        sessions.insert(session_id.to_string(), handle.clone());
        info!(event = "session_created", session_id = %session_id);
        (handle, true)
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        let handle = self.get(session_id).await?;
        let session = handle.lock().await;
        Some(session.snapshot())
    }

    /// Snapshots of every session, oldest first. Waits for in-flight messages.
    pub async fn snapshots(&self) -> Vec<SessionSnapshot> {
        let handles: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(handles.len());
        for handle in handles {
            snapshots.push(handle.lock().await.snapshot());
        }
        snapshots.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.session_id.cmp(&right.session_id))
        });
        snapshots
    }

    /// Drops sessions idle since before `cutoff`. Sessions that are locked or
    /// whose handle is held elsewhere are kept.
    pub async fn evict_idle(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let mut sessions = self.sessions.write().await;
        let mut evicted = Vec::new();
        sessions.retain(|session_id, handle| {
            if Arc::strong_count(handle) > 1 {
                return true;
            }
            let idle = match handle.try_lock() {
                Ok(session) => session.last_activity < cutoff,
                Err(_) => false,
            };
            if idle {
                evicted.push(session_id.clone());
            }
            !idle
        });
        if !evicted.is_empty() {
            info!(event = "sessions_evicted", count = evicted.len());
        }
        evicted
    }
}
