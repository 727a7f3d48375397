use crate::finalize::{build_report, distinct_identifiers, identifier_pairs, CallbackState, Notifier};
use crate::persistence::{Persistence, PersistenceError};
use crate::reply::{produce_reply, ReplyContext, ReplyGenerator, ReplyProvenance};
use crate::session::{Session, SessionRegistry, SessionSnapshot};
use crate::EngineConfig;
use chrono::{DateTime, Utc};
use snare_analysis::{classify_stage, extract_into, score, select_persona};
use snare_core::intel_contracts::mask_identifier;
use snare_core::{InboundMessage, IntelKind, NetworkLink, Persona, SessionStatus, Stage};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub reply: String,
    pub provenance: ReplyProvenance,
    pub message_count: u32,
    pub stage: Stage,
    pub persona: Persona,
    pub scam_detected: bool,
    pub scam_confidence: f64,
    pub new_intelligence: usize,
    pub finalized_now: bool,
}

/// Drives one session's pipeline per inbound message: score, extract,
/// classify, reply, then finalize once enough evidence is in.
pub struct Orchestrator {
    config: EngineConfig,
    registry: Arc<SessionRegistry>,
    generator: Option<Arc<dyn ReplyGenerator>>,
    persistence: Arc<dyn Persistence>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        generator: Option<Arc<dyn ReplyGenerator>>,
        persistence: Arc<dyn Persistence>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            generator,
            persistence,
            notifier,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    pub async fn snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.registry.snapshot(session_id).await
    }

    /// Processes one inbound message to completion and returns the reply.
    ///
    /// The session lock is held for the whole pipeline, including the reply
    /// call. Collaborator failures are recorded on the session, never returned.
    pub async fn process_message(&self, inbound: InboundMessage) -> ProcessOutcome {
        let now = Utc::now();
        let (handle, _) = self.registry.get_or_create(&inbound.session_id, now).await;
        let mut session = handle.lock().await;

        session.record_inbound(inbound.sender, &inbound.text, inbound.timestamp, now);
        if inbound.metadata.is_some() {
            session.metadata = inbound.metadata.clone();
        }
        let message_count = session.message_count;

        if message_count == 1 {
            let assessment = score(&inbound.text);
            let persona = select_persona(&assessment.tags);
            session.apply_initial_assessment(&assessment, persona);
            info!(
                event = "session_assessed",
                session_id = %session.session_id,
                scam_detected = assessment.is_scam,
                confidence = assessment.confidence,
                persona = %persona,
                tags = assessment.tags.len()
            );
        } else if inbound.sender.is_counterparty() {
            let assessment = score(&inbound.text);
            session.escalate(&assessment);
        }

        let stored = session.to_stored();
        let result = self.persistence.save_session(&stored);
        record_bookkeeping(&mut session, "save_session", result);
        let result = self.persistence.save_message(
            &inbound.session_id,
            inbound.sender,
            &inbound.text,
            inbound.timestamp,
        );
        record_bookkeeping(&mut session, "save_message", result);

        let mut new_intelligence = 0;
        if inbound.sender.is_counterparty() {
            let outcome = extract_into(&mut session.intelligence, &inbound.text, now);
            new_intelligence = outcome.new_items.len();
            for item in &outcome.new_items {
                debug!(
                    event = "intelligence_extracted",
                    session_id = %session.session_id,
                    kind = %item.kind,
                    value = %masked_value(item.kind, &item.value),
                    confidence = item.confidence
                );
                let result = self
                    .persistence
                    .save_intelligence_item(&inbound.session_id, item);
                record_bookkeeping(&mut session, "save_intelligence_item", result);
            }
        }

        session.stage = classify_stage(message_count, &inbound.text, &session.intelligence);

        let produced = {
            let context = ReplyContext {
                session_id: &session.session_id,
                persona: session.persona_or_default(),
                stage: session.stage,
                message_count,
                history: &session.history,
                latest_message: &inbound.text,
                intelligence: &session.intelligence,
                metadata: session.metadata.as_ref(),
            };
            produce_reply(self.generator.as_deref(), &context, &self.config.reply).await
        };

        if let Some(delay) = self.config.typing_delay {
            tokio::time::sleep(delay.for_reply(&produced.text)).await;
        }

        let replied_at = Utc::now();
        session.record_reply(&produced.text, replied_at, produced.provenance.clone());
        let result = self.persistence.save_message(
            &inbound.session_id,
            snare_core::Sender::System,
            &produced.text,
            replied_at,
        );
        record_bookkeeping(&mut session, "save_message", result);

        let mut finalized_now = false;
        if !session.is_finalized()
            && self.config.finalization.should_finalize(
                message_count,
                &session.intelligence,
                session.scam_detected,
            )
        {
            self.finalize(&mut session, replied_at).await;
            finalized_now = true;
        } else {
            let stored = session.to_stored();
            let result = self.persistence.save_session(&stored);
            record_bookkeeping(&mut session, "save_session", result);
        }

        info!(
            event = "message_processed",
            session_id = %session.session_id,
            message_count,
            stage = %session.stage,
            reply_source = ?produced.provenance.source,
            new_intelligence,
            finalized_now
        );

        ProcessOutcome {
            reply: produced.text,
            provenance: produced.provenance,
            message_count,
            stage: session.stage,
            persona: session.persona_or_default(),
            scam_detected: session.scam_detected,
            scam_confidence: session.scam_confidence,
            new_intelligence,
            finalized_now,
        }
    }

    /// Finalizes a known session now, regardless of thresholds.
    /// Returns `None` for unknown ids and `Some(false)` when already finalized.
    pub async fn finalize_session(&self, session_id: &str) -> Option<bool> {
        let handle = self.registry.get(session_id).await?;
        let mut session = handle.lock().await;
        if session.is_finalized() {
            return Some(false);
        }
        self.finalize(&mut session, Utc::now()).await;
        Some(true)
    }

    async fn finalize(&self, session: &mut Session, now: DateTime<Utc>) {
        session.finalized_at = Some(now);
        session.status = SessionStatus::Completed;

        let report = build_report(session, self.config.max_report_keywords);
        session.callback = match &self.notifier {
            Some(notifier) => match notifier.notify(&report).await {
                Ok(receipt) => {
                    info!(
                        event = "callback_delivered",
                        session_id = %session.session_id,
                        status = receipt.status
                    );
                    CallbackState::Delivered {
                        status: receipt.status,
                    }
                }
                Err(err) => {
                    warn!(
                        event = "callback_failed",
                        session_id = %session.session_id,
                        error = %err
                    );
                    CallbackState::Failed {
                        error: err.to_string(),
                    }
                }
            },
            None => {
                debug!(event = "callback_skipped", session_id = %session.session_id);
                CallbackState::NotAttempted
            }
        };

        let mut links_written = 0;
        for (left, right) in identifier_pairs(&session.intelligence) {
            let link = match NetworkLink::same_session(left, right, session.session_id.clone(), now)
            {
                Ok(link) => link,
                Err(err) => {
                    warn!(event = "network_link_invalid", session_id = %session.session_id, error = %err);
                    continue;
                }
            };
            let result = self.persistence.insert_network_link(&link);
            if let Some(true) = record_bookkeeping(session, "insert_network_link", result) {
                links_written += 1;
            }
        }

        let identifiers = distinct_identifiers(&session.intelligence);
        for (value, kind) in &identifiers {
            let result =
                self.persistence
                    .upsert_scammer_profile(value, *kind, &session.session_id, now);
            record_bookkeeping(session, "upsert_scammer_profile", result);
        }

        let stored = session.to_stored();
        let result = self.persistence.end_session(&stored, now);
        record_bookkeeping(session, "end_session", result);

        info!(
            event = "session_finalized",
            session_id = %session.session_id,
            message_count = session.message_count,
            identifiers = identifiers.len(),
            links_written,
            callback = ?session.callback
        );
    }
}

fn record_bookkeeping<T>(
    session: &mut Session,
    operation: &'static str,
    result: Result<T, PersistenceError>,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(
                event = "bookkeeping_failed",
                session_id = %session.session_id,
                operation,
                error = %err
            );
            session.bookkeeping_errors.push(format!("{operation}: {err}"));
            None
        }
    }
}

fn masked_value(kind: IntelKind, value: &str) -> String {
    match kind {
        IntelKind::BankAccount => mask_identifier(value),
        _ => value.to_string(),
    }
}
