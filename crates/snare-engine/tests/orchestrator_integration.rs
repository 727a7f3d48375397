use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use snare_core::{InboundMessage, IntelKind, Persona, Sender, SessionReport, SessionStatus, Stage};
use snare_engine::{
    CallbackState, EngineConfig, Notifier, NotifyError, NotifyReceipt, NullPersistence,
    Orchestrator, Persistence, PersistenceError, ReplyContext, ReplyError, ReplyFailureKind,
    ReplyGenerator, ReplySource, SqlitePersistence,
};
use snare_storage::{IntelStore, StoredSession};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn ts(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 23, 14, 0, 0)
        .single()
        .expect("valid timestamp")
        + Duration::seconds(offset_secs)
}

fn counterparty(session_id: &str, text: &str, offset: i64) -> InboundMessage {
    InboundMessage::from_counterparty(session_id, text, ts(offset))
}

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.reply.timeout_ms = 200;
    config.reply.rate_limit_backoff_ms = 1;
    config.reply.error_backoff_ms = 1;
    config
}

struct EchoGenerator {
    calls: AtomicUsize,
    delay_ms: u64,
}

impl EchoGenerator {
    fn new(delay_ms: u64) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay_ms,
        }
    }
}

#[async_trait]
impl ReplyGenerator for EchoGenerator {
    async fn generate(&self, context: &ReplyContext<'_>) -> Result<String, ReplyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        Ok(format!(
            "Victim: \"reply {} as {}\"",
            context.message_count, context.persona
        ))
    }
}

struct FailingGenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl ReplyGenerator for FailingGenerator {
    async fn generate(&self, _context: &ReplyContext<'_>) -> Result<String, ReplyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ReplyError::new(ReplyFailureKind::RateLimited, "429 from provider"))
    }
}

#[derive(Default)]
struct RecordingNotifier {
    reports: Mutex<Vec<SessionReport>>,
    fail: bool,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, report: &SessionReport) -> Result<NotifyReceipt, NotifyError> {
        self.reports
            .lock()
            .expect("reports lock")
            .push(report.clone());
        if self.fail {
            return Err(NotifyError::Transport("connection refused".to_string()));
        }
        Ok(NotifyReceipt { status: 200 })
    }
}

struct BrokenPersistence;

impl Persistence for BrokenPersistence {
    fn save_session(&self, _session: &StoredSession) -> Result<(), PersistenceError> {
        Err(PersistenceError::Poisoned)
    }

    fn save_message(
        &self,
        _session_id: &str,
        _sender: Sender,
        _text: &str,
        _ts: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        Err(PersistenceError::Poisoned)
    }

    fn save_intelligence_item(
        &self,
        _session_id: &str,
        _item: &snare_core::IntelligenceItem,
    ) -> Result<(), PersistenceError> {
        Err(PersistenceError::Poisoned)
    }

    fn upsert_scammer_profile(
        &self,
        _identifier: &str,
        _kind: IntelKind,
        _session_id: &str,
        _seen_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        Err(PersistenceError::Poisoned)
    }

    fn insert_network_link(
        &self,
        _link: &snare_core::NetworkLink,
    ) -> Result<bool, PersistenceError> {
        Err(PersistenceError::Poisoned)
    }

    fn end_session(
        &self,
        _session: &StoredSession,
        _ended_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        Err(PersistenceError::Poisoned)
    }
}

fn sqlite() -> Arc<SqlitePersistence> {
    Arc::new(SqlitePersistence::new(
        IntelStore::open_in_memory().expect("open db"),
    ))
}

fn orchestrator(
    generator: Option<Arc<dyn ReplyGenerator>>,
    persistence: Arc<dyn Persistence>,
    notifier: Option<Arc<dyn Notifier>>,
) -> Orchestrator {
    Orchestrator::new(fast_config(), generator, persistence, notifier)
}

#[tokio::test]
async fn persona_is_fixed_by_first_message() {
    let engine = orchestrator(None, Arc::new(NullPersistence), None);

    let first = engine
        .process_message(counterparty("s-persona", "You won a prize! Download the app", 0))
        .await;
    assert_eq!(first.persona, Persona::YoungNaive);

    let second = engine
        .process_message(counterparty(
            "s-persona",
            "This is the police, income tax department, arrest warrant",
            1,
        ))
        .await;
    assert_eq!(second.persona, Persona::YoungNaive);
    assert_eq!(second.message_count, 2);
}

#[tokio::test]
async fn generated_reply_is_sanitized_and_recorded() {
    let generator = Arc::new(EchoGenerator::new(0));
    let engine = orchestrator(Some(generator.clone()), Arc::new(NullPersistence), None);

    let outcome = engine
        .process_message(counterparty("s-echo", "URGENT your account is blocked", 0))
        .await;
    assert_eq!(outcome.reply, "reply 1 as WORRIED_PARENT");
    assert_eq!(outcome.provenance.source, ReplySource::Generated);
    assert_eq!(outcome.stage, Stage::Hook);
    assert!(outcome.scam_detected);

    let snapshot = engine.snapshot("s-echo").await.expect("snapshot");
    assert_eq!(snapshot.message_count, 1);
    assert_eq!(snapshot.last_reply.expect("provenance").attempt_count, 1);
    assert!(snapshot
        .agent_notes
        .expect("notes")
        .starts_with("Scam detected with"));
}

#[tokio::test]
async fn generator_failure_falls_back_without_losing_intelligence() {
    let generator = Arc::new(FailingGenerator {
        calls: AtomicUsize::new(0),
    });
    let store = sqlite();
    let engine = orchestrator(Some(generator.clone()), store.clone(), None);

    let outcome = engine
        .process_message(counterparty(
            "s-fail",
            "Pay the fine to rewards@paytm immediately",
            0,
        ))
        .await;

    assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.provenance.source, ReplySource::Fallback);
    assert_eq!(
        outcome.provenance.failure_kind,
        Some(ReplyFailureKind::RateLimited)
    );
    assert!(!outcome.reply.is_empty());
    assert_eq!(outcome.new_intelligence, 1);

    let stored = store
        .with_store(|store| store.intelligence_for_session("s-fail"))
        .expect("intelligence");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].value, "rewards@paytm");
}

#[tokio::test]
async fn link_finalizes_at_message_eight_not_seven() {
    let notifier = Arc::new(RecordingNotifier::default());
    let store = sqlite();
    let engine = orchestrator(None, store.clone(), Some(notifier.clone()));

    let first = engine
        .process_message(counterparty(
            "s-link",
            "Verify your KYC at http://kyc-update.example/login",
            0,
        ))
        .await;
    assert!(!first.finalized_now);

    for index in 2..=7 {
        let outcome = engine
            .process_message(counterparty("s-link", "hello?", index))
            .await;
        assert!(!outcome.finalized_now, "finalized early at {index}");
    }

    let eighth = engine
        .process_message(counterparty("s-link", "are you there", 8))
        .await;
    assert!(eighth.finalized_now);
    assert_eq!(eighth.message_count, 8);

    let reports = notifier.reports.lock().expect("reports lock").clone();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].total_messages_exchanged, 8);
    assert_eq!(
        reports[0].extracted_intelligence.phishing_links,
        vec!["http://kyc-update.example/login".to_string()]
    );

    let snapshot = engine.snapshot("s-link").await.expect("snapshot");
    assert_eq!(snapshot.status, SessionStatus::Completed);
    assert_eq!(snapshot.callback, CallbackState::Delivered { status: 200 });
    assert!(snapshot.callback_sent);

    let session = store
        .with_store(|store| store.session("s-link"))
        .expect("query")
        .expect("session row");
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.message_count, 8);
}

#[tokio::test]
async fn hard_limit_finalizes_at_fifteen() {
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = orchestrator(None, Arc::new(NullPersistence), Some(notifier.clone()));

    for index in 1..=14 {
        let outcome = engine
            .process_message(counterparty("s-chat", "hello?", index))
            .await;
        assert!(!outcome.finalized_now);
    }
    let last = engine
        .process_message(counterparty("s-chat", "hello?", 15))
        .await;
    assert!(last.finalized_now);
    assert_eq!(notifier.reports.lock().expect("reports lock").len(), 1);
}

#[tokio::test]
async fn finalization_runs_once_and_links_every_pair() {
    let notifier = Arc::new(RecordingNotifier::default());
    let store = sqlite();
    let engine = orchestrator(None, store.clone(), Some(notifier.clone()));

    engine
        .process_message(counterparty(
            "s-pairs",
            "Send to 123456789012 or fraud@ybl, details at https://pay.example",
            0,
        ))
        .await;
    for index in 2..=8 {
        engine
            .process_message(counterparty("s-pairs", "ok", index))
            .await;
    }
    let after = engine
        .process_message(counterparty("s-pairs", "ok", 9))
        .await;
    assert!(!after.finalized_now);
    assert_eq!(engine.finalize_session("s-pairs").await, Some(false));
    assert_eq!(engine.finalize_session("missing").await, None);
    assert_eq!(notifier.reports.lock().expect("reports lock").len(), 1);

    let links = store
        .with_store(|store| store.network_links_for_session("s-pairs"))
        .expect("links");
    let pairs: BTreeSet<(String, String)> = links
        .into_iter()
        .map(|link| (link.source, link.target))
        .collect();
    let expected: BTreeSet<(String, String)> = [
        ("123456789012", "fraud@ybl"),
        ("123456789012", "https://pay.example"),
        ("fraud@ybl", "https://pay.example"),
    ]
    .into_iter()
    .map(|(left, right)| (left.to_string(), right.to_string()))
    .collect();
    assert_eq!(pairs, expected);
}

#[tokio::test]
async fn profile_counts_each_session_once() {
    let db = tempfile::NamedTempFile::new().expect("temp db");
    let store = Arc::new(SqlitePersistence::new(
        IntelStore::open(db.path()).expect("open db"),
    ));
    let engine = orchestrator(None, store.clone(), None);

    for session in ["p-1", "p-2", "p-3"] {
        engine
            .process_message(counterparty(session, "pay to scam@paytm", 0))
            .await;
        engine
            .process_message(counterparty(session, "again scam@paytm", 1))
            .await;
        assert_eq!(engine.finalize_session(session).await, Some(true));
    }

    let profile = store
        .with_store(|store| store.scammer_profile("scam@paytm"))
        .expect("query")
        .expect("profile");
    assert_eq!(profile.session_count, 3);
    assert_eq!(profile.identifier_kind, IntelKind::PaymentHandle);

    let reopened = IntelStore::open(db.path()).expect("reopen db");
    let stats = reopened.dashboard_stats().expect("stats");
    assert_eq!(stats.total_sessions, 3);
    assert_eq!(stats.active_sessions, 0);
    assert_eq!(stats.total_scammers, 1);
}

#[tokio::test]
async fn system_messages_are_not_mined() {
    let engine = orchestrator(None, Arc::new(NullPersistence), None);
    let mut inbound = counterparty("s-system", "my upi is mine@okaxis", 0);
    inbound.sender = Sender::System;

    let outcome = engine.process_message(inbound).await;
    assert_eq!(outcome.new_intelligence, 0);
    let snapshot = engine.snapshot("s-system").await.expect("snapshot");
    assert_eq!(snapshot.intelligence_count, 0);
}

#[tokio::test]
async fn confidence_only_rises() {
    let engine = orchestrator(None, Arc::new(NullPersistence), None);
    let first = engine
        .process_message(counterparty(
            "s-conf",
            "URGENT: your bank account is blocked, verify now",
            0,
        ))
        .await;
    let second = engine
        .process_message(counterparty("s-conf", "hello", 1))
        .await;
    assert!(first.scam_confidence > 0.0);
    assert_eq!(second.scam_confidence, first.scam_confidence);
    assert!(second.scam_detected);
}

#[tokio::test]
async fn bookkeeping_failures_are_recorded_not_raised() {
    let notifier = Arc::new(RecordingNotifier {
        reports: Mutex::new(Vec::new()),
        fail: true,
    });
    let engine = orchestrator(None, Arc::new(BrokenPersistence), Some(notifier));

    let outcome = engine
        .process_message(counterparty("s-broken", "pay to fine@ybl", 0))
        .await;
    assert!(!outcome.reply.is_empty());
    assert_eq!(engine.finalize_session("s-broken").await, Some(true));

    let snapshot = engine.snapshot("s-broken").await.expect("snapshot");
    assert!(snapshot
        .bookkeeping_errors
        .iter()
        .any(|entry| entry.starts_with("save_message")));
    assert!(matches!(snapshot.callback, CallbackState::Failed { .. }));
    assert_eq!(snapshot.intelligence_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sessions_run_in_parallel_and_serialize_internally() {
    let generator = Arc::new(EchoGenerator::new(5));
    let engine = Arc::new(orchestrator(
        Some(generator.clone()),
        Arc::new(NullPersistence),
        None,
    ));

    let mut tasks = Vec::new();
    for session in 0..4 {
        for message in 0..6 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                let session_id = format!("c-{session}");
                let outcome = engine
                    .process_message(counterparty(&session_id, "hello?", message))
                    .await;
                (session_id, outcome.message_count)
            }));
        }
    }

    let mut counts: Vec<(String, u32)> = Vec::new();
    for task in tasks {
        counts.push(task.await.expect("join"));
    }

    for session in 0..4 {
        let session_id = format!("c-{session}");
        let mut seen: Vec<u32> = counts
            .iter()
            .filter(|(id, _)| id == &session_id)
            .map(|(_, count)| *count)
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6]);

        let snapshot = engine.snapshot(&session_id).await.expect("snapshot");
        assert_eq!(snapshot.message_count, 6);
    }
    assert_eq!(engine.registry().len().await, 4);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 24);
}
