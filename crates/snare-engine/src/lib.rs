pub mod finalize;
pub mod orchestrator;
pub mod persistence;
pub mod reply;
pub mod session;

pub use finalize::{CallbackState, FinalizationPolicy, Notifier, NotifyError, NotifyReceipt};
pub use orchestrator::{Orchestrator, ProcessOutcome};
pub use persistence::{NullPersistence, Persistence, PersistenceError, SqlitePersistence};
pub use reply::{
    ReplyContext, ReplyError, ReplyFailureKind, ReplyGenerator, ReplyPolicy, ReplyProvenance,
    ReplySource, TypingDelay,
};
pub use session::{Session, SessionHandle, SessionRegistry, SessionSnapshot};

use snare_core::intel_contracts::DEFAULT_REPORT_KEYWORD_LIMIT;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub finalization: FinalizationPolicy,
    pub reply: ReplyPolicy,
    /// Disabled when `None`.
    pub typing_delay: Option<TypingDelay>,
    pub max_report_keywords: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            finalization: FinalizationPolicy::default(),
            reply: ReplyPolicy::default(),
            typing_delay: None,
            max_report_keywords: DEFAULT_REPORT_KEYWORD_LIMIT,
        }
    }
}
