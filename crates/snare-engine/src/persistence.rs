use chrono::{DateTime, Utc};
use snare_core::{IntelKind, IntelligenceItem, NetworkLink, Sender};
use snare_storage::{IntelStore, StorageError, StoredSession};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("store lock poisoned")]
    Poisoned,
}

/// Record sink used by the orchestrator. Failures are logged by the caller
/// and never abort message processing.
pub trait Persistence: Send + Sync {
    fn save_session(&self, session: &StoredSession) -> Result<(), PersistenceError>;
    fn save_message(
        &self,
        session_id: &str,
        sender: Sender,
        text: &str,
        ts: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;
    fn save_intelligence_item(
        &self,
        session_id: &str,
        item: &IntelligenceItem,
    ) -> Result<(), PersistenceError>;
    fn upsert_scammer_profile(
        &self,
        identifier: &str,
        kind: IntelKind,
        session_id: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;
    /// Returns false when the link already existed.
    fn insert_network_link(&self, link: &NetworkLink) -> Result<bool, PersistenceError>;
    fn end_session(
        &self,
        session: &StoredSession,
        ended_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;
}

/// Discards every write.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPersistence;

impl Persistence for NullPersistence {
    fn save_session(&self, _session: &StoredSession) -> Result<(), PersistenceError> {
        Ok(())
    }

    fn save_message(
        &self,
        _session_id: &str,
        _sender: Sender,
        _text: &str,
        _ts: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        Ok(())
    }

    fn save_intelligence_item(
        &self,
        _session_id: &str,
        _item: &IntelligenceItem,
    ) -> Result<(), PersistenceError> {
        Ok(())
    }

    fn upsert_scammer_profile(
        &self,
        _identifier: &str,
        _kind: IntelKind,
        _session_id: &str,
        _seen_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        Ok(())
    }

    fn insert_network_link(&self, _link: &NetworkLink) -> Result<bool, PersistenceError> {
        Ok(false)
    }

    fn end_session(
        &self,
        _session: &StoredSession,
        _ended_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// SQLite persistence behind a mutex; the connection is not shareable across threads.
pub struct SqlitePersistence {
    store: Mutex<IntelStore>,
}

impl SqlitePersistence {
    pub fn new(store: IntelStore) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    /// Runs a read or write against the store under its lock.
    pub fn with_store<T>(
        &self,
        action: impl FnOnce(&IntelStore) -> Result<T, StorageError>,
    ) -> Result<T, PersistenceError> {
        let store = self.store.lock().map_err(|_| PersistenceError::Poisoned)?;
        Ok(action(&store)?)
    }
}

impl Persistence for SqlitePersistence {
    fn save_session(&self, session: &StoredSession) -> Result<(), PersistenceError> {
        self.with_store(|store| store.save_session(session))
    }

    fn save_message(
        &self,
        session_id: &str,
        sender: Sender,
        text: &str,
        ts: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        self.with_store(|store| store.insert_message(session_id, sender, text, ts).map(|_| ()))
    }

    fn save_intelligence_item(
        &self,
        session_id: &str,
        item: &IntelligenceItem,
    ) -> Result<(), PersistenceError> {
        self.with_store(|store| store.insert_intelligence(session_id, item).map(|_| ()))
    }

    fn upsert_scammer_profile(
        &self,
        identifier: &str,
        kind: IntelKind,
        session_id: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        self.with_store(|store| {
            store
                .upsert_scammer_profile(identifier, kind, session_id, seen_at)
                .map(|_| ())
        })
    }

    fn insert_network_link(&self, link: &NetworkLink) -> Result<bool, PersistenceError> {
        self.with_store(|store| store.insert_network_link(link))
    }

    fn end_session(
        &self,
        session: &StoredSession,
        ended_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        self.with_store(|store| store.end_session(session, ended_at))
    }
}
