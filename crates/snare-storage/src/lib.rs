use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use snare_core::{
    IntelKind, IntelligenceItem, LinkType, NetworkLink, Persona, ScammerProfile, Sender,
    SessionStatus, Stage, ThreatLevel,
};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

pub const INTEL_SCHEMA_VERSION: i64 = 2;
const RECENT_SESSION_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub persona: Option<Persona>,
    pub final_stage: Option<Stage>,
    pub message_count: u32,
    pub scam_detected: bool,
    pub scam_confidence: f64,
    pub agent_notes: Option<String>,
    pub status: SessionStatus,
}

impl StoredSession {
    pub fn new(session_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            started_at,
            ended_at: None,
            persona: None,
            final_stage: None,
            message_count: 0,
            scam_detected: false,
            scam_confidence: 0.0,
            agent_notes: None,
            status: SessionStatus::Active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub session_id: String,
    pub sender: Sender,
    pub text: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEdge {
    pub source: String,
    pub target: String,
    pub link_type: LinkType,
    pub session_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkGraph {
    pub nodes: Vec<ScammerProfile>,
    pub edges: Vec<NetworkEdge>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_sessions: u64,
    pub active_sessions: u64,
    pub total_scammers: u64,
    pub total_intelligence: u64,
    pub total_messages: u64,
    pub intelligence_by_kind: BTreeMap<String, u64>,
    pub recent_sessions: Vec<StoredSession>,
}

/// SQLite-backed intelligence store shared across sessions.
pub struct IntelStore {
    conn: Connection,
}

impl IntelStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let mut current = self.schema_version()?;
        if current > INTEL_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: INTEL_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_intel_schema.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
            current = 1;
        }

        if current < 2 {
            let sql = include_str!("../migrations/0002_profile_sessions.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 2", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    /// Inserts or refreshes the session row. `started_at` is kept from the first write.
    pub fn save_session(&self, session: &StoredSession) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO sessions (
                session_id,
                started_at,
                ended_at,
                persona,
                final_stage,
                message_count,
                scam_detected,
                scam_confidence,
                agent_notes,
                status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(session_id) DO UPDATE SET
                ended_at = excluded.ended_at,
                persona = COALESCE(excluded.persona, sessions.persona),
                final_stage = excluded.final_stage,
                message_count = excluded.message_count,
                scam_detected = excluded.scam_detected,
                scam_confidence = excluded.scam_confidence,
                agent_notes = COALESCE(excluded.agent_notes, sessions.agent_notes),
                status = excluded.status
            ",
            params![
                session.session_id,
                session.started_at.to_rfc3339(),
                session.ended_at.map(|ts| ts.to_rfc3339()),
                session.persona.map(|persona| persona.as_str()),
                session.final_stage.map(|stage| stage.as_str()),
                i64::from(session.message_count),
                bool_to_i64(session.scam_detected),
                session.scam_confidence,
                session.agent_notes,
                session.status.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Marks the session completed, recording its final state.
    pub fn end_session(
        &self,
        session: &StoredSession,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut ended = session.clone();
        ended.ended_at = Some(ended_at);
        ended.status = SessionStatus::Completed;
        self.save_session(&ended)
    }

    pub fn insert_message(
        &self,
        session_id: &str,
        sender: Sender,
        text: &str,
        ts: DateTime<Utc>,
    ) -> Result<i64, StorageError> {
        self.conn.execute(
            "INSERT INTO messages (session_id, sender, text, ts) VALUES (?1, ?2, ?3, ?4)",
            params![session_id, sender.as_str(), text, ts.to_rfc3339()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Returns false when the (session, kind, value) triple is already stored.
    pub fn insert_intelligence(
        &self,
        session_id: &str,
        item: &IntelligenceItem,
    ) -> Result<bool, StorageError> {
        let changes = self.conn.execute(
            "
            INSERT OR IGNORE INTO intelligence (
                session_id,
                kind,
                value,
                confidence,
                extraction_method,
                extracted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                session_id,
                item.kind.as_str(),
                item.value,
                item.confidence,
                item.extraction_method,
                item.extracted_at.to_rfc3339(),
            ],
        )?;
        Ok(changes > 0)
    }

    /// Records an observation of `identifier` in `session_id`.
    ///
    /// `session_count` grows at most once per (identifier, session); repeat
    /// observations from the same session only refresh `last_seen`.
    pub fn upsert_scammer_profile(
        &self,
        identifier: &str,
        kind: IntelKind,
        session_id: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<ScammerProfile, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let seen = seen_at.to_rfc3339();

        let first_in_session = tx.execute(
            "INSERT OR IGNORE INTO profile_sessions (identifier, session_id, seen_at) VALUES (?1, ?2, ?3)",
            params![identifier, session_id, seen],
        )? > 0;

        let existing_count: Option<i64> = tx
            .query_row(
                "SELECT session_count FROM scammer_profiles WHERE identifier = ?1",
                [identifier],
                |row| row.get(0),
            )
            .optional()?;

        match existing_count {
            None => {
                tx.execute(
                    "
                    INSERT INTO scammer_profiles (
                        identifier,
                        identifier_kind,
                        first_seen,
                        last_seen,
                        session_count,
                        threat_level
                    ) VALUES (?1, ?2, ?3, ?3, 1, ?4)
                    ",
                    params![
                        identifier,
                        kind.as_str(),
                        seen,
                        ThreatLevel::from_session_count(1).as_str(),
                    ],
                )?;
            }
            Some(count) => {
                let next = if first_in_session { count + 1 } else { count };
                let threat = ThreatLevel::from_session_count(u32::try_from(next).unwrap_or(u32::MAX));
                tx.execute(
                    "
                    UPDATE scammer_profiles
                    SET last_seen = MAX(last_seen, ?2),
                        session_count = ?3,
                        threat_level = ?4
                    WHERE identifier = ?1
                    ",
                    params![identifier, seen, next, threat.as_str()],
                )?;
            }
        }

        tx.commit()?;

        self.scammer_profile(identifier)?.ok_or_else(|| {
            StorageError::Serialization(format!("profile vanished after upsert: {identifier}"))
        })
    }

    /// Returns false when the link already exists for this session.
    pub fn insert_network_link(&self, link: &NetworkLink) -> Result<bool, StorageError> {
        let changes = self.conn.execute(
            "
            INSERT OR IGNORE INTO network_links (
                source_identifier,
                target_identifier,
                link_type,
                session_id,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                link.source,
                link.target,
                link.link_type.as_str(),
                link.session_id,
                link.created_at.to_rfc3339(),
            ],
        )?;
        Ok(changes > 0)
    }

    pub fn session(&self, session_id: &str) -> Result<Option<StoredSession>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "
                SELECT session_id, started_at, ended_at, persona, final_stage, message_count,
                       scam_detected, scam_confidence, agent_notes, status
                FROM sessions
                WHERE session_id = ?1
                ",
                [session_id],
                session_from_row,
            )
            .optional()?)
    }

    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<StoredSession>, StorageError> {
        let mut statement = self.conn.prepare(
            "
            SELECT session_id, started_at, ended_at, persona, final_stage, message_count,
                   scam_detected, scam_confidence, agent_notes, status
            FROM sessions
            ORDER BY started_at DESC, session_id ASC
            LIMIT ?1
            ",
        )?;
        let rows = statement.query_map([limit as i64], session_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn messages_for_session(&self, session_id: &str) -> Result<Vec<StoredMessage>, StorageError> {
        let mut statement = self.conn.prepare(
            "
            SELECT session_id, sender, text, ts
            FROM messages
            WHERE session_id = ?1
            ORDER BY id ASC
            ",
        )?;
        let rows = statement.query_map([session_id], |row| {
            let sender_raw: String = row.get(1)?;
            let sender = sender_raw
                .parse::<Sender>()
                .map_err(|err| invalid_column(1, err))?;
            Ok(StoredMessage {
                session_id: row.get(0)?,
                sender,
                text: row.get(2)?,
                ts: timestamp_column(row, 3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn intelligence_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<IntelligenceItem>, StorageError> {
        let mut statement = self.conn.prepare(
            "
            SELECT kind, value, confidence, extraction_method, extracted_at
            FROM intelligence
            WHERE session_id = ?1
            ORDER BY id ASC
            ",
        )?;
        let rows = statement.query_map([session_id], |row| {
            let kind_raw: String = row.get(0)?;
            let kind = kind_raw
                .parse::<IntelKind>()
                .map_err(|err| invalid_column(0, err))?;
            Ok(IntelligenceItem {
                kind,
                value: row.get(1)?,
                confidence: row.get(2)?,
                extraction_method: row.get(3)?,
                extracted_at: timestamp_column(row, 4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn scammer_profile(&self, identifier: &str) -> Result<Option<ScammerProfile>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "
                SELECT identifier, identifier_kind, first_seen, last_seen, session_count,
                       threat_level, notes
                FROM scammer_profiles
                WHERE identifier = ?1
                ",
                [identifier],
                profile_from_row,
            )
            .optional()?)
    }

    /// All profiles, most recently seen first.
    pub fn scammer_profiles(&self) -> Result<Vec<ScammerProfile>, StorageError> {
        let mut statement = self.conn.prepare(
            "
            SELECT identifier, identifier_kind, first_seen, last_seen, session_count,
                   threat_level, notes
            FROM scammer_profiles
            ORDER BY last_seen DESC, identifier ASC
            ",
        )?;
        let rows = statement.query_map([], profile_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn network_links_for_session(&self, session_id: &str) -> Result<Vec<NetworkLink>, StorageError> {
        let mut statement = self.conn.prepare(
            "
            SELECT source_identifier, target_identifier, link_type, session_id, created_at
            FROM network_links
            WHERE session_id = ?1
            ORDER BY id ASC
            ",
        )?;
        let rows = statement.query_map([session_id], |row| {
            let link_type_raw: String = row.get(2)?;
            let link_type = link_type_raw
                .parse::<LinkType>()
                .map_err(|err| invalid_column(2, err))?;
            Ok(NetworkLink {
                source: row.get(0)?,
                target: row.get(1)?,
                link_type,
                session_id: row.get(3)?,
                created_at: timestamp_column(row, 4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Profiles as nodes and distinct identifier pairs as edges.
    pub fn network_graph(&self) -> Result<NetworkGraph, StorageError> {
        let nodes = self.scammer_profiles()?;
        let mut statement = self.conn.prepare(
            "
            SELECT source_identifier, target_identifier, link_type, COUNT(DISTINCT session_id)
            FROM network_links
            GROUP BY source_identifier, target_identifier, link_type
            ORDER BY source_identifier ASC, target_identifier ASC
            ",
        )?;
        let rows = statement.query_map([], |row| {
            let link_type_raw: String = row.get(2)?;
            let link_type = link_type_raw
                .parse::<LinkType>()
                .map_err(|err| invalid_column(2, err))?;
            let session_count: i64 = row.get(3)?;
            Ok(NetworkEdge {
                source: row.get(0)?,
                target: row.get(1)?,
                link_type,
                session_count: u32::try_from(session_count).unwrap_or(u32::MAX),
            })
        })?;
        let edges = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(NetworkGraph { nodes, edges })
    }

    pub fn dashboard_stats(&self) -> Result<DashboardStats, StorageError> {
        let count = |sql: &str| -> Result<u64, StorageError> {
            let value: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(u64::try_from(value).unwrap_or_default())
        };

        let mut intelligence_by_kind = BTreeMap::new();
        let mut statement = self
            .conn
            .prepare("SELECT kind, COUNT(*) FROM intelligence GROUP BY kind ORDER BY kind ASC")?;
        let rows = statement.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (kind, total) = row?;
            intelligence_by_kind.insert(kind, u64::try_from(total).unwrap_or_default());
        }

        Ok(DashboardStats {
            total_sessions: count("SELECT COUNT(*) FROM sessions")?,
            active_sessions: count("SELECT COUNT(*) FROM sessions WHERE status = 'active'")?,
            total_scammers: count("SELECT COUNT(*) FROM scammer_profiles")?,
            total_intelligence: count("SELECT COUNT(*) FROM intelligence")?,
            total_messages: count("SELECT COUNT(*) FROM messages")?,
            intelligence_by_kind,
            recent_sessions: self.recent_sessions(RECENT_SESSION_LIMIT)?,
        })
    }
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<StoredSession> {
    let persona = row
        .get::<_, Option<String>>(3)?
        .map(|value| value.parse::<Persona>().map_err(|err| invalid_column(3, err)))
        .transpose()?;
    let final_stage = row
        .get::<_, Option<String>>(4)?
        .map(|value| value.parse::<Stage>().map_err(|err| invalid_column(4, err)))
        .transpose()?;
    let ended_at = row
        .get::<_, Option<String>>(2)?
        .map(|value| parse_timestamp(value).map_err(|err| conversion_error(2, err)))
        .transpose()?;
    let status_raw: String = row.get(9)?;
    let message_count: i64 = row.get(5)?;

    Ok(StoredSession {
        session_id: row.get(0)?,
        started_at: timestamp_column(row, 1)?,
        ended_at,
        persona,
        final_stage,
        message_count: u32::try_from(message_count).unwrap_or_default(),
        scam_detected: row.get::<_, i64>(6)? != 0,
        scam_confidence: row.get(7)?,
        agent_notes: row.get(8)?,
        status: status_raw
            .parse::<SessionStatus>()
            .map_err(|err| invalid_column(9, err))?,
    })
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<ScammerProfile> {
    let kind_raw: String = row.get(1)?;
    let threat_raw: String = row.get(5)?;
    let session_count: i64 = row.get(4)?;
    Ok(ScammerProfile {
        identifier: row.get(0)?,
        identifier_kind: kind_raw
            .parse::<IntelKind>()
            .map_err(|err| invalid_column(1, err))?,
        first_seen: timestamp_column(row, 2)?,
        last_seen: timestamp_column(row, 3)?,
        session_count: u32::try_from(session_count).unwrap_or_default(),
        threat_level: threat_raw
            .parse::<ThreatLevel>()
            .map_err(|err| invalid_column(5, err))?,
        notes: row.get(6)?,
    })
}

fn timestamp_column(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    parse_timestamp(row.get::<_, String>(index)?).map_err(|err| conversion_error(index, err))
}

fn conversion_error(index: usize, err: StorageError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

fn invalid_column(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn bool_to_i64(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}
