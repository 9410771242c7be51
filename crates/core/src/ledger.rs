//! Hash-Chained Interaction Ledger - Append-Only Storage
//!
//! This module provides a durable, append-only ledger of interaction events with:
//! - SQLite backend with WAL mode for durability
//! - Strict append-only semantics enforced by database triggers
//! - Per-session hash chains (`prev_hash` -> `row_hash`)
//! - Serialized appends per session so a chain can never fork
//! - Replay verification that pinpoints the first broken link
//!
//! # Chain layout
//!
//! Every event stores:
//! - row_hash: SHA-256 over the canonical JSON of every non-ledger field plus `prev_hash`
//! - prev_hash: row_hash of the previous event in the same session (NULL for the first)
//! - signature: optional Ed25519 signature over the row_hash digest bytes
//!
//! # Guarantees
//!
//! - Append-only: UPDATE and DELETE abort inside SQLite, and the API refuses both
//! - One genesis row per session and one successor per row (unique indexes)
//! - Event and ledger block are written in the same row of the same transaction

use crate::analysis::AnalysisHeuristics;
use crate::error::{CoreError, ErrorKind};
use crate::event::{IngestReceipt, IngestRequest, InteractionEvent, LedgerBlock, Metadata};
use crate::types::now_ms;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Message raised by the immutability triggers.
const IMMUTABLE_MARKER: &str = "immutable ledger row";

/// Upper bound for a single listing page.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Errors that can occur in ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("Immutable ledger row: {operation} rejected for event {event_id}")]
    ImmutableViolation { event_id: String, operation: String },

    #[error("Event not found: {event_id}")]
    EventNotFound { event_id: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Cursor {row_hash} not found in session {session_id}")]
    CursorNotFound { session_id: String, row_hash: String },

    #[error("Concurrent append would fork session {session_id}")]
    ChainFork { session_id: String },

    #[error("Invalid ledger signing key: {0}")]
    InvalidSigningKey(String),

    #[error("Corrupted row: {0}")]
    CorruptedRow(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Core(e) => e.kind(),
            LedgerError::DatabaseError(_) | LedgerError::CorruptedRow(_) => ErrorKind::Storage,
            LedgerError::ImmutableViolation { .. } => ErrorKind::ImmutableViolation,
            LedgerError::EventNotFound { .. }
            | LedgerError::SessionNotFound { .. }
            | LedgerError::CursorNotFound { .. } => ErrorKind::NotFound,
            LedgerError::ChainFork { .. } => ErrorKind::Conflict,
            LedgerError::InvalidSigningKey(_) => ErrorKind::Configuration,
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Why replay stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakReason {
    PrevHashMismatch,
    RowHashMismatch,
    SignatureInvalid,
}

/// First broken link found during replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    /// Zero-based position of the offending event in timestamp order
    pub break_at: usize,
    pub event_id: String,
    pub reason: BreakReason,
    pub expected_prev_hash: Option<String>,
    pub actual_prev_hash: Option<String>,
    pub expected_row_hash: String,
    pub actual_row_hash: String,
}

/// Chain-integrity report for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub ok: bool,
    pub session_id: String,
    /// Events accepted before the first break (all events when `ok`)
    pub count: usize,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub chain_break: Option<ChainBreak>,
}

/// One page of a session listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerPage {
    pub events: Vec<InteractionEvent>,
    /// Pass back as `since_row_hash` to continue
    pub next_cursor: Option<String>,
}

/// Observability counters for the ledger
#[derive(Debug, Default)]
struct LedgerCounters {
    events_appended_total: AtomicU64,
    appends_rejected_total: AtomicU64,
    verifications_total: AtomicU64,
    chain_breaks_detected_total: AtomicU64,
    immutable_violations_total: AtomicU64,
}

/// Point-in-time copy of the ledger counters.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerMetrics {
    pub events_appended_total: u64,
    pub appends_rejected_total: u64,
    pub verifications_total: u64,
    pub chain_breaks_detected_total: u64,
    pub immutable_violations_total: u64,
}

/// Append-only interaction ledger with per-session hash chains.
pub struct HashChainLedger {
    conn: Mutex<Connection>,
    /// One lock per session; appends to different sessions never contend here
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    signing_key: Option<SigningKey>,
    verifying_key: Option<VerifyingKey>,
    analysis: Option<Arc<dyn AnalysisHeuristics>>,
    counters: LedgerCounters,
}

const SELECT_COLUMNS: &str = "event_id, session_id, owner, model_vendor, model_name, timestamp, \
     prompt, response, metadata, analysis, embeddings, prev_hash, row_hash, signature";

impl HashChainLedger {
    /// Create or open a ledger at the specified path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        info!(path = %path.display(), "Opening interaction ledger");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(CoreError::from)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        Self::from_connection(conn)
    }

    /// Volatile ledger, used by tests and embedded callers.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            session_locks: Mutex::new(HashMap::new()),
            signing_key: None,
            verifying_key: None,
            analysis: None,
            counters: LedgerCounters::default(),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS interaction_events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id TEXT NOT NULL UNIQUE,
                session_id TEXT NOT NULL,
                owner TEXT NOT NULL,
                model_vendor TEXT NOT NULL,
                model_name TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                prompt TEXT NOT NULL,
                response TEXT NOT NULL,
                metadata TEXT NOT NULL,
                analysis TEXT,
                embeddings TEXT,
                prev_hash TEXT,
                row_hash TEXT NOT NULL UNIQUE,
                signature TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_events_session_order
                ON interaction_events(session_id, timestamp, seq);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_events_chain_link
                ON interaction_events(session_id, prev_hash) WHERE prev_hash IS NOT NULL;
            CREATE UNIQUE INDEX IF NOT EXISTS idx_events_genesis
                ON interaction_events(session_id) WHERE prev_hash IS NULL;

            CREATE TRIGGER IF NOT EXISTS interaction_events_no_update
            BEFORE UPDATE ON interaction_events
            BEGIN
                SELECT RAISE(ABORT, '{IMMUTABLE_MARKER}');
            END;

            CREATE TRIGGER IF NOT EXISTS interaction_events_no_delete
            BEFORE DELETE ON interaction_events
            BEGIN
                SELECT RAISE(ABORT, '{IMMUTABLE_MARKER}');
            END;
            "#
        ))?;
        Ok(())
    }

    /// Sign every appended row hash with this key.
    pub fn with_signing_key(mut self, signing_key: SigningKey) -> Self {
        self.verifying_key = Some(signing_key.verifying_key());
        self.signing_key = Some(signing_key);
        self
    }

    /// Verify row signatures during replay without being able to sign.
    pub fn with_verifying_key(mut self, verifying_key: VerifyingKey) -> Self {
        self.verifying_key = Some(verifying_key);
        self
    }

    /// Install the analysis collaborator used when a request carries no analysis.
    pub fn with_analysis(mut self, analysis: Arc<dyn AnalysisHeuristics>) -> Self {
        self.analysis = Some(analysis);
        self
    }

    pub fn verifying_key(&self) -> Option<&VerifyingKey> {
        self.verifying_key.as_ref()
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock();
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_session_lock(&self, session_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.session_locks.lock();
        // Map entry plus our handle means nobody else is waiting
        if Arc::strong_count(&lock) == 2 {
            locks.remove(session_id);
        }
    }

    /// Append an interaction event to its session chain.
    ///
    /// Resolves `prev_hash` from the current session head inside an IMMEDIATE
    /// transaction while holding the session lock, so two writers can never
    /// observe the same head.
    pub fn append(&self, request: IngestRequest) -> Result<IngestReceipt> {
        if let Err(e) = request.validate() {
            self.counters
                .appends_rejected_total
                .fetch_add(1, Ordering::Relaxed);
            warn!(session_id = %request.session_id, error = %e, "Rejected ledger append");
            return Err(e.into());
        }

        let session_id = request.session_id.clone();
        let lock = self.session_lock(&session_id);
        let result = {
            let _guard = lock.lock();
            self.append_locked(request)
        };
        self.release_session_lock(&session_id, lock);

        if result.is_err() {
            self.counters
                .appends_rejected_total
                .fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn append_locked(&self, request: IngestRequest) -> Result<IngestReceipt> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let head: Option<(String, u64)> = tx
            .query_row(
                "SELECT row_hash, timestamp FROM interaction_events
                 WHERE session_id = ?1
                 ORDER BY timestamp DESC, seq DESC
                 LIMIT 1",
                [&request.session_id],
                |row| Ok((row.get(0)?, row.get::<_, i64>(1)? as u64)),
            )
            .optional()?;

        let analysis = match (request.analysis, &self.analysis) {
            (Some(analysis), _) => Some(analysis),
            (None, Some(heuristics)) => {
                let history = Self::session_events(&tx, &request.session_id)?;
                let analysis = heuristics.analyze(&request.prompt, &request.response, &history);
                if let Some(record) = &analysis {
                    record.validate()?;
                }
                analysis
            }
            (None, None) => None,
        };

        let (prev_hash, head_timestamp) = match head {
            Some((hash, ts)) => (Some(hash), ts),
            None => (None, 0),
        };

        let mut event = InteractionEvent {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: request.session_id,
            owner: request.owner,
            model_vendor: request.model_vendor,
            model_name: request.model_name,
            // Never move backwards inside a session
            timestamp: now_ms().max(head_timestamp),
            prompt: request.prompt,
            response: request.response,
            metadata: request.metadata.unwrap_or_default(),
            analysis,
            embeddings: request.embeddings,
            ledger: LedgerBlock {
                prev_hash,
                row_hash: String::new(),
                signature: None,
            },
        };

        let row_hash = event.compute_row_hash(event.ledger.prev_hash.as_deref())?;
        event.ledger.signature = self.sign_row_hash(&row_hash)?;
        event.ledger.row_hash = row_hash;

        tx.execute(
            r#"
            INSERT INTO interaction_events (
                event_id, session_id, owner, model_vendor, model_name, timestamp,
                prompt, response, metadata, analysis, embeddings,
                prev_hash, row_hash, signature
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                event.id,
                event.session_id,
                event.owner,
                event.model_vendor,
                event.model_name,
                event.timestamp as i64,
                event.prompt,
                event.response,
                to_json(&event.metadata)?,
                event.analysis.as_ref().map(to_json).transpose()?,
                event.embeddings.as_ref().map(to_json).transpose()?,
                event.ledger.prev_hash,
                event.ledger.row_hash,
                event.ledger.signature,
            ],
        )
        .map_err(|e| map_write_error(e, &event.session_id, &event.id))?;

        tx.commit()?;

        self.counters
            .events_appended_total
            .fetch_add(1, Ordering::Relaxed);

        debug!(
            session_id = %event.session_id,
            event_id = %event.id,
            row_hash = %event.ledger.row_hash,
            genesis = event.ledger.prev_hash.is_none(),
            "Event appended to ledger"
        );

        Ok(IngestReceipt {
            event_id: event.id,
            session_id: event.session_id,
            timestamp: event.timestamp,
            ledger: event.ledger,
        })
    }

    fn sign_row_hash(&self, row_hash: &str) -> Result<Option<String>> {
        let Some(key) = &self.signing_key else {
            return Ok(None);
        };
        let digest = hex::decode(row_hash)
            .map_err(|e| LedgerError::CorruptedRow(format!("row hash is not hex: {e}")))?;
        Ok(Some(hex::encode(key.sign(&digest).to_bytes())))
    }

    /// Persisted events are immutable; this always fails.
    pub fn update_event(&self, event_id: &str, _changes: &Metadata) -> Result<()> {
        self.reject_mutation(event_id, "update")
    }

    /// Persisted events are immutable; this always fails.
    pub fn delete_event(&self, event_id: &str) -> Result<()> {
        self.reject_mutation(event_id, "delete")
    }

    fn reject_mutation(&self, event_id: &str, operation: &str) -> Result<()> {
        // Unknown ids are reported as such before the immutability check
        self.get(event_id)?;
        self.counters
            .immutable_violations_total
            .fetch_add(1, Ordering::Relaxed);
        warn!(event_id = %event_id, operation = %operation, "Rejected mutation of ledger row");
        Err(LedgerError::ImmutableViolation {
            event_id: event_id.to_string(),
            operation: operation.to_string(),
        })
    }

    /// Fetch a single event by id.
    pub fn get(&self, event_id: &str) -> Result<InteractionEvent> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM interaction_events WHERE event_id = ?1"),
            [event_id],
            event_from_row,
        )
        .optional()?
        .ok_or_else(|| LedgerError::EventNotFound {
            event_id: event_id.to_string(),
        })
    }

    /// Page through one session in timestamp order.
    ///
    /// `since_row_hash` continues strictly after the event carrying that hash.
    pub fn list(
        &self,
        session_id: &str,
        since_row_hash: Option<&str>,
        limit: usize,
    ) -> Result<LedgerPage> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let conn = self.conn.lock();

        let (after_ts, after_seq) = match since_row_hash {
            Some(row_hash) => conn
                .query_row(
                    "SELECT timestamp, seq FROM interaction_events
                     WHERE session_id = ?1 AND row_hash = ?2",
                    params![session_id, row_hash],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
                )
                .optional()?
                .ok_or_else(|| LedgerError::CursorNotFound {
                    session_id: session_id.to_string(),
                    row_hash: row_hash.to_string(),
                })?,
            None => (i64::MIN, i64::MIN),
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM interaction_events
             WHERE session_id = ?1
               AND (timestamp > ?2 OR (timestamp = ?2 AND seq > ?3))
             ORDER BY timestamp ASC, seq ASC
             LIMIT ?4"
        ))?;
        let mut events = stmt
            .query_map(
                params![session_id, after_ts, after_seq, (limit + 1) as i64],
                event_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let next_cursor = if events.len() > limit {
            events.truncate(limit);
            events.last().map(|e| e.ledger.row_hash.clone())
        } else {
            None
        };

        Ok(LedgerPage {
            events,
            next_cursor,
        })
    }

    /// Replay a session and check every link.
    pub fn verify(&self, session_id: &str) -> Result<ChainVerification> {
        self.counters
            .verifications_total
            .fetch_add(1, Ordering::Relaxed);

        let events = {
            let conn = self.conn.lock();
            Self::session_events(&conn, session_id)?
        };
        if events.is_empty() {
            return Err(LedgerError::SessionNotFound {
                session_id: session_id.to_string(),
            });
        }

        let mut expected_prev: Option<String> = None;
        for (index, event) in events.iter().enumerate() {
            let recomputed = event.compute_row_hash(expected_prev.as_deref())?;

            let reason = if event.ledger.prev_hash != expected_prev {
                Some(BreakReason::PrevHashMismatch)
            } else if event.ledger.row_hash != recomputed {
                Some(BreakReason::RowHashMismatch)
            } else if !self.signature_valid(event) {
                Some(BreakReason::SignatureInvalid)
            } else {
                None
            };

            if let Some(reason) = reason {
                self.counters
                    .chain_breaks_detected_total
                    .fetch_add(1, Ordering::Relaxed);
                error!(
                    session_id = %session_id,
                    event_id = %event.id,
                    break_at = index,
                    reason = ?reason,
                    "Ledger chain break detected"
                );
                return Ok(ChainVerification {
                    ok: false,
                    session_id: session_id.to_string(),
                    count: index,
                    chain_break: Some(ChainBreak {
                        break_at: index,
                        event_id: event.id.clone(),
                        reason,
                        expected_prev_hash: expected_prev,
                        actual_prev_hash: event.ledger.prev_hash.clone(),
                        expected_row_hash: recomputed,
                        actual_row_hash: event.ledger.row_hash.clone(),
                    }),
                });
            }

            expected_prev = Some(event.ledger.row_hash.clone());
        }

        info!(session_id = %session_id, count = events.len(), "Ledger chain verified");

        Ok(ChainVerification {
            ok: true,
            session_id: session_id.to_string(),
            count: events.len(),
            chain_break: None,
        })
    }

    fn signature_valid(&self, event: &InteractionEvent) -> bool {
        let (Some(key), Some(signature)) = (&self.verifying_key, &event.ledger.signature) else {
            return true;
        };
        let Ok(digest) = hex::decode(&event.ledger.row_hash) else {
            return false;
        };
        let Ok(sig_bytes) = hex::decode(signature) else {
            return false;
        };
        match Signature::from_slice(&sig_bytes) {
            Ok(sig) => key.verify(&digest, &sig).is_ok(),
            Err(_) => false,
        }
    }

    fn session_events(conn: &Connection, session_id: &str) -> Result<Vec<InteractionEvent>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM interaction_events
             WHERE session_id = ?1
             ORDER BY timestamp ASC, seq ASC"
        ))?;
        let events = stmt
            .query_map([session_id], event_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Number of events recorded for a session.
    pub fn count(&self, session_id: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM interaction_events WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Distinct session ids, in first-seen order.
    pub fn sessions(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT session_id FROM interaction_events GROUP BY session_id ORDER BY MIN(seq)",
        )?;
        let sessions = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(sessions)
    }

    pub fn metrics(&self) -> LedgerMetrics {
        LedgerMetrics {
            events_appended_total: self.counters.events_appended_total.load(Ordering::Relaxed),
            appends_rejected_total: self.counters.appends_rejected_total.load(Ordering::Relaxed),
            verifications_total: self.counters.verifications_total.load(Ordering::Relaxed),
            chain_breaks_detected_total: self
                .counters
                .chain_breaks_detected_total
                .load(Ordering::Relaxed),
            immutable_violations_total: self
                .counters
                .immutable_violations_total
                .load(Ordering::Relaxed),
        }
    }

    /// Execute raw SQL for testing purposes only
    ///
    /// **WARNING**: This bypasses the ledger API and exists so tests can simulate
    /// out-of-band tampering. Do NOT use in production code.
    #[doc(hidden)]
    pub fn __test_execute_raw_sql(&self, sql: &str) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute(sql, [])
            .map_err(|e| map_write_error(e, "", "raw-sql"))
    }

    /// Remove the immutability triggers so a test can tamper with stored rows.
    #[doc(hidden)]
    pub fn __test_drop_immutability_triggers(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "DROP TRIGGER IF EXISTS interaction_events_no_update;
             DROP TRIGGER IF EXISTS interaction_events_no_delete;",
        )?;
        Ok(())
    }
}

/// Parse a hex-encoded 32-byte Ed25519 seed.
pub fn signing_key_from_hex(seed_hex: &str) -> Result<SigningKey> {
    let bytes = hex::decode(seed_hex.trim())
        .map_err(|e| LedgerError::InvalidSigningKey(e.to_string()))?;
    let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        LedgerError::InvalidSigningKey(format!("expected 32 bytes, got {}", bytes.len()))
    })?;
    Ok(SigningKey::from_bytes(&seed))
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| LedgerError::Core(CoreError::Serialization(e)))
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|text| {
        serde_json::from_str(&text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<InteractionEvent> {
    Ok(InteractionEvent {
        id: row.get(0)?,
        session_id: row.get(1)?,
        owner: row.get(2)?,
        model_vendor: row.get(3)?,
        model_name: row.get(4)?,
        timestamp: row.get::<_, i64>(5)? as u64,
        prompt: row.get(6)?,
        response: row.get(7)?,
        metadata: json_column(row, 8)?.unwrap_or_default(),
        analysis: json_column(row, 9)?,
        embeddings: json_column(row, 10)?,
        ledger: LedgerBlock {
            prev_hash: row.get(11)?,
            row_hash: row.get(12)?,
            signature: row.get(13)?,
        },
    })
}

fn map_write_error(err: rusqlite::Error, session_id: &str, event_id: &str) -> LedgerError {
    if let rusqlite::Error::SqliteFailure(code, Some(message)) = &err {
        if code.code == rusqlite::ErrorCode::ConstraintViolation {
            if message.contains(IMMUTABLE_MARKER) {
                return LedgerError::ImmutableViolation {
                    event_id: event_id.to_string(),
                    operation: "raw write".to_string(),
                };
            }
            if message.contains("interaction_events.session_id") {
                return LedgerError::ChainFork {
                    session_id: session_id.to_string(),
                };
            }
        }
    }
    LedgerError::DatabaseError(err)
}
