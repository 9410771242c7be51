//! Bridge persistence.
//!
//! Both stores enforce at most one active bridge per (user, agent) pair and
//! reject updates whose expected version is stale.

use crate::bridge::{BridgeError, BridgeStatus, Result, TrustBridge};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

pub trait BridgeStore: Send + Sync {
    fn insert(&self, bridge: &TrustBridge) -> Result<()>;

    fn get(&self, bridge_id: &str) -> Result<Option<TrustBridge>>;

    fn find_active(&self, user_id: &str, agent_id: &str) -> Result<Option<TrustBridge>>;

    /// Replace the stored bridge if its version still equals `expected_version`.
    fn update(&self, bridge: &TrustBridge, expected_version: u64) -> Result<()>;

    /// Newest first.
    fn list_for_user(&self, user_id: &str) -> Result<Vec<TrustBridge>>;

    fn list_active(&self) -> Result<Vec<TrustBridge>>;
}

fn duplicate(bridge: &TrustBridge) -> BridgeError {
    BridgeError::DuplicateActiveBridge {
        user_id: bridge.user_id.clone(),
        agent_id: bridge.agent_id.clone(),
    }
}

fn newest_first(bridges: &mut [TrustBridge]) {
    bridges.sort_by(|a, b| {
        b.established_at
            .cmp(&a.established_at)
            .then_with(|| a.bridge_id.cmp(&b.bridge_id))
    });
}

#[derive(Debug, Default)]
pub struct InMemoryBridgeStore {
    bridges: RwLock<HashMap<String, TrustBridge>>,
}

impl InMemoryBridgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bridges.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.read().is_empty()
    }
}

impl BridgeStore for InMemoryBridgeStore {
    fn insert(&self, bridge: &TrustBridge) -> Result<()> {
        let mut bridges = self.bridges.write();
        let clash = bridges.values().any(|b| {
            b.is_active() && b.user_id == bridge.user_id && b.agent_id == bridge.agent_id
        });
        if bridge.is_active() && clash {
            return Err(duplicate(bridge));
        }
        bridges.insert(bridge.bridge_id.clone(), bridge.clone());
        Ok(())
    }

    fn get(&self, bridge_id: &str) -> Result<Option<TrustBridge>> {
        Ok(self.bridges.read().get(bridge_id).cloned())
    }

    fn find_active(&self, user_id: &str, agent_id: &str) -> Result<Option<TrustBridge>> {
        Ok(self
            .bridges
            .read()
            .values()
            .find(|b| b.is_active() && b.user_id == user_id && b.agent_id == agent_id)
            .cloned())
    }

    fn update(&self, bridge: &TrustBridge, expected_version: u64) -> Result<()> {
        let mut bridges = self.bridges.write();
        let stored = bridges
            .get_mut(&bridge.bridge_id)
            .ok_or_else(|| BridgeError::BridgeNotFound {
                bridge_id: bridge.bridge_id.clone(),
            })?;
        if stored.version != expected_version {
            return Err(BridgeError::StaleVersion {
                bridge_id: bridge.bridge_id.clone(),
                expected: expected_version,
            });
        }
        *stored = bridge.clone();
        Ok(())
    }

    fn list_for_user(&self, user_id: &str) -> Result<Vec<TrustBridge>> {
        let mut bridges: Vec<_> = self
            .bridges
            .read()
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut bridges);
        Ok(bridges)
    }

    fn list_active(&self) -> Result<Vec<TrustBridge>> {
        let mut bridges: Vec<_> = self
            .bridges
            .read()
            .values()
            .filter(|b| b.is_active())
            .cloned()
            .collect();
        newest_first(&mut bridges);
        Ok(bridges)
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS trust_bridges (
    bridge_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    status TEXT NOT NULL,
    established_at INTEGER NOT NULL,
    version INTEGER NOT NULL,
    body TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_bridges_one_active
    ON trust_bridges(user_id, agent_id) WHERE status = 'active';
CREATE INDEX IF NOT EXISTS idx_bridges_user
    ON trust_bridges(user_id, established_at);
"#;

/// SQLite-backed bridge store; the full bridge is kept as a JSON body
/// alongside the columns needed for lookups and constraints.
pub struct SqliteBridgeStore {
    conn: Mutex<Connection>,
}

impl SqliteBridgeStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::init(conn, &path.display().to_string())
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, ":memory:")
    }

    fn init(conn: Connection, location: &str) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        info!(location = %location, "Bridge store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn query_bridges(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<TrustBridge>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let bodies = stmt
            .query_map(args, |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(BridgeError::from))
            .collect()
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl BridgeStore for SqliteBridgeStore {
    fn insert(&self, bridge: &TrustBridge) -> Result<()> {
        let body = serde_json::to_string(bridge)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO trust_bridges (bridge_id, user_id, agent_id, status, established_at, version, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                bridge.bridge_id,
                bridge.user_id,
                bridge.agent_id,
                bridge.status.as_str(),
                bridge.established_at as i64,
                bridge.version as i64,
                body,
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                duplicate(bridge)
            } else {
                BridgeError::Database(e)
            }
        })?;
        debug!(bridge_id = %bridge.bridge_id, "Bridge persisted");
        Ok(())
    }

    fn get(&self, bridge_id: &str) -> Result<Option<TrustBridge>> {
        let body: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT body FROM trust_bridges WHERE bridge_id = ?1",
                params![bridge_id],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| serde_json::from_str(&b).map_err(BridgeError::from))
            .transpose()
    }

    fn find_active(&self, user_id: &str, agent_id: &str) -> Result<Option<TrustBridge>> {
        Ok(self
            .query_bridges(
                "SELECT body FROM trust_bridges
                 WHERE user_id = ?1 AND agent_id = ?2 AND status = 'active'",
                &[&user_id, &agent_id],
            )?
            .pop())
    }

    fn update(&self, bridge: &TrustBridge, expected_version: u64) -> Result<()> {
        let body = serde_json::to_string(bridge)?;
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE trust_bridges SET status = ?1, version = ?2, body = ?3
             WHERE bridge_id = ?4 AND version = ?5",
            params![
                bridge.status.as_str(),
                bridge.version as i64,
                body,
                bridge.bridge_id,
                expected_version as i64,
            ],
        )?;
        if changed == 1 {
            return Ok(());
        }

        let exists: Option<i64> = conn
            .query_row(
                "SELECT version FROM trust_bridges WHERE bridge_id = ?1",
                params![bridge.bridge_id],
                |row| row.get(0),
            )
            .optional()?;
        Err(match exists {
            Some(_) => BridgeError::StaleVersion {
                bridge_id: bridge.bridge_id.clone(),
                expected: expected_version,
            },
            None => BridgeError::BridgeNotFound {
                bridge_id: bridge.bridge_id.clone(),
            },
        })
    }

    fn list_for_user(&self, user_id: &str) -> Result<Vec<TrustBridge>> {
        self.query_bridges(
            "SELECT body FROM trust_bridges WHERE user_id = ?1
             ORDER BY established_at DESC, bridge_id ASC",
            &[&user_id],
        )
    }

    fn list_active(&self) -> Result<Vec<TrustBridge>> {
        let status = BridgeStatus::Active.as_str();
        self.query_bridges(
            "SELECT body FROM trust_bridges WHERE status = ?1
             ORDER BY established_at DESC, bridge_id ASC",
            &[&status],
        )
    }
}
