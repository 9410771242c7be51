//! Cryptographic key management
//!
//! One active Ed25519 key pair per signer identity. Regenerating a key
//! replaces the previous one outright and bumps the owner's `version`;
//! no rotation history is kept, so tokens minted under an older key stop
//! verifying.

use crate::error::{Result, SigningError};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ed25519_dalek::pkcs8::EncodePrivateKey;
use ed25519_dalek::{SigningKey, VerifyingKey};
use jsonwebtoken::EncodingKey;
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;
use trustproto_core::TimestampMs;
use zeroize::{Zeroize, Zeroizing};

/// JOSE name of the only supported algorithm.
pub const ALGORITHM: &str = "EdDSA";

/// Active signing key for one owner.
#[derive(Clone)]
pub struct KeyPair {
    pub owner_id: String,
    pub key_id: String,
    pub algorithm: String,
    pub created_at: TimestampMs,
    pub version: u64,
    signing_key: SigningKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("owner_id", &self.owner_id)
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("created_at", &self.created_at)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generate a fresh key pair for `owner_id`.
    pub fn generate(owner_id: impl Into<String>, created_at: TimestampMs) -> Self {
        use rand::RngCore;
        let mut rng = rand::thread_rng();
        let mut secret_key_bytes = [0u8; 32];
        rng.fill_bytes(&mut secret_key_bytes);

        let signing_key = SigningKey::from_bytes(&secret_key_bytes);
        secret_key_bytes.zeroize();

        Self::from_signing_key(owner_id, signing_key, created_at, 1)
    }

    /// Rebuild a key pair from its 32-byte secret.
    ///
    /// # Security
    /// The intermediate copy of the secret is zeroized.
    pub fn from_secret_bytes(
        owner_id: impl Into<String>,
        secret: &[u8],
        created_at: TimestampMs,
        version: u64,
    ) -> Result<Self> {
        let owner_id = owner_id.into();
        if secret.len() != 32 {
            return Err(SigningError::CorruptKey {
                owner_id,
                reason: format!("invalid key length: {} (expected 32)", secret.len()),
            });
        }

        let mut key_array = [0u8; 32];
        key_array.copy_from_slice(secret);
        let signing_key = SigningKey::from_bytes(&key_array);
        key_array.zeroize();

        Ok(Self::from_signing_key(owner_id, signing_key, created_at, version))
    }

    fn from_signing_key(
        owner_id: impl Into<String>,
        signing_key: SigningKey,
        created_at: TimestampMs,
        version: u64,
    ) -> Self {
        let key_id = generate_key_id(&signing_key.verifying_key());
        Self {
            owner_id: owner_id.into(),
            key_id,
            algorithm: ALGORITHM.to_string(),
            created_at,
            version,
            signing_key,
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key().to_bytes()
    }

    /// Public key as unpadded base64url, the JWK `x` parameter.
    pub fn public_key_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.public_key_bytes())
    }

    pub(crate) fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing_key.to_bytes())
    }

    pub(crate) fn encoding_key(&self) -> Result<EncodingKey> {
        let der = self
            .signing_key
            .to_pkcs8_der()
            .map_err(|e| SigningError::CryptoError {
                reason: format!("PKCS#8 encoding failed: {e}"),
            })?;
        Ok(EncodingKey::from_ed_der(der.as_bytes()))
    }
}

/// Stable public key identifier: first 16 bytes of BLAKE3(public key), hex.
pub fn generate_key_id(verifying_key: &VerifyingKey) -> String {
    let hash = blake3::hash(verifying_key.as_bytes());
    hex::encode(&hash.as_bytes()[..16])
}

/// Storage for the current key of each owner.
pub trait KeyStore: Send + Sync {
    fn get(&self, owner_id: &str) -> Result<Option<KeyPair>>;

    /// Replace the owner's key. The stored version is one above the
    /// previous key's version, or 1 for a new owner.
    fn replace(&self, key: KeyPair) -> Result<KeyPair>;

    /// Store `key` only if the owner has none yet; returns whichever key is current.
    fn get_or_insert(&self, key: KeyPair) -> Result<KeyPair>;

    fn list(&self) -> Result<Vec<KeyPair>>;
}

#[derive(Default)]
pub struct InMemoryKeyStore {
    keys: RwLock<HashMap<String, KeyPair>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for InMemoryKeyStore {
    fn get(&self, owner_id: &str) -> Result<Option<KeyPair>> {
        Ok(self.keys.read().get(owner_id).cloned())
    }

    fn replace(&self, mut key: KeyPair) -> Result<KeyPair> {
        let mut keys = self.keys.write();
        key.version = keys.get(&key.owner_id).map_or(1, |prev| prev.version + 1);
        keys.insert(key.owner_id.clone(), key.clone());
        Ok(key)
    }

    fn get_or_insert(&self, mut key: KeyPair) -> Result<KeyPair> {
        let mut keys = self.keys.write();
        if let Some(existing) = keys.get(&key.owner_id) {
            return Ok(existing.clone());
        }
        key.version = 1;
        keys.insert(key.owner_id.clone(), key.clone());
        Ok(key)
    }

    fn list(&self) -> Result<Vec<KeyPair>> {
        let mut keys: Vec<KeyPair> = self.keys.read().values().cloned().collect();
        keys.sort_by(|a, b| a.owner_id.cmp(&b.owner_id));
        Ok(keys)
    }
}

/// SQLite-backed key store; one row per owner.
pub struct SqliteKeyStore {
    conn: Mutex<Connection>,
}

impl SqliteKeyStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening key store");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| SigningError::CryptoError {
                    reason: format!("cannot create key store directory: {e}"),
                })?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS signing_keys (
                owner_id TEXT PRIMARY KEY,
                key_id TEXT NOT NULL,
                algorithm TEXT NOT NULL,
                secret_key BLOB NOT NULL,
                public_key BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                version INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn write_key(conn: &Connection, key: &KeyPair) -> Result<()> {
        let secret = key.secret_bytes();
        conn.execute(
            r#"
            INSERT INTO signing_keys
                (owner_id, key_id, algorithm, secret_key, public_key, created_at, version)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(owner_id) DO UPDATE SET
                key_id = excluded.key_id,
                algorithm = excluded.algorithm,
                secret_key = excluded.secret_key,
                public_key = excluded.public_key,
                created_at = excluded.created_at,
                version = excluded.version
            "#,
            params![
                key.owner_id,
                key.key_id,
                key.algorithm,
                &secret[..],
                &key.public_key_bytes()[..],
                key.created_at as i64,
                key.version as i64,
            ],
        )?;
        Ok(())
    }

    fn read_key(conn: &Connection, owner_id: &str) -> Result<Option<KeyPair>> {
        let row = conn
            .query_row(
                "SELECT owner_id, secret_key, created_at, version, key_id
                 FROM signing_keys WHERE owner_id = ?1",
                [owner_id],
                StoredKey::from_row,
            )
            .optional()?;
        row.map(StoredKey::into_key_pair).transpose()
    }
}

struct StoredKey {
    owner_id: String,
    secret: Zeroizing<Vec<u8>>,
    created_at: i64,
    version: i64,
    key_id: String,
}

impl StoredKey {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            owner_id: row.get(0)?,
            secret: Zeroizing::new(row.get(1)?),
            created_at: row.get(2)?,
            version: row.get(3)?,
            key_id: row.get(4)?,
        })
    }

    fn into_key_pair(self) -> Result<KeyPair> {
        let key = KeyPair::from_secret_bytes(
            self.owner_id.clone(),
            &self.secret,
            self.created_at as u64,
            self.version as u64,
        )?;
        if key.key_id != self.key_id {
            return Err(SigningError::CorruptKey {
                owner_id: self.owner_id,
                reason: "stored key_id does not match key material".to_string(),
            });
        }
        Ok(key)
    }
}

impl KeyStore for SqliteKeyStore {
    fn get(&self, owner_id: &str) -> Result<Option<KeyPair>> {
        let conn = self.conn.lock();
        Self::read_key(&conn, owner_id)
    }

    fn replace(&self, mut key: KeyPair) -> Result<KeyPair> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let previous: Option<i64> = tx
            .query_row(
                "SELECT version FROM signing_keys WHERE owner_id = ?1",
                [&key.owner_id],
                |row| row.get(0),
            )
            .optional()?;
        key.version = previous.map_or(1, |v| v as u64 + 1);
        Self::write_key(&tx, &key)?;
        tx.commit()?;
        Ok(key)
    }

    fn get_or_insert(&self, mut key: KeyPair) -> Result<KeyPair> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if let Some(existing) = Self::read_key(&tx, &key.owner_id)? {
            return Ok(existing);
        }
        key.version = 1;
        Self::write_key(&tx, &key)?;
        tx.commit()?;
        Ok(key)
    }

    fn list(&self) -> Result<Vec<KeyPair>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT owner_id, secret_key, created_at, version, key_id
             FROM signing_keys ORDER BY owner_id",
        )?;
        let rows = stmt
            .query_map([], StoredKey::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(StoredKey::into_key_pair).collect()
    }
}
