//! Declaration Signing Service - Trust Layer Implementation
//!
//! This module provides the signing service for trust declarations:
//! - Signs the essential business fields of any serializable payload as an EdDSA JWT
//! - Lazily provisions one Ed25519 key pair per signer identity
//! - Verifies tokens against the signer's current key, issuer, subject and expiry
//! - Re-derives the payload from the current object and fails closed on divergence
//!
//! # Security Model
//!
//! - Private keys never leave the key store or this service
//! - A token is only valid under the key whose `kid` it names
//! - A valid signature over stale data is still rejected (`IntegrityMismatch`)

use crate::error::{Result, SigningError};
use crate::jwks::{Jwk, PublicKeySet};
use crate::keys::{InMemoryKeyStore, KeyPair, KeyStore, ALGORITHM};
use jsonwebtoken::{decode, decode_header, encode, Algorithm, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use trustproto_core::{now_ms, SigningConfig, TimestampMs};
use trustproto_domain::SignatureEnvelope;

/// Numbers in signed data and current payload may differ by this much.
pub const NUMERIC_TOLERANCE: f64 = 1e-9;

/// Claims carried by every declaration token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclarationClaims {
    pub sub: String,
    pub iss: String,
    pub iat: u64,
    pub exp: u64,
    pub jti: String,
    /// Essential business fields at signing time
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub valid: bool,
    pub key_id: String,
    pub owner_id: String,
    pub issued_at: TimestampMs,
    pub expires_at: TimestampMs,
}

#[derive(Debug, Default)]
struct SigningCounters {
    signatures_issued_total: AtomicU64,
    verifications_total: AtomicU64,
    verification_failures_total: AtomicU64,
    integrity_mismatches_total: AtomicU64,
    keys_generated_total: AtomicU64,
}

/// Metrics for observability.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SigningMetrics {
    pub signatures_issued_total: u64,
    pub verifications_total: u64,
    pub verification_failures_total: u64,
    pub integrity_mismatches_total: u64,
    pub keys_generated_total: u64,
}

/// Signature Service - the primary interface for signing declarations.
pub struct SignatureService {
    store: Arc<dyn KeyStore>,
    issuer: String,
    token_ttl_secs: u64,
    counters: SigningCounters,
}

impl SignatureService {
    pub fn new(store: Arc<dyn KeyStore>, config: &SigningConfig) -> Self {
        Self {
            store,
            issuer: config.issuer.clone(),
            token_ttl_secs: config.token_ttl_secs,
            counters: SigningCounters::default(),
        }
    }

    /// Service backed by a volatile key store.
    pub fn in_memory(config: &SigningConfig) -> Self {
        Self::new(Arc::new(InMemoryKeyStore::new()), config)
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Create a new key pair for `owner_id`, replacing any existing one.
    ///
    /// Tokens issued under the previous key no longer verify.
    pub fn generate_key_pair(&self, owner_id: &str) -> Result<Jwk> {
        require_owner(owner_id)?;
        let key = self.store.replace(KeyPair::generate(owner_id, now_ms()))?;
        self.counters
            .keys_generated_total
            .fetch_add(1, Ordering::Relaxed);
        info!(owner_id = %owner_id, key_id = %key.key_id, version = key.version, "Key pair generated");
        Ok(Jwk::from_key_pair(&key))
    }

    /// Public half of the owner's current key, if any.
    pub fn current_key(&self, owner_id: &str) -> Result<Option<Jwk>> {
        Ok(self.store.get(owner_id)?.as_ref().map(Jwk::from_key_pair))
    }

    /// Sign `payload` on behalf of `owner_id`.
    pub fn sign<P: Serialize + ?Sized>(
        &self,
        payload: &P,
        owner_id: &str,
    ) -> Result<SignatureEnvelope> {
        self.sign_at(payload, owner_id, now_ms())
    }

    /// Sign with an explicit issue time.
    pub fn sign_at<P: Serialize + ?Sized>(
        &self,
        payload: &P,
        owner_id: &str,
        now: TimestampMs,
    ) -> Result<SignatureEnvelope> {
        require_owner(owner_id)?;
        let data = serde_json::to_value(payload)?;

        let key = match self.store.get(owner_id)? {
            Some(key) => key,
            None => {
                let key = self.store.get_or_insert(KeyPair::generate(owner_id, now))?;
                info!(owner_id = %owner_id, key_id = %key.key_id, "Provisioned signing key on first use");
                key
            }
        };

        let iat = now / 1000;
        let claims = DeclarationClaims {
            sub: owner_id.to_string(),
            iss: self.issuer.clone(),
            iat,
            exp: iat + self.token_ttl_secs,
            jti: uuid::Uuid::new_v4().to_string(),
            data,
        };

        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(key.key_id.clone());

        let token = encode(&header, &claims, &key.encoding_key()?).map_err(|e| {
            SigningError::CryptoError {
                reason: format!("token encoding failed: {e}"),
            }
        })?;

        self.counters
            .signatures_issued_total
            .fetch_add(1, Ordering::Relaxed);
        debug!(owner_id = %owner_id, key_id = %key.key_id, jti = %claims.jti, "Payload signed");

        Ok(SignatureEnvelope {
            token,
            key_id: key.key_id,
            signed_at: now,
            signed_by: owner_id.to_string(),
            algorithm: ALGORITHM.to_string(),
        })
    }

    /// Verify `envelope` and check it still describes `current_payload`.
    pub fn verify<P: Serialize + ?Sized>(
        &self,
        current_payload: &P,
        envelope: &SignatureEnvelope,
    ) -> Result<VerificationResult> {
        self.counters
            .verifications_total
            .fetch_add(1, Ordering::Relaxed);
        let result = self.verify_inner(current_payload, envelope);
        if let Err(e) = &result {
            self.counters
                .verification_failures_total
                .fetch_add(1, Ordering::Relaxed);
            warn!(signed_by = %envelope.signed_by, key_id = %envelope.key_id, error = %e, "Signature verification failed");
        }
        result
    }

    fn verify_inner<P: Serialize + ?Sized>(
        &self,
        current_payload: &P,
        envelope: &SignatureEnvelope,
    ) -> Result<VerificationResult> {
        let key = self
            .store
            .get(&envelope.signed_by)?
            .ok_or_else(|| SigningError::KeyNotFound {
                owner_id: envelope.signed_by.clone(),
            })?;

        let header = decode_header(&envelope.token)
            .map_err(|e| SigningError::invalid(format!("malformed token: {e}")))?;
        if header.alg != Algorithm::EdDSA {
            return Err(SigningError::invalid(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }
        if header.kid.as_deref() != Some(key.key_id.as_str()) {
            return Err(SigningError::invalid(
                "token was not issued under the signer's current key",
            ));
        }

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.sub = Some(envelope.signed_by.clone());
        validation.set_required_spec_claims(&["exp", "iat", "iss", "sub"]);

        let decoding_key = Jwk::from_key_pair(&key).decoding_key()?;
        let claims = decode::<DeclarationClaims>(&envelope.token, &decoding_key, &validation)
            .map_err(|e| SigningError::invalid(describe_jwt_error(&e)))?
            .claims;

        let current = serde_json::to_value(current_payload)?;
        if let Some(field) = first_divergence(&claims.data, &current, "") {
            self.counters
                .integrity_mismatches_total
                .fetch_add(1, Ordering::Relaxed);
            error!(
                signed_by = %envelope.signed_by,
                field = %field,
                "Signed claims diverge from current payload"
            );
            return Err(SigningError::IntegrityMismatch { field });
        }

        Ok(VerificationResult {
            valid: true,
            key_id: key.key_id,
            owner_id: claims.sub,
            issued_at: claims.iat * 1000,
            expires_at: claims.exp * 1000,
        })
    }

    /// Every registered public key. Carries no private material.
    pub fn export_public_keys(&self) -> Result<PublicKeySet> {
        Ok(self.store.list()?.iter().map(Jwk::from_key_pair).collect())
    }

    /// Gets a snapshot of current metrics.
    pub fn metrics(&self) -> SigningMetrics {
        SigningMetrics {
            signatures_issued_total: self.counters.signatures_issued_total.load(Ordering::Relaxed),
            verifications_total: self.counters.verifications_total.load(Ordering::Relaxed),
            verification_failures_total: self
                .counters
                .verification_failures_total
                .load(Ordering::Relaxed),
            integrity_mismatches_total: self
                .counters
                .integrity_mismatches_total
                .load(Ordering::Relaxed),
            keys_generated_total: self.counters.keys_generated_total.load(Ordering::Relaxed),
        }
    }
}

fn require_owner(owner_id: &str) -> Result<()> {
    if owner_id.trim().is_empty() {
        return Err(SigningError::InvalidField {
            field: "owner_id".to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

fn describe_jwt_error(err: &jsonwebtoken::errors::Error) -> String {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => "token expired".to_string(),
        ErrorKind::InvalidSignature => "signature does not match".to_string(),
        ErrorKind::InvalidIssuer => "issuer mismatch".to_string(),
        ErrorKind::InvalidSubject => "subject mismatch".to_string(),
        ErrorKind::MissingRequiredClaim(claim) => format!("missing claim {claim}"),
        other => format!("token rejected: {other:?}"),
    }
}

/// Path of the first field where `signed` and `current` disagree.
fn first_divergence(signed: &Value, current: &Value, path: &str) -> Option<String> {
    let here = || {
        if path.is_empty() {
            "payload".to_string()
        } else {
            path.to_string()
        }
    };
    let child = |segment: &str| {
        if path.is_empty() {
            segment.to_string()
        } else {
            format!("{path}.{segment}")
        }
    };

    match (signed, current) {
        (Value::Object(a), Value::Object(b)) => {
            let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
            for key in keys {
                match (a.get(key), b.get(key)) {
                    (Some(x), Some(y)) => {
                        if let Some(field) = first_divergence(x, y, &child(key)) {
                            return Some(field);
                        }
                    }
                    _ => return Some(child(key)),
                }
            }
            None
        }
        (Value::Array(a), Value::Array(b)) => {
            if a.len() != b.len() {
                return Some(here());
            }
            a.iter()
                .zip(b)
                .enumerate()
                .find_map(|(i, (x, y))| first_divergence(x, y, &child(&i.to_string())))
        }
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) if (x - y).abs() <= NUMERIC_TOLERANCE => None,
            _ if a == b => None,
            _ => Some(here()),
        },
        (a, b) if a == b => None,
        _ => Some(here()),
    }
}
