//! Public key distribution in JWK Set form.

use crate::error::{Result, SigningError};
use crate::keys::{KeyPair, ALGORITHM};
use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use trustproto_core::TimestampMs;

/// Ed25519 public key as an OKP JSON Web Key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    /// Raw public key, unpadded base64url
    pub x: String,
    pub kid: String,
    pub alg: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub owner_id: String,
    pub created_at: TimestampMs,
    pub version: u64,
}

impl Jwk {
    pub fn from_key_pair(key: &KeyPair) -> Self {
        Self {
            kty: "OKP".to_string(),
            crv: "Ed25519".to_string(),
            x: key.public_key_b64(),
            kid: key.key_id.clone(),
            alg: ALGORITHM.to_string(),
            key_use: "sig".to_string(),
            owner_id: key.owner_id.clone(),
            created_at: key.created_at,
            version: key.version,
        }
    }

    pub fn decoding_key(&self) -> Result<DecodingKey> {
        DecodingKey::from_ed_components(&self.x).map_err(|e| SigningError::CryptoError {
            reason: format!("invalid public key for {}: {e}", self.kid),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeySet {
    pub keys: Vec<Jwk>,
}

impl PublicKeySet {
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }

    pub fn for_owner(&self, owner_id: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.owner_id == owner_id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<Jwk> for PublicKeySet {
    fn from_iter<I: IntoIterator<Item = Jwk>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}
