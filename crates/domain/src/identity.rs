//! Human identity records supplied by the external identity-verification system.

use crate::error::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use trustproto_core::TimestampMs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    Pending,
    Failed,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfidenceComponents {
    /// Verifier's base confidence, 0.0 to 1.0
    pub base_confidence: f64,
    pub document_verified: bool,
    pub biometric_verified: bool,
    pub liveness_verified: bool,
    pub multi_factor: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub data_processing: bool,
    pub ai_interaction: bool,
    pub trust_bridge: bool,
    pub audit_logging: bool,
}

impl ConsentRecord {
    pub const COUNT: usize = 4;

    pub fn all_granted() -> Self {
        Self {
            data_processing: true,
            ai_interaction: true,
            trust_bridge: true,
            audit_logging: true,
        }
    }

    pub fn granted(&self) -> usize {
        [
            self.data_processing,
            self.ai_interaction,
            self.trust_bridge,
            self.audit_logging,
        ]
        .iter()
        .filter(|g| **g)
        .count()
    }

    /// Granted consents as a fraction of all consents.
    pub fn completeness(&self) -> f64 {
        self.granted() as f64 / Self::COUNT as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanIdentityRecord {
    pub user_id: String,
    pub status: VerificationStatus,
    pub confidence: ConfidenceComponents,
    pub consent: ConsentRecord,
    pub verified_at: Option<TimestampMs>,
    #[serde(default)]
    pub expires_at: Option<TimestampMs>,
}

impl HumanIdentityRecord {
    pub fn is_verified(&self) -> bool {
        self.status == VerificationStatus::Verified
    }

    /// Not past `expires_at` at `now`; records without expiry never lapse.
    pub fn is_current_at(&self, now: TimestampMs) -> bool {
        self.expires_at.map_or(true, |expires| now <= expires)
    }
}

/// Lookup seam for the identity-verification collaborator.
pub trait IdentityRegistry: Send + Sync {
    fn get_identity(&self, user_id: &str) -> Result<Option<HumanIdentityRecord>>;
}

#[derive(Debug, Default)]
pub struct InMemoryIdentityRegistry {
    records: RwLock<HashMap<String, HumanIdentityRecord>>,
}

impl InMemoryIdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, record: HumanIdentityRecord) {
        self.records.write().insert(record.user_id.clone(), record);
    }

    pub fn remove(&self, user_id: &str) -> Option<HumanIdentityRecord> {
        self.records.write().remove(user_id)
    }
}

impl IdentityRegistry for InMemoryIdentityRegistry {
    fn get_identity(&self, user_id: &str) -> Result<Option<HumanIdentityRecord>> {
        Ok(self.records.read().get(user_id).cloned())
    }
}
