//! Interaction event schema for the hash-chained ledger.
//!
//! An [`InteractionEvent`] is one prompt/response exchange between a human
//! and an agent inside a session. Events are immutable once persisted; the
//! `ledger` block links each event to its predecessor in the same session.

use crate::canonical::{canonical_bytes, sha256_hex};
use crate::error::{CoreError, Result};
use crate::types::TimestampMs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque metadata attached to an event.
pub type Metadata = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    /// -1.0 (negative) to 1.0 (positive)
    pub score: f64,
    pub label: SentimentLabel,
}

/// Sentiment/stance record produced by an external heuristics collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub sentiment: Sentiment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stance: Option<String>,
    #[serde(default)]
    pub signals: BTreeMap<String, serde_json::Value>,
}

impl AnalysisRecord {
    /// The sentiment score must be finite and within [-1, 1].
    pub fn validate(&self) -> Result<()> {
        let score = self.sentiment.score;
        if !score.is_finite() || !(-1.0..=1.0).contains(&score) {
            return Err(CoreError::invalid_field(
                "analysis.sentiment.score",
                format!("must be a finite value in [-1, 1], got {score}"),
            ));
        }
        Ok(())
    }
}

/// Chain linkage stored with every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerBlock {
    /// `row_hash` of the previous event in the session, `None` for the first
    pub prev_hash: Option<String>,
    /// SHA-256 over the canonical payload, lowercase hex
    pub row_hash: String,
    /// Ed25519 signature over the `row_hash` bytes, hex, when a ledger key is configured
    pub signature: Option<String>,
}

/// Persisted ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub id: String,
    pub session_id: String,
    pub owner: String,
    pub model_vendor: String,
    pub model_name: String,
    pub timestamp: TimestampMs,
    pub prompt: String,
    pub response: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub analysis: Option<AnalysisRecord>,
    #[serde(default)]
    pub embeddings: Option<Vec<f64>>,
    pub ledger: LedgerBlock,
}

/// Hashed view of an event: every field except the ledger block, plus `prev_hash`.
#[derive(Serialize)]
struct CanonicalPayload<'a> {
    id: &'a str,
    session_id: &'a str,
    owner: &'a str,
    model_vendor: &'a str,
    model_name: &'a str,
    timestamp: TimestampMs,
    prompt: &'a str,
    response: &'a str,
    metadata: &'a Metadata,
    analysis: &'a Option<AnalysisRecord>,
    embeddings: &'a Option<Vec<f64>>,
    prev_hash: Option<&'a str>,
}

impl InteractionEvent {
    /// Canonical bytes hashed into `row_hash` for a given predecessor.
    pub fn canonical_bytes(&self, prev_hash: Option<&str>) -> Result<Vec<u8>> {
        let payload = CanonicalPayload {
            id: &self.id,
            session_id: &self.session_id,
            owner: &self.owner,
            model_vendor: &self.model_vendor,
            model_name: &self.model_name,
            timestamp: self.timestamp,
            prompt: &self.prompt,
            response: &self.response,
            metadata: &self.metadata,
            analysis: &self.analysis,
            embeddings: &self.embeddings,
            prev_hash,
        };
        Ok(canonical_bytes(&payload)?)
    }

    /// Recompute the row hash against an expected predecessor.
    pub fn compute_row_hash(&self, prev_hash: Option<&str>) -> Result<String> {
        Ok(sha256_hex(&self.canonical_bytes(prev_hash)?))
    }
}

/// Ingestion input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestRequest {
    pub session_id: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub model_vendor: String,
    #[serde(default)]
    pub model_name: String,
    pub prompt: String,
    pub response: String,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub analysis: Option<AnalysisRecord>,
    #[serde(default)]
    pub embeddings: Option<Vec<f64>>,
}

impl IngestRequest {
    pub fn new(
        session_id: impl Into<String>,
        prompt: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            prompt: prompt.into(),
            response: response.into(),
            ..Default::default()
        }
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn model(mut self, vendor: impl Into<String>, name: impl Into<String>) -> Self {
        self.model_vendor = vendor.into();
        self.model_name = name.into();
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata
            .get_or_insert_with(Metadata::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn analysis(mut self, analysis: AnalysisRecord) -> Self {
        self.analysis = Some(analysis);
        self
    }

    pub fn embeddings(mut self, embeddings: Vec<f64>) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    /// `session_id`, `prompt` and `response` must be non-blank.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("session_id", &self.session_id),
            ("prompt", &self.prompt),
            ("response", &self.response),
        ] {
            if value.trim().is_empty() {
                return Err(CoreError::invalid_field(field, "must not be empty"));
            }
        }
        if let Some(embeddings) = &self.embeddings {
            if embeddings.iter().any(|v| !v.is_finite()) {
                return Err(CoreError::invalid_field(
                    "embeddings",
                    "must contain only finite values",
                ));
            }
        }
        if let Some(analysis) = &self.analysis {
            analysis.validate()?;
        }
        Ok(())
    }
}

/// Returned to the caller after a successful append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReceipt {
    pub event_id: String,
    pub session_id: String,
    pub timestamp: TimestampMs,
    pub ledger: LedgerBlock,
}
