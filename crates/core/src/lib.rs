//! Core functionality for the trust protocol.
//!
//! This crate provides the error taxonomy, configuration, logging setup,
//! canonical encoding and the hash-chained interaction ledger used across
//! the trustproto workspace.

pub mod analysis;
pub mod canonical;
pub mod config;
pub mod error;
pub mod event;
pub mod ledger;
pub mod logging;
pub mod types;

pub use analysis::AnalysisHeuristics;
pub use config::{
    BridgeConfig, ConsensusConfig, LedgerConfig, LoggingConfig, ProtocolConfig, SigningConfig,
};
pub use error::{CoreError, ErrorKind, Result};
pub use event::{
    AnalysisRecord, IngestReceipt, IngestRequest, InteractionEvent, LedgerBlock, Metadata,
    Sentiment, SentimentLabel,
};
pub use ledger::{
    BreakReason, ChainBreak, ChainVerification, HashChainLedger, LedgerError, LedgerMetrics,
    LedgerPage,
};
pub use types::{clamp01, now_ms, TimestampMs, MS_PER_DAY};
