//! Seam for the external analysis heuristics collaborator.

use crate::event::{AnalysisRecord, InteractionEvent};

/// Produces the `analysis` record for an interaction from its session history.
///
/// Implementations live outside this crate. The ledger invokes the installed
/// collaborator only when the ingest request carries no analysis of its own.
pub trait AnalysisHeuristics: Send + Sync {
    fn analyze(
        &self,
        prompt: &str,
        response: &str,
        history: &[InteractionEvent],
    ) -> Option<AnalysisRecord>;
}
