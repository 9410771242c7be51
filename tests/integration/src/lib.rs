//! End-to-end tests across the trust protocol crates
//!
//! This test suite validates:
//! - Ledger hash chains under append, tamper and out-of-band SQL
//! - Declaration signing, verification and integrity checks
//! - Validator admission and weighted consensus
//! - Trust bridge establishment, interaction, decay and expiry

pub mod test_utils;

#[cfg(test)]
mod ledger_tests;

#[cfg(test)]
mod declaration_tests;

#[cfg(test)]
mod consensus_tests;

#[cfg(test)]
mod bridge_tests;
