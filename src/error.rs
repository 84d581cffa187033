//! Error taxonomy for the kitchen display engine.
//!
//! Fetch and mutation failures are caught at the store boundary and turned
//! into board state; they are never left to bubble out of the engine as
//! unhandled errors. Malformed legacy combo text is not an error at all,
//! only a warning during decomposition.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KdsError {
    /// Network or query failure while refreshing the board. Non-fatal: the
    /// store keeps its last good snapshot and surfaces a single message.
    #[error("data fetch failed: {0}")]
    DataFetch(String),

    /// A backend write failed. Triggers rollback of the optimistic local
    /// mutation that initiated it.
    #[error("mutation failed: {0}")]
    Mutation(String),

    /// The backend client could not be constructed or is missing required
    /// connection settings.
    #[error("backend not configured: {0}")]
    Config(String),
}

impl KdsError {
    /// Message form stored in board state for the error indicator.
    pub fn surface_message(&self) -> String {
        self.to_string()
    }
}
