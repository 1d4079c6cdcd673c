//! Cycle-level error type for the control loop.

use std::fmt;

/// Failure that aborts one reconciliation cycle. Per-client apply failures
/// are not cycle errors; they are isolated and logged where they happen.
#[derive(Debug)]
pub enum CycleError {
    /// A module failed to produce its reduction value.
    Reduction {
        module: &'static str,
        source: anyhow::Error,
    },
    /// A client failed to report its active-torrent count.
    ActiveCount {
        client: String,
        source: anyhow::Error,
    },
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleError::Reduction { module, source } => {
                write!(f, "reduction query failed for module {}: {:#}", module, source)
            }
            CycleError::ActiveCount { client, source } => {
                write!(f, "active torrent count failed for {}: {:#}", client, source)
            }
        }
    }
}

impl std::error::Error for CycleError {}
