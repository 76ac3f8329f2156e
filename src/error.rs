//! Crate-wide error taxonomy.
//!
//! Every fallible operation in the core (ring, node, orchestrator, receiver)
//! returns a [`StorageError`]. Fan-out operations that touch several nodes
//! or sectors in parallel collapse their sibling failures into `Composite`
//! rather than surfacing only the first one seen.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("node capacity exceeded")]
    Capacity,

    #[error("chunk exceeds the {0}-byte ceiling")]
    TooLarge(usize),

    #[error("checksum mismatch")]
    Checksum,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no ready node in ring")]
    NoReadyNode,

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0} of {1} parallel operations failed: {2}")]
    Composite(usize, usize, Box<StorageError>),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Reduce a batch of fallible results into `Ok(values)` or a `Composite`
/// error carrying the count and the first failure observed.
///
/// This is the one place the fan-out failure policy described by the core
/// (§5, §7) is centralized: every parallel operation in the orchestrator,
/// node join, and receiver funnels its sibling results through here.
pub fn collect_results<T>(results: Vec<Result<T>>) -> Result<Vec<T>> {
    let total = results.len();
    let mut ok = Vec::with_capacity(total);
    let mut first_err = None;
    let mut failed = 0;

    for r in results {
        match r {
            Ok(v) => ok.push(v),
            Err(e) => {
                failed += 1;
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }

    match first_err {
        None => Ok(ok),
        Some(e) => Err(StorageError::Composite(failed, total, Box::new(e))),
    }
}
