//! The error taxonomy for rule violations. Programming faults (out-of-range
//! indices, malformed scoreboard input, internal invariants) are
//! `debug_assert!`/`assert!` panics, never a variant here — a caller that
//! trips one has a bug, not a rule violation to recover from.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KonkanError {
    #[error("illegal draw: {0}")]
    IllegalDraw(String),
    #[error("illegal discard: {0}")]
    IllegalDiscard(String),
    #[error("illegal laydown: {0}")]
    IllegalLaydown(String),
    #[error("illegal sarf: {0}")]
    IllegalSarf(String),
}

pub type KonkanResult<T> = Result<T, KonkanError>;
