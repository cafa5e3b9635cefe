// SPDX-License-Identifier: Apache-2.0

// types.rs for jsix
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JsixError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CUDA error: {0}")]
    Cuda(String),
    #[error("Invalid PTX code: {0}")]
    InvalidPtx(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, JsixError>;

/// Classification masks for one 64-byte chunk.
///
/// Bit `k` of each mask refers to byte `k` of the chunk, LSB first, so a
/// chunk starting at input offset `i * 64` describes bytes `i*64 + k`.
/// Invariant: `quote` is a subset of `structural`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkMasks {
    /// `{ } [ ] : ,` and `"`
    pub structural: u64,
    /// `"` only
    pub quote: u64,
    /// `\` only
    pub backslash: u64,
}

/// Outcome of a structural scan.
///
/// `count` entries of the caller's `positions`/`characters` arrays are valid.
/// `truncated` is set when output capacity ran out before the input was fully
/// consumed; `count` then reflects the truncation point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindResult {
    pub count: usize,
    pub truncated: bool,
}

/// Backend selector for a [`Stage1Context`](crate::dispatch::Stage1Context).
///
/// A plain tag, not a trait object: both backends expose identical behavior
/// and the orchestrator branches on this at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backend {
    Cpu,
    Gpu,
}
