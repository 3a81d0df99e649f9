//! Error taxonomy, unified into one `thiserror` enum since the kernel
//! executor is the single caller-facing surface for this crate.

use thiserror::Error;

use crate::CoordVec;

#[derive(Error, Debug)]
pub enum DistError {
    #[error(
        "too many indices for array: array is {ndim}-dimensional, but {given} were indexed"
    )]
    TooManyIndices { ndim: usize, given: usize },

    #[error("index {index} is out of bounds for axis {axis} with size {size}")]
    IndexOutOfBounds { axis: usize, index: u64, size: u64 },

    #[error("slice step must be a positive integer on axis {axis}")]
    InvalidStep { axis: usize },

    #[error("the index is empty on axis {axis}")]
    EmptySlice { axis: usize },

    #[error("operand shapes disagree: {a:?} vs {b:?}")]
    ShapeMismatch { a: CoordVec<u64>, b: CoordVec<u64> },

    #[error("chunk shape {chunk:?} does not match the shape implied by its index {expected:?}")]
    ChunkShapeMismatch {
        chunk: CoordVec<u64>,
        expected: CoordVec<u64>,
    },

    #[error("mixing a non-distributed operand with distributed operands is not supported")]
    NotDistributed,

    #[error("index map does not cover shape {shape:?}")]
    IncompleteCoverage { shape: CoordVec<u64> },

    #[error(
        "reduction kernel `{0}` has no declared identity and its operator is not idempotent"
    )]
    NoIdentity(&'static str),

    #[error("peer-access fallback supports at most 2 positional operands and no keyed operands")]
    PeerAccessArity,

    #[error("kernel returned more than one output")]
    MultipleOutputs,

    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error("transfer failed: {0}")]
    Transfer(String),
}
