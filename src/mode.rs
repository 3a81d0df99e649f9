//! The reconciliation-mode registry: a fixed, small enumeration rather than
//! virtual dispatch. Adding a mode means adding a variant, not a new trait
//! implementor.

use num_traits::Zero;

use crate::numeric::Numeric;

/// A commutative, associative binary operator with a known identity,
/// carried as a tag rather than a closure so that `Mode` stays `Copy` and
/// comparable.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// `⊕ = +`, `e = 0`. Not idempotent: overlapping contributions must be
    /// partitioned, never duplicated.
    Sum,
    /// `⊕ = max`, `e = -∞` (or the dtype's minimum for integers).
    /// Idempotent: `max(x, x) == x`, so overlapping shards may duplicate
    /// contributions safely.
    Max,
}

impl OpKind {
    /// Whether `⊕(x, x) == x`. Idempotent operators can be broadcast back
    /// out to `Replica` by re-running the same fold instead of needing a
    /// separate zero-out step.
    pub fn is_idempotent(self) -> bool {
        match self {
            OpKind::Sum => false,
            OpKind::Max => true,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OpKind::Sum => "sum",
            OpKind::Max => "max",
        }
    }

    pub fn apply<T: Numeric>(self, a: T, b: T) -> T {
        match self {
            OpKind::Sum => a + b,
            OpKind::Max => {
                if a > b {
                    a
                } else {
                    b
                }
            }
        }
    }

    pub fn identity<T: Numeric>(self) -> T {
        match self {
            OpKind::Sum => T::zero(),
            OpKind::Max => T::neg_infinity_identity(),
        }
    }
}

/// The reconciliation discipline over a distributed array's overlapping
/// shards.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Every coordinate covered by >= 1 shard; overlapping shards hold
    /// equal values at overlapping coordinates.
    Replica,
    /// Folding all shards with `op`'s `⊕` and identity equals the logical
    /// global value; overlapping coordinates partition contribution
    /// (except for idempotent operators, where duplication is harmless).
    Op(OpKind),
}

impl Mode {
    pub const SUM: Mode = Mode::Op(OpKind::Sum);
    pub const MAX: Mode = Mode::Op(OpKind::Max);

    pub fn is_replica(self) -> bool {
        matches!(self, Mode::Replica)
    }

    pub fn op(self) -> Option<OpKind> {
        match self {
            Mode::Replica => None,
            Mode::Op(op) => Some(op),
        }
    }
}
