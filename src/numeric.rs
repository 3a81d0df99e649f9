//! The element type shards are built from.
//!
//! A closed trait implemented for the handful of primitives a shard buffer
//! can hold, rather than threading a dtype enum through every buffer
//! operation: the numeric primitives implement this trait directly, and
//! mode identities are derived from it.

use num_traits::{Bounded, Num};

/// A primitive that can be held in a shard buffer and folded by an
/// [operator mode][crate::mode::OpKind].
///
/// `neg_infinity_identity` stands in for the identity of `Max` mode: for
/// floating-point types this is genuinely `-∞`; for integer types, which have
/// no such value, it is the minimum representable value, following the same
/// convention NumPy's `np.iinfo(dtype).min` uses for integer `amax` identity.
pub trait Numeric: Num + Bounded + Copy + PartialOrd + std::fmt::Debug + Send + Sync + 'static {
    fn neg_infinity_identity() -> Self;
}

macro_rules! impl_numeric_float {
    ($t:ty) => {
        impl Numeric for $t {
            fn neg_infinity_identity() -> Self {
                <$t>::NEG_INFINITY
            }
        }
    };
}

macro_rules! impl_numeric_int {
    ($t:ty) => {
        impl Numeric for $t {
            fn neg_infinity_identity() -> Self {
                <$t as Bounded>::min_value()
            }
        }
    };
}

impl_numeric_float!(f32);
impl_numeric_float!(f64);
impl_numeric_int!(i16);
impl_numeric_int!(i32);
impl_numeric_int!(i64);
impl_numeric_int!(u16);
impl_numeric_int!(u32);
impl_numeric_int!(u64);
