//! A distributed multi-dimensional array runtime: dense N-dimensional
//! arrays partitioned across multiple device-like shards, with
//! element-wise and reduction kernels dispatched in parallel over the
//! resident shards and overlap reconciled through a lazy, mode-aware
//! update protocol.
//!
//! - [`index`]: index algebra over strided slices (chunk-index
//!   normalization, intersection, sub-indexing).
//! - [`mode`]: the `Replica`/operator-mode reconciliation registry.
//! - [`chunk`]: the per-device shard: data-or-placeholder, readiness
//!   event, pending updates.
//! - [`transfer`]: cross-device copies, optionally via a collective
//!   backend.
//! - [`array`]: [`array::DistributedArray`], the top-level type: mode
//!   conversion, resharding, materialization.
//! - [`kernel`]: element-wise and reduction kernel dispatch.
//! - [`runtime`]: the underlying device/stream/event vocabulary and its
//!   in-process simulated backend.

use smallvec::SmallVec;

pub mod array;
pub mod chunk;
pub mod error;
pub mod index;
pub mod kernel;
pub mod mode;
pub mod numeric;
pub mod runtime;
pub mod transfer;
mod util;

const COORD_SMALLVEC_SIZE: usize = 6;

pub type CoordVec<T> = SmallVec<[T; COORD_SMALLVEC_SIZE]>;

pub mod prelude {
    //! Re-exports of the types most call sites need.
    pub use crate::array::{DistributedArray, DistributedArrayBuilder, IndexMap, IndexMapBuilder};
    pub use crate::chunk::{Chunk, ChunkData};
    pub use crate::error::DistError;
    pub use crate::index::{normalize, ChunkIndex, IndexTerm, Slice};
    pub use crate::kernel::{elementwise, reduce, ElementwiseKernel, Operand, ReductionKernel};
    pub use crate::mode::{Mode, OpKind};
    pub use crate::numeric::Numeric;
    pub use crate::runtime::{DeviceId, DevicePool};
    pub use crate::transfer::{create_communicators, Comms};
}
