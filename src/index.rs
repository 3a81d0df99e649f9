//! Index algebra over strided slices.
//!
//! Chunk indices are tuples of normalized, non-negative, positive-step
//! slices: the coordinate rectangle a shard covers in the global array.
//! Everything here is exact integer arithmetic (extended Euclid for
//! intersections) since overlap reasoning for strided shardings cannot
//! tolerate floating-point approximation.

use ndarray::{IxDyn, SliceInfo, SliceInfoElem};
use serde::{Deserialize, Serialize};

use crate::error::DistError;
use crate::util::extgcd;
use crate::CoordVec;

/// One axis of a chunk index: the arithmetic progression
/// `start, start + step, start + 2*step, ...` stopping before `stop`.
///
/// Chunk-index slices always have `0 <= start < stop <= length` and
/// `step >= 1`; update indices (sub-regions of an already-materialized
/// buffer) are expressed with the same type since they arise only from
/// [`index_for_subindex`], which never produces a negative step or an
/// empty range.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slice {
    pub start: u64,
    pub stop: u64,
    pub step: u64,
}

impl Slice {
    pub fn new(start: u64, stop: u64, step: u64) -> Self {
        Self { start, stop, step }
    }

    /// Number of elements the slice visits.
    pub fn len(&self) -> u64 {
        (self.stop - self.start - 1) / self.step + 1
    }

    pub fn is_empty(&self) -> bool {
        self.stop <= self.start
    }
}

/// One term of a raw, not-yet-normalized index: either a single integer
/// coordinate or a Python-slice-like `(start, stop, step)` triple with
/// negative-from-end semantics on `start`/`stop`.
#[derive(Copy, Clone, Debug)]
pub enum IndexTerm {
    Int(u64),
    Slice {
        start: Option<i64>,
        stop: Option<i64>,
        step: Option<i64>,
    },
}

impl IndexTerm {
    pub fn full() -> Self {
        IndexTerm::Slice {
            start: None,
            stop: None,
            step: None,
        }
    }
}

/// Resolve a possibly-partial, possibly-negative-indexed slice against an
/// axis of the given `length`, the way Python's `slice.indices(length)`
/// does, restricted to positive steps (chunk indices forbid negative
/// steps outright).
fn resolve_slice(
    start: Option<i64>,
    stop: Option<i64>,
    step: Option<i64>,
    length: u64,
    axis: usize,
) -> Result<(u64, u64, u64), DistError> {
    let len = length as i64;
    let step = step.unwrap_or(1);
    if step <= 0 {
        return Err(DistError::InvalidStep { axis });
    }

    let resolve = |v: Option<i64>, default: i64| match v {
        None => default,
        Some(x) if x < 0 => (x + len).max(0),
        Some(x) => x.min(len),
    };

    let start = resolve(start, 0);
    let stop = resolve(stop, len);

    if stop <= start {
        return Err(DistError::EmptySlice { axis });
    }

    Ok((start as u64, stop as u64, step as u64))
}

/// A tuple of normalized slices describing the global coordinates of a
/// shard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkIndex(CoordVec<Slice>);

impl FromIterator<Slice> for ChunkIndex {
    fn from_iter<T: IntoIterator<Item = Slice>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl std::ops::Deref for ChunkIndex {
    type Target = [Slice];

    fn deref(&self) -> &[Slice] {
        &self.0
    }
}

impl ChunkIndex {
    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    /// The shape of the region this index describes.
    pub fn shape(&self) -> CoordVec<u64> {
        self.0.iter().map(Slice::len).collect()
    }

    /// [`Self::shape`] as `usize`s, for allocating an `ndarray` buffer.
    pub fn shape_usize(&self) -> Vec<usize> {
        self.0.iter().map(|s| s.len() as usize).collect()
    }

    /// An `ndarray` slicing descriptor that indexes the axis-aligned
    /// rectangle this chunk index covers out of a buffer shaped like the
    /// global array.
    pub fn slice_info(&self) -> SliceInfo<Vec<SliceInfoElem>, IxDyn, IxDyn> {
        let elems: Vec<SliceInfoElem> = self
            .0
            .iter()
            .map(|s| SliceInfoElem::Slice {
                start: s.start as isize,
                end: Some(s.stop as isize),
                step: s.step as isize,
            })
            .collect();
        SliceInfo::try_from(elems).expect("chunk index always yields a valid slice")
    }
}

/// Accept an integer, a slice, or a tuple of either (shorter than `ndim`,
/// padded on the right with full slices), and produce a normalized chunk
/// index. Rejects negative steps, empty ranges, too many dimensions, and
/// out-of-bounds integers.
pub fn normalize(shape: &[u64], idx: &[IndexTerm]) -> Result<ChunkIndex, DistError> {
    let ndim = shape.len();
    if idx.len() > ndim {
        return Err(DistError::TooManyIndices {
            ndim,
            given: idx.len(),
        });
    }

    let mut slices = CoordVec::with_capacity(ndim);
    for axis in 0..ndim {
        let term = idx.get(axis).copied().unwrap_or_else(IndexTerm::full);
        let length = shape[axis];
        let slice = match term {
            IndexTerm::Int(k) => {
                if k >= length {
                    return Err(DistError::IndexOutOfBounds {
                        axis,
                        index: k,
                        size: length,
                    });
                }
                Slice::new(k, k + 1, 1)
            }
            IndexTerm::Slice { start, stop, step } => {
                let (start, stop, step) = resolve_slice(start, stop, step, length, axis)?;
                Slice::new(start, stop, step)
            }
        };
        slices.push(slice);
    }
    Ok(ChunkIndex(slices))
}

/// Returns the intersection of two arithmetic progressions on `[0, length)`
/// as a single slice, or `None` if they are disjoint. Computed via the
/// extended Euclidean algorithm: with `g = gcd(a.step, b.step)`, a solution
/// exists iff `(b.start - a.start) mod g == 0`; the intersection has step
/// `lcm(a.step, b.step)` and starts at the least common element
/// `>= max(a.start, b.start)`.
pub fn slice_intersection(a: Slice, b: Slice, length: u64) -> Option<Slice> {
    debug_assert!(a.stop <= length && b.stop <= length);

    let (a_start, a_stop, a_step) = (a.start as i64, a.stop as i64, a.step as i64);
    let (b_start, b_stop, b_step) = (b.start as i64, b.stop as i64, b.step as i64);

    let (g, x) = extgcd(a_step, b_step);
    if (b_start - a_start).rem_euclid(g) != 0 {
        return None;
    }

    let c_step = a_step / g * b_step;
    let a_skip = (x * (b_start - a_start).div_euclid(g)).rem_euclid(c_step / a_step);
    let mut c_start = a_start + a_step * a_skip;
    if c_start < b_start {
        c_start += ((b_start - c_start - 1).div_euclid(c_step) + 1) * c_step;
    }
    let c_stop = a_stop.min(b_stop);

    if c_start < c_stop {
        Some(Slice::new(c_start as u64, c_stop as u64, c_step as u64))
    } else {
        None
    }
}

/// Dimension-wise [`slice_intersection`]; empty (`None`) if any axis is
/// empty.
pub fn index_intersection(a: &ChunkIndex, b: &ChunkIndex, shape: &[u64]) -> Option<ChunkIndex> {
    debug_assert_eq!(a.ndim(), shape.len());
    debug_assert_eq!(b.ndim(), shape.len());

    let mut out = CoordVec::with_capacity(shape.len());
    for ((&sa, &sb), &length) in a.iter().zip(b.iter()).zip(shape.iter()) {
        out.push(slice_intersection(sa, sb, length)?);
    }
    Some(ChunkIndex(out))
}

/// Given `sub` contained within `outer` (as arithmetic progressions on
/// `[0, length)`), returns the slice `c` such that indexing a buffer shaped
/// by `outer` with `c` yields the elements at `sub`.
pub fn slice_for_subslice(outer: Slice, sub: Slice) -> Slice {
    let c_start = (sub.start - outer.start) / outer.step;
    let c_step = sub.step / outer.step;
    let c_stop = (sub.stop - outer.start - 1) / outer.step + 1;
    Slice::new(c_start, c_stop, c_step)
}

/// Dimension-wise [`slice_for_subslice`].
pub fn index_for_subindex(outer: &ChunkIndex, sub: &ChunkIndex) -> ChunkIndex {
    debug_assert_eq!(outer.ndim(), sub.ndim());
    outer
        .iter()
        .zip(sub.iter())
        .map(|(&o, &s)| slice_for_subslice(o, s))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(shape: &[u64], terms: &[IndexTerm]) -> ChunkIndex {
        normalize(shape, terms).unwrap()
    }

    #[test]
    fn normalize_pads_trailing_dims() {
        let shape = [4u64, 5];
        let ci = idx(&shape, &[IndexTerm::Int(1)]);
        assert_eq!(ci.shape(), CoordVec::from_iter([1, 5]));
    }

    #[test]
    fn normalize_rejects_too_many_dims() {
        let shape = [4u64];
        let err = normalize(&shape, &[IndexTerm::Int(0), IndexTerm::Int(0)]).unwrap_err();
        assert!(matches!(err, DistError::TooManyIndices { .. }));
    }

    #[test]
    fn normalize_rejects_out_of_bounds_int() {
        let shape = [4u64];
        let err = normalize(&shape, &[IndexTerm::Int(4)]).unwrap_err();
        assert!(matches!(err, DistError::IndexOutOfBounds { .. }));
    }

    #[test]
    fn normalize_rejects_negative_step() {
        let shape = [4u64];
        let term = IndexTerm::Slice {
            start: None,
            stop: None,
            step: Some(-1),
        };
        let err = normalize(&shape, &[term]).unwrap_err();
        assert!(matches!(err, DistError::InvalidStep { .. }));
    }

    #[test]
    fn normalize_rejects_empty_slice() {
        let shape = [4u64];
        let term = IndexTerm::Slice {
            start: Some(2),
            stop: Some(2),
            step: None,
        };
        let err = normalize(&shape, &[term]).unwrap_err();
        assert!(matches!(err, DistError::EmptySlice { .. }));
    }

    #[test]
    fn intersection_is_commutative() {
        let shape = [10u64];
        let a = idx(
            &shape,
            &[IndexTerm::Slice {
                start: Some(0),
                stop: Some(10),
                step: Some(2),
            }],
        );
        let b = idx(
            &shape,
            &[IndexTerm::Slice {
                start: Some(1),
                stop: Some(10),
                step: Some(3),
            }],
        );
        let ab = index_intersection(&a, &b, &shape);
        let ba = index_intersection(&b, &a, &shape);
        assert_eq!(
            ab.map(|c| c.shape()).unwrap_or_default(),
            ba.map(|c| c.shape()).unwrap_or_default()
        );
    }

    #[test]
    fn even_odd_strides_are_disjoint() {
        let shape = [6u64];
        let evens = idx(
            &shape,
            &[IndexTerm::Slice {
                start: Some(0),
                stop: None,
                step: Some(2),
            }],
        );
        let odds = idx(
            &shape,
            &[IndexTerm::Slice {
                start: Some(1),
                stop: None,
                step: Some(2),
            }],
        );
        assert!(index_intersection(&evens, &odds, &shape).is_none());
    }

    #[test]
    fn coprime_steps_intersect_on_lcm_lattice() {
        let shape = [12u64];
        let by2 = idx(
            &shape,
            &[IndexTerm::Slice {
                start: Some(0),
                stop: None,
                step: Some(2),
            }],
        );
        let by3 = idx(
            &shape,
            &[IndexTerm::Slice {
                start: Some(0),
                stop: None,
                step: Some(3),
            }],
        );
        let inter = index_intersection(&by2, &by3, &shape).unwrap();
        assert_eq!(inter[0].step, 6);
        assert_eq!(inter[0].start, 0);
    }

    #[test]
    fn subslice_round_trip_visits_exact_elements() {
        let shape = [20u64];
        let outer = idx(
            &shape,
            &[IndexTerm::Slice {
                start: Some(2),
                stop: Some(18),
                step: Some(3),
            }],
        );
        let sub = idx(
            &shape,
            &[IndexTerm::Slice {
                start: Some(5),
                stop: Some(17),
                step: Some(6),
            }],
        );
        let outer_vals: Vec<u64> = {
            let s = outer[0];
            (0..s.len()).map(|i| s.start + i * s.step).collect()
        };
        let rebased = index_for_subindex(&outer, &sub);
        let c = rebased[0];
        let picked: Vec<u64> = (0..c.len())
            .map(|i| outer_vals[(c.start + i * c.step) as usize])
            .collect();
        let sub_vals: Vec<u64> = {
            let s = sub[0];
            (0..s.len()).map(|i| s.start + i * s.step).collect()
        };
        assert_eq!(picked, sub_vals);
    }

    #[test]
    fn chunk_index_round_trips_through_json() {
        let shape = [10u64, 20];
        let ci = idx(
            &shape,
            &[
                IndexTerm::Slice {
                    start: Some(2),
                    stop: Some(8),
                    step: Some(2),
                },
                IndexTerm::Int(4),
            ],
        );
        let text = serde_json::to_string(&ci).unwrap();
        let back: ChunkIndex = serde_json::from_str(&text).unwrap();
        assert_eq!(ci, back);
    }
}
