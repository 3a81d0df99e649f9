//! Dispatch of element-wise and reduction kernels over shards.
//!
//! This is the control-flow hub the whole crate exists to serve: kernels
//! arrive here, operands are normalized to a common mode, the kernel runs
//! locally per shard, and the output inherits (or rewrites) the operand
//! index map.

use std::collections::HashMap;

use ndarray::ArrayD;
use num_traits::Zero;

use crate::array::{index_map_from_chunks, DistributedArray};
use crate::chunk::{Chunk, ChunkData};
use crate::error::DistError;
use crate::index::{index_for_subindex, index_intersection};
use crate::mode::{Mode, OpKind};
use crate::numeric::Numeric;
use crate::runtime::DeviceId;

/// An operand to an element-wise kernel: either a distributed array, or a
/// plain host array. Mixing the two is rejected as [`DistError::NotDistributed`].
pub enum Operand<'a, T: Numeric> {
    Distributed(&'a DistributedArray<T>),
    Host(ArrayD<T>),
}

/// A commutative-associative element-wise kernel applied per-coordinate
/// across N same-shaped input arrays: the distributed-array analogue of a
/// NumPy ufunc.
pub struct ElementwiseKernel<T: Numeric> {
    pub name: &'static str,
    f: Box<dyn Fn(&[T]) -> T>,
}

impl<T: Numeric> ElementwiseKernel<T> {
    pub fn binary(name: &'static str, f: impl Fn(T, T) -> T + 'static) -> Self {
        Self {
            name,
            f: Box::new(move |xs: &[T]| f(xs[0], xs[1])),
        }
    }

    pub fn unary(name: &'static str, f: impl Fn(T) -> T + 'static) -> Self {
        Self {
            name,
            f: Box::new(move |xs: &[T]| f(xs[0])),
        }
    }

    /// Applies the kernel element-by-element across `inputs`, all
    /// required to share a shape. Iterates in logical (not memory) order
    /// via `ArrayD::iter`, so it is correct regardless of the inputs'
    /// underlying strides.
    fn apply(&self, inputs: &[ArrayD<T>]) -> ArrayD<T> {
        let shape = inputs[0].raw_dim();
        let mut iters: Vec<_> = inputs.iter().map(|a| a.iter()).collect();
        let mut out_data = Vec::with_capacity(inputs[0].len());
        let mut buf = vec![T::zero(); inputs.len()];
        'outer: loop {
            for (slot, it) in buf.iter_mut().zip(iters.iter_mut()) {
                match it.next() {
                    Some(&v) => *slot = v,
                    None => break 'outer,
                }
            }
            out_data.push((self.f)(&buf));
        }
        ArrayD::from_shape_vec(shape, out_data).expect("inputs share a shape")
    }
}

/// A commutative-associative reduction kernel bound to an axis.
pub struct ReductionKernel {
    pub op: OpKind,
    pub axis: usize,
}

impl ReductionKernel {
    pub fn new(op: OpKind, axis: usize) -> Self {
        Self { op, axis }
    }

    fn apply<T: Numeric>(&self, input: &ArrayD<T>) -> ArrayD<T> {
        input.fold_axis(ndarray::Axis(self.axis), self.op.identity::<T>(), |&acc, &x| {
            self.op.apply(acc, x)
        })
    }
}

/// Element-wise kernel dispatch entry point.
pub fn elementwise<T: Numeric>(
    kernel: &ElementwiseKernel<T>,
    operands: &[Operand<T>],
) -> Result<DistributedArray<T>, DistError> {
    if operands.iter().any(|o| matches!(o, Operand::Host(_))) {
        return Err(DistError::NotDistributed);
    }
    let arrs: Vec<&DistributedArray<T>> = operands
        .iter()
        .map(|o| match o {
            Operand::Distributed(a) => *a,
            Operand::Host(_) => unreachable!("checked above"),
        })
        .collect();

    let shape = arrs[0].shape().to_vec();
    for a in &arrs[1..] {
        if a.shape() != shape.as_slice() {
            return Err(DistError::ShapeMismatch {
                a: shape.iter().copied().collect(),
                b: a.shape().iter().copied().collect(),
            });
        }
    }

    let same_map = arrs.windows(2).all(|w| w[0].index_map() == w[1].index_map());

    if same_map {
        elementwise_same_map(kernel, &arrs)
    } else if arrs.len() == 2 {
        elementwise_peer_access(kernel, arrs[0], arrs[1])
    } else {
        Err(DistError::PeerAccessArity)
    }
}

fn elementwise_same_map<T: Numeric>(
    kernel: &ElementwiseKernel<T>,
    arrs: &[&DistributedArray<T>],
) -> Result<DistributedArray<T>, DistError> {
    let replicas: Vec<DistributedArray<T>> = arrs
        .iter()
        .map(|a| a.to_mode(Mode::Replica))
        .collect::<Result<_, _>>()?;
    let index_map = replicas[0].index_map().clone();
    let pool = replicas[0].pool_handle();
    let comms = replicas[0].comms_handle();
    let shape: crate::CoordVec<u64> = replicas[0].shape().iter().copied().collect();

    let mut out_chunks: HashMap<DeviceId, Vec<Chunk<T>>> = HashMap::new();
    for device in index_map.devices() {
        let n_pos = index_map.get(device).len();
        let mut dev_out = Vec::with_capacity(n_pos);
        for pos in 0..n_pos {
            let operand_chunks: Vec<&Chunk<T>> = replicas
                .iter()
                .map(|r| &r.chunks_ref()[&device][pos])
                .collect();
            let n_with_updates = operand_chunks.iter().filter(|c| !c.updates.is_empty()).count();

            let base_chunks: Vec<Chunk<T>>;
            let mut surviving_update = None;
            if n_with_updates > 1 {
                let mut resolved = Vec::with_capacity(operand_chunks.len());
                for c in &operand_chunks {
                    let mut c2 = (*c).clone();
                    let mut pool_ref = pool.borrow_mut();
                    let stream = pool_ref.stream(device);
                    c2.apply_updates(Mode::Replica, stream)?;
                    resolved.push(c2);
                }
                base_chunks = resolved;
            } else {
                if let Some((i, c)) = operand_chunks
                    .iter()
                    .enumerate()
                    .find(|(_, c)| !c.updates.is_empty())
                {
                    surviving_update = Some((i, c.updates[0].clone()));
                }
                base_chunks = operand_chunks.iter().map(|c| (*c).clone()).collect();
            }

            let any_placeholder = base_chunks.iter().any(|c| c.is_placeholder());
            let out_index = base_chunks[0].index().clone();
            let out_data = if any_placeholder {
                ChunkData::Placeholder {
                    shape: out_index.shape(),
                    device,
                }
            } else {
                let bufs: Vec<ArrayD<T>> = base_chunks
                    .iter()
                    .map(|c| c.data().buffer().unwrap().clone())
                    .collect();
                ChunkData::Buffer(kernel.apply(&bufs))
            };
            let ready = {
                let mut pool_ref = pool.borrow_mut();
                pool_ref.stream(device).record()
            };
            let mut out_chunk = match &out_data {
                ChunkData::Buffer(b) => Chunk::from_buffer(out_index.clone(), device, b.clone(), ready)?,
                ChunkData::Placeholder { .. } => {
                    crate::chunk::Chunk::placeholder(out_index.clone(), device, ready)
                }
            };

            if let Some((operand_idx, update)) = surviving_update {
                let mut sub_inputs: Vec<ArrayD<T>> = Vec::with_capacity(base_chunks.len());
                for (k, c) in base_chunks.iter().enumerate() {
                    if k == operand_idx {
                        sub_inputs.push(update.data.clone());
                    } else if let Some(buf) = c.data().buffer() {
                        sub_inputs.push(buf.slice(update.local_idx.slice_info()).to_owned());
                    } else {
                        sub_inputs.push(ArrayD::from_elem(
                            ndarray::IxDyn(&update.local_idx.shape_usize()),
                            T::zero(),
                        ));
                    }
                }
                let sub_result = kernel.apply(&sub_inputs);
                out_chunk.add_update(sub_result, update.ready, update.local_idx.clone());
            }
            dev_out.push(out_chunk);
        }
        out_chunks.insert(device, dev_out);
    }

    Ok(DistributedArray::from_parts(
        shape, Mode::Replica, index_map, out_chunks, comms, pool,
    ))
}

/// Binary-only fallback used when operands don't share an `index_map`:
/// directly invokes the kernel across the overlap of every pair of
/// shards from the two operands.
fn elementwise_peer_access<T: Numeric>(
    kernel: &ElementwiseKernel<T>,
    a: &DistributedArray<T>,
    b: &DistributedArray<T>,
) -> Result<DistributedArray<T>, DistError> {
    let a_rep = a.to_mode(Mode::Replica)?;
    let b_rep = b.to_mode(Mode::Replica)?;
    let pool = a_rep.pool_handle();
    let comms = a_rep.comms_handle();
    let shape: crate::CoordVec<u64> = a_rep.shape().iter().copied().collect();

    let mut out_chunks: HashMap<DeviceId, Vec<Chunk<T>>> = HashMap::new();
    for device in a_rep.index_map().devices() {
        let mut dev_out = Vec::new();
        for a_chunk in &a_rep.chunks_ref()[&device] {
            let dims = a_chunk.index().shape_usize();
            let mut out_buf = ArrayD::from_elem(ndarray::IxDyn(&dims), T::zero());
            for bdevice in b_rep.index_map().devices() {
                for b_chunk in &b_rep.chunks_ref()[&bdevice] {
                    if let Some(inter) = index_intersection(a_chunk.index(), b_chunk.index(), &shape) {
                        let local_a = index_for_subindex(a_chunk.index(), &inter);
                        let local_b = index_for_subindex(b_chunk.index(), &inter);
                        let a_buf = a_chunk
                            .data()
                            .buffer()
                            .ok_or(DistError::Unsupported("peer-access operand is a placeholder, apply_updates first"))?;
                        let b_buf = b_chunk
                            .data()
                            .buffer()
                            .ok_or(DistError::Unsupported("peer-access operand is a placeholder, apply_updates first"))?;
                        let av = a_buf.slice(local_a.slice_info()).to_owned();
                        let bv = b_buf.slice(local_b.slice_info()).to_owned();
                        let result = kernel.apply(&[av, bv]);
                        out_buf.slice_mut(local_a.slice_info()).assign(&result);
                    }
                }
            }
            let ready = {
                let mut pool_ref = pool.borrow_mut();
                pool_ref.stream(device).record()
            };
            dev_out.push(Chunk::from_buffer(a_chunk.index().clone(), device, out_buf, ready)?);
        }
        out_chunks.insert(device, dev_out);
    }

    Ok(DistributedArray::from_parts(
        shape,
        Mode::Replica,
        a_rep.index_map().clone(),
        out_chunks,
        comms,
        pool,
    ))
}

/// Reduction-over-an-axis entry point.
pub fn reduce<T: Numeric>(
    kernel: &ReductionKernel,
    operand: &DistributedArray<T>,
) -> Result<DistributedArray<T>, DistError> {
    let shape = operand.shape().to_vec();
    if kernel.axis >= shape.len() {
        return Err(DistError::IndexOutOfBounds {
            axis: kernel.axis,
            index: kernel.axis as u64,
            size: shape.len() as u64,
        });
    }

    let target_mode = Mode::Op(kernel.op);
    let converted = operand.to_mode(target_mode)?;
    let pool = converted.pool_handle();
    let comms = converted.comms_handle();

    let mut new_shape: Vec<u64> = shape.clone();
    new_shape.remove(kernel.axis);

    let mut out_chunks: HashMap<DeviceId, Vec<Chunk<T>>> = HashMap::new();
    for device in converted.index_map().devices() {
        let mut dev_out = Vec::new();
        for chunk in &converted.chunks_ref()[&device] {
            let buf = chunk.data().buffer().expect("resolved by to_mode");
            let reduced = kernel.apply(buf);
            let mut axes: Vec<_> = chunk.index().to_vec();
            axes.remove(kernel.axis);
            let new_ci = axes.into_iter().collect();
            let ready = {
                let mut pool_ref = pool.borrow_mut();
                pool_ref.stream(device).record()
            };
            dev_out.push(Chunk::from_buffer(new_ci, device, reduced, ready)?);
        }
        out_chunks.insert(device, dev_out);
    }

    let new_index_map = index_map_from_chunks(&out_chunks);
    let result = DistributedArray::from_parts(
        new_shape.into_iter().collect(),
        target_mode,
        new_index_map,
        out_chunks,
        comms,
        pool,
    );

    if kernel.op.is_idempotent() {
        result.to_mode(Mode::Replica)
    } else {
        Ok(result)
    }
}
