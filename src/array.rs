//! Ownership of shards, mode, and index map; mode conversion, resharding,
//! and materialization.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use ndarray::{ArrayD, IxDyn};
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::chunk::{Chunk, ChunkData};
use crate::error::DistError;
use crate::index::{index_for_subindex, index_intersection, ChunkIndex};
use crate::mode::{Mode, OpKind};
use crate::numeric::Numeric;
use crate::runtime::{DeviceId, DevicePool};
use crate::transfer::{self, Comms, ManagedBuffer};
use crate::CoordVec;

/// Mapping from device id to the ordered chunk indices resident there.
/// A device may own multiple shards.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMap(HashMap<DeviceId, Vec<ChunkIndex>>);

impl IndexMap {
    /// Device ids in ascending order: the fixed iteration order mode
    /// conversion and resharding are defined over, so results don't depend
    /// on `HashMap` iteration order.
    pub fn devices(&self) -> impl Iterator<Item = DeviceId> + '_ {
        let mut ds: Vec<DeviceId> = self.0.keys().copied().collect();
        ds.sort_unstable();
        ds.into_iter()
    }

    pub fn get(&self, device: DeviceId) -> &[ChunkIndex] {
        self.0.get(&device).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn iter(&self) -> impl Iterator<Item = (DeviceId, &ChunkIndex)> {
        self.devices()
            .collect::<Vec<_>>()
            .into_iter()
            .flat_map(move |d| self.0[&d].iter().map(move |ci| (d, ci)))
    }

    /// Whether every coordinate of `shape` is covered by at least one
    /// chunk index, checked at construction and resharding time.
    pub fn covers(&self, shape: &[u64]) -> bool {
        let dims: Vec<usize> = shape.iter().map(|&x| x as usize).collect();
        if dims.iter().product::<usize>() == 0 {
            return true;
        }
        let mut covered = ArrayD::from_elem(IxDyn(&dims), false);
        for (_d, ci) in self.iter() {
            covered.slice_mut(ci.slice_info()).fill(true);
        }
        covered.iter().all(|&b| b)
    }
}

/// Ergonomic construction of an [`IndexMap`], one shard at a time.
#[derive(Default)]
pub struct IndexMapBuilder(HashMap<DeviceId, Vec<ChunkIndex>>);

impl IndexMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shard(mut self, device: DeviceId, index: ChunkIndex) -> Self {
        self.0.entry(device).or_default().push(index);
        self
    }

    pub fn build(self) -> IndexMap {
        IndexMap(self.0)
    }
}

/// Ergonomic, optional-field construction of a [`DistributedArray`]:
/// accumulate fields one at a time, then call `build` with the host buffer.
/// The buffer is passed to `build` directly rather than stored, since a
/// distributed array's shape is derived from the buffer rather than
/// declared up front.
pub struct DistributedArrayBuilder<T: Numeric> {
    index_map: Option<IndexMap>,
    mode: Mode,
    pool: Option<Rc<RefCell<DevicePool>>>,
    comms: Option<Comms<T>>,
}

impl<T: Numeric> Default for DistributedArrayBuilder<T> {
    fn default() -> Self {
        Self {
            index_map: None,
            mode: Mode::Replica,
            pool: None,
            comms: None,
        }
    }
}

impl<T: Numeric> DistributedArrayBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index_map(mut self, index_map: IndexMap) -> Self {
        self.index_map = Some(index_map);
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Share a device pool with another array: use this when building a
    /// sibling array that must observe the same event ordering.
    pub fn pool(mut self, pool: Rc<RefCell<DevicePool>>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn comms(mut self, comms: Comms<T>) -> Self {
        self.comms = Some(comms);
        self
    }

    /// An empty index map fails coverage for any non-empty shape, so
    /// omitting `index_map` surfaces as [`DistError::IncompleteCoverage`]
    /// rather than a separate "builder incomplete" error.
    pub fn build(self, host: ArrayD<T>) -> Result<DistributedArray<T>, DistError> {
        let index_map = self.index_map.unwrap_or_default();
        let pool = self.pool.unwrap_or_else(|| {
            let devices: Vec<DeviceId> = index_map.devices().collect();
            Rc::new(RefCell::new(DevicePool::new(devices)))
        });
        let comms = self.comms.unwrap_or_default();
        DistributedArray::from_host(&host, index_map, self.mode, pool, comms)
    }
}

pub(crate) fn index_map_from_chunks<T: Numeric>(
    chunks_map: &HashMap<DeviceId, Vec<Chunk<T>>>,
) -> IndexMap {
    let mut builder = IndexMapBuilder::new();
    let mut devices: Vec<DeviceId> = chunks_map.keys().copied().collect();
    devices.sort_unstable();
    for d in devices {
        for c in &chunks_map[&d] {
            builder = builder.shard(d, c.index().clone());
        }
    }
    builder.build()
}

/// `(shape, dtype, index_map, chunks_map, mode, comms)`. `dtype` is carried
/// by the Rust type parameter `T` rather than a runtime tag.
#[derive(Clone)]
pub struct DistributedArray<T: Numeric> {
    shape: CoordVec<u64>,
    mode: Mode,
    index_map: IndexMap,
    chunks_map: HashMap<DeviceId, Vec<Chunk<T>>>,
    comms: Comms<T>,
    pool: Rc<RefCell<DevicePool>>,
}

impl<T: Numeric> DistributedArray<T> {
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn index_map(&self) -> &IndexMap {
        &self.index_map
    }

    pub(crate) fn pool_handle(&self) -> Rc<RefCell<DevicePool>> {
        Rc::clone(&self.pool)
    }

    pub(crate) fn comms_handle(&self) -> Comms<T> {
        self.comms.clone()
    }

    pub(crate) fn chunks_ref(&self) -> &HashMap<DeviceId, Vec<Chunk<T>>> {
        &self.chunks_map
    }

    pub(crate) fn from_parts(
        shape: CoordVec<u64>,
        mode: Mode,
        index_map: IndexMap,
        chunks_map: HashMap<DeviceId, Vec<Chunk<T>>>,
        comms: Comms<T>,
        pool: Rc<RefCell<DevicePool>>,
    ) -> Self {
        Self {
            shape,
            mode,
            index_map,
            chunks_map,
            comms,
            pool,
        }
    }

    /// Builds a distributed array from a host buffer, an index map, and a
    /// target mode. Always slices `host` into `Replica` shards first
    /// (always well-formed, since equal-valued overlaps trivially satisfy
    /// the replica invariant), then converts to `mode` via
    /// [`Self::to_mode`] if requested.
    pub fn from_host(
        host: &ArrayD<T>,
        index_map: IndexMap,
        mode: Mode,
        pool: Rc<RefCell<DevicePool>>,
        comms: Comms<T>,
    ) -> Result<Self, DistError> {
        let shape: CoordVec<u64> = host.shape().iter().map(|&x| x as u64).collect();
        if !index_map.covers(&shape) {
            return Err(DistError::IncompleteCoverage { shape });
        }

        let mut chunks_map = HashMap::new();
        for device in index_map.devices() {
            let mut dev_chunks = Vec::new();
            for ci in index_map.get(device) {
                let sub = host.slice(ci.slice_info()).to_owned();
                let ready = pool.borrow_mut().stream(device).record();
                dev_chunks.push(Chunk::from_buffer(ci.clone(), device, sub, ready)?);
            }
            chunks_map.insert(device, dev_chunks);
        }

        let replica = Self {
            shape,
            mode: Mode::Replica,
            index_map,
            chunks_map,
            comms,
            pool,
        };
        replica.to_mode(mode)
    }

    /// Convenience constructor that allocates a fresh device pool and the
    /// default loopback communicator. The common case for a freestanding
    /// array not derived from another.
    pub fn new(host: ArrayD<T>, index_map: IndexMap, mode: Mode) -> Result<Self, DistError> {
        let devices: Vec<DeviceId> = index_map.devices().collect();
        let pool = Rc::new(RefCell::new(DevicePool::new(devices)));
        Self::from_host(&host, index_map, mode, pool, Comms::default())
    }

    /// Entry point for [`DistributedArrayBuilder`].
    pub fn builder() -> DistributedArrayBuilder<T> {
        DistributedArrayBuilder::new()
    }

    fn resolve_all(&mut self) -> Result<(), DistError> {
        let mode = self.mode;
        let devices: Vec<DeviceId> = self.index_map.devices().collect();
        for device in devices {
            if let Some(chunks) = self.chunks_map.get_mut(&device) {
                for chunk in chunks.iter_mut() {
                    if chunk.is_placeholder() || !chunk.updates.is_empty() {
                        let mut pool = self.pool.borrow_mut();
                        let stream = pool.stream(device);
                        chunk.apply_updates(mode, stream)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Clones of every chunk with pending updates folded in and any
    /// placeholder materialized. Used by mode conversion and resharding,
    /// both of which must produce new chunks rather than mutate `self`'s.
    fn resolved_chunks(&self) -> Result<HashMap<DeviceId, Vec<Chunk<T>>>, DistError> {
        let mut out = HashMap::new();
        for device in self.index_map.devices() {
            let mut dev_chunks = Vec::new();
            for chunk in &self.chunks_map[&device] {
                let mut c = chunk.clone();
                if c.is_placeholder() || !c.updates.is_empty() {
                    let mut pool = self.pool.borrow_mut();
                    let stream = pool.stream(device);
                    c.apply_updates(self.mode, stream)?;
                }
                dev_chunks.push(c);
            }
            out.insert(device, dev_chunks);
        }
        Ok(out)
    }

    /// Copies the full array out to a single host buffer, folding in any
    /// pending updates and resolving placeholders first.
    pub fn materialize(&mut self) -> Result<ArrayD<T>, DistError> {
        self.resolve_all()?;
        let dims: Vec<usize> = self.shape.iter().map(|&x| x as usize).collect();
        let mut host = match self.mode {
            Mode::Replica => ArrayD::from_elem(IxDyn(&dims), T::zero()),
            Mode::Op(op) => ArrayD::from_elem(IxDyn(&dims), op.identity::<T>()),
        };
        for device in self.index_map.devices() {
            for chunk in &self.chunks_map[&device] {
                let buf = chunk.data().buffer().expect("resolved by resolve_all");
                let mut view = host.slice_mut(chunk.index().slice_info());
                match self.mode {
                    Mode::Replica => view.assign(buf),
                    Mode::Op(op) => {
                        ndarray::Zip::from(&mut view)
                            .and(buf)
                            .for_each(|dst, &src| *dst = op.apply(*dst, src));
                    }
                }
            }
        }
        Ok(host)
    }

    /// Converts to `target` mode. Idempotent, and produces new chunks
    /// rather than mutating `self`.
    pub fn to_mode(&self, target: Mode) -> Result<Self, DistError> {
        if self.mode == target {
            return Ok(self.clone());
        }
        match (self.mode, target) {
            (Mode::Op(_), Mode::Replica) => self.op_to_replica(),
            (Mode::Replica, Mode::Op(op)) => self.replica_to_op(op),
            (Mode::Op(_), Mode::Op(op)) => self.op_to_replica()?.replica_to_op(op),
            (Mode::Replica, Mode::Replica) => unreachable!("handled by the equality check above"),
        }
    }

    fn chunk_order(chunks_map: &HashMap<DeviceId, Vec<Chunk<T>>>) -> Vec<(DeviceId, usize)> {
        itertools::sorted(chunks_map.keys().copied())
            .flat_map(|d| (0..chunks_map[&d].len()).map(move |i| (d, i)))
            .collect()
    }

    /// Converts from an operator mode to `Replica`: forward-fold every
    /// lower-ordered shard's contribution into each higher-ordered
    /// overlapping shard (zeroing the lower one so the contribution isn't
    /// double-counted), then broadcast the fully-folded value back out to
    /// every overlapping shard so overlaps end up equal again.
    fn op_to_replica(&self) -> Result<Self, DistError> {
        let op = self.mode.op().expect("op mode");
        let mut chunks_map = self.resolved_chunks()?;
        let order = Self::chunk_order(&chunks_map);
        let n = order.len();

        for a in 0..n {
            for b in (a + 1)..n {
                self.fold_pair(&mut chunks_map, &order, a, b, op)?;
            }
        }
        // Broadcast in decreasing `b` so a shard is fully restored by its
        // superiors before it is used as a broadcast source itself.
        for b in (1..n).rev() {
            for a in 0..b {
                self.broadcast_pair(&mut chunks_map, &order, a, b)?;
            }
        }

        Ok(Self {
            shape: self.shape.clone(),
            mode: Mode::Replica,
            index_map: self.index_map.clone(),
            chunks_map,
            comms: self.comms.clone(),
            pool: Rc::clone(&self.pool),
        })
    }

    fn fold_pair(
        &self,
        chunks_map: &mut HashMap<DeviceId, Vec<Chunk<T>>>,
        order: &[(DeviceId, usize)],
        a: usize,
        b: usize,
        op: OpKind,
    ) -> Result<(), DistError> {
        let (dev_i, pos_i) = order[a];
        let (dev_j, pos_j) = order[b];
        let (index_i, index_j) = {
            let ci = &chunks_map[&dev_i][pos_i];
            let cj = &chunks_map[&dev_j][pos_j];
            (ci.index().clone(), cj.index().clone())
        };
        let inter = match index_intersection(&index_i, &index_j, &self.shape) {
            Some(x) => x,
            None => return Ok(()),
        };
        let local_i = index_for_subindex(&index_i, &inter);
        let local_j = index_for_subindex(&index_j, &inter);

        let sub = {
            let ci = &chunks_map[&dev_i][pos_i];
            ci.data()
                .buffer()
                .expect("resolved")
                .slice(local_i.slice_info())
                .to_owned()
        };
        let transferred = {
            let src = ManagedBuffer {
                data: sub,
                ready: chunks_map[&dev_i][pos_i].ready,
                device: dev_i,
            };
            let mut pool = self.pool.borrow_mut();
            transfer::transfer(&self.comms, &mut pool, &src, dev_j)
        };

        {
            let cj = chunks_map.get_mut(&dev_j).unwrap().get_mut(pos_j).unwrap();
            if let ChunkData::Buffer(buf) = &mut cj.data {
                let mut view = buf.slice_mut(local_j.slice_info());
                ndarray::Zip::from(&mut view)
                    .and(&transferred.data)
                    .for_each(|dst, &src| *dst = op.apply(*dst, src));
            }
            cj.ready = transferred.ready;
        }
        {
            let ci = chunks_map.get_mut(&dev_i).unwrap().get_mut(pos_i).unwrap();
            if let ChunkData::Buffer(buf) = &mut ci.data {
                buf.slice_mut(local_i.slice_info()).fill(op.identity::<T>());
            }
        }
        Ok(())
    }

    fn broadcast_pair(
        &self,
        chunks_map: &mut HashMap<DeviceId, Vec<Chunk<T>>>,
        order: &[(DeviceId, usize)],
        a: usize,
        b: usize,
    ) -> Result<(), DistError> {
        let (dev_i, pos_i) = order[a];
        let (dev_j, pos_j) = order[b];
        let (index_i, index_j) = {
            let ci = &chunks_map[&dev_i][pos_i];
            let cj = &chunks_map[&dev_j][pos_j];
            (ci.index().clone(), cj.index().clone())
        };
        let inter = match index_intersection(&index_i, &index_j, &self.shape) {
            Some(x) => x,
            None => return Ok(()),
        };
        let local_i = index_for_subindex(&index_i, &inter);
        let local_j = index_for_subindex(&index_j, &inter);

        let sub = {
            let cj = &chunks_map[&dev_j][pos_j];
            cj.data()
                .buffer()
                .expect("resolved")
                .slice(local_j.slice_info())
                .to_owned()
        };
        let transferred = {
            let src = ManagedBuffer {
                data: sub,
                ready: chunks_map[&dev_j][pos_j].ready,
                device: dev_j,
            };
            let mut pool = self.pool.borrow_mut();
            transfer::transfer(&self.comms, &mut pool, &src, dev_i)
        };

        let ci = chunks_map.get_mut(&dev_i).unwrap().get_mut(pos_i).unwrap();
        if let ChunkData::Buffer(buf) = &mut ci.data {
            buf.slice_mut(local_i.slice_info()).assign(&transferred.data);
        }
        ci.ready = transferred.ready;
        Ok(())
    }

    /// Converts from `Replica` to an operator mode: for each ordered pair
    /// `(i, j)`, zero the portion of the lower-ordered shard `i` that
    /// intersects `j`. Replica overlaps already hold equal values, so no
    /// fold is needed, only de-duplication of coverage.
    fn replica_to_op(&self, op: OpKind) -> Result<Self, DistError> {
        let mut chunks_map = self.resolved_chunks()?;
        let order = Self::chunk_order(&chunks_map);
        let n = order.len();

        for a in 0..n {
            for b in (a + 1)..n {
                let (dev_i, pos_i) = order[a];
                let (dev_j, pos_j) = order[b];
                let (index_i, index_j) = {
                    let ci = &chunks_map[&dev_i][pos_i];
                    let cj = &chunks_map[&dev_j][pos_j];
                    (ci.index().clone(), cj.index().clone())
                };
                if let Some(inter) = index_intersection(&index_i, &index_j, &self.shape) {
                    let local_i = index_for_subindex(&index_i, &inter);
                    let ci = chunks_map.get_mut(&dev_i).unwrap().get_mut(pos_i).unwrap();
                    if let ChunkData::Buffer(buf) = &mut ci.data {
                        buf.slice_mut(local_i.slice_info()).fill(op.identity::<T>());
                    }
                }
            }
        }

        Ok(Self {
            shape: self.shape.clone(),
            mode: Mode::Op(op),
            index_map: self.index_map.clone(),
            chunks_map,
            comms: self.comms.clone(),
            pool: Rc::clone(&self.pool),
        })
    }

    /// Converts to `Replica`, then fills each new shard by pulling from
    /// every old shard that overlaps it, in ascending `(device, position)`
    /// order, so coordinates covered by several source shards are
    /// resolved "last writer wins". That's sound because overlapping
    /// replica shards already hold equal values, so the choice only
    /// affects determinism, not correctness.
    pub fn reshard(&self, new_index_map: IndexMap) -> Result<Self, DistError> {
        if !new_index_map.covers(&self.shape) {
            return Err(DistError::IncompleteCoverage {
                shape: self.shape.clone(),
            });
        }
        let replica = self.to_mode(Mode::Replica)?;
        let old_chunks = replica.resolved_chunks()?;
        let old_order = Self::chunk_order(&old_chunks);

        let mut new_chunks_map: HashMap<DeviceId, Vec<Chunk<T>>> = HashMap::new();
        for device in new_index_map.devices() {
            let mut dev_chunks = Vec::new();
            for ci in new_index_map.get(device) {
                let dims = ci.shape_usize();
                let mut buf = ArrayD::from_elem(IxDyn(&dims), T::zero());
                let mut ready = {
                    let mut pool = self.pool.borrow_mut();
                    pool.stream(device).record()
                };
                for &(odev, opos) in &old_order {
                    let old_chunk = &old_chunks[&odev][opos];
                    if let Some(inter) = index_intersection(old_chunk.index(), ci, &self.shape) {
                        let local_old = index_for_subindex(old_chunk.index(), &inter);
                        let local_new = index_for_subindex(ci, &inter);
                        let sub = old_chunk
                            .data()
                            .buffer()
                            .expect("resolved")
                            .slice(local_old.slice_info())
                            .to_owned();
                        let src = ManagedBuffer {
                            data: sub,
                            ready: old_chunk.ready,
                            device: odev,
                        };
                        let transferred = {
                            let mut pool = self.pool.borrow_mut();
                            transfer::transfer(&self.comms, &mut pool, &src, device)
                        };
                        buf.slice_mut(local_new.slice_info()).assign(&transferred.data);
                        ready = transferred.ready;
                    }
                }
                dev_chunks.push(Chunk::from_buffer(ci.clone(), device, buf, ready)?);
            }
            new_chunks_map.insert(device, dev_chunks);
        }

        Ok(Self {
            shape: self.shape.clone(),
            mode: Mode::Replica,
            index_map: new_index_map,
            chunks_map: new_chunks_map,
            comms: self.comms.clone(),
            pool: Rc::clone(&self.pool),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{normalize, IndexTerm};
    use ndarray::array;

    fn full(start: i64, stop: i64) -> IndexTerm {
        IndexTerm::Slice {
            start: Some(start),
            stop: Some(stop),
            step: None,
        }
    }

    #[test]
    fn replica_add_materializes_round_trip() {
        let shape = [4u64];
        let map = IndexMapBuilder::new()
            .shard(0, normalize(&shape, &[full(0, 3)]).unwrap())
            .shard(1, normalize(&shape, &[full(1, 4)]).unwrap())
            .build();
        let a = DistributedArray::new(
            array![1.0, 2.0, 3.0, 4.0].into_dyn(),
            map.clone(),
            Mode::Replica,
        )
        .unwrap();
        let mut out = a.materialize_clone();
        assert_eq!(out, array![1.0, 2.0, 3.0, 4.0].into_dyn());
        let _ = &mut out;
    }

    #[test]
    fn overlapping_replica_to_sum_zeroes_lower_shard() {
        let shape = [4u64];
        let map = IndexMapBuilder::new()
            .shard(0, normalize(&shape, &[full(0, 3)]).unwrap())
            .shard(1, normalize(&shape, &[full(1, 4)]).unwrap())
            .build();
        let a = DistributedArray::new(array![1.0, 2.0, 3.0, 4.0].into_dyn(), map, Mode::Replica)
            .unwrap();
        let summed = a.to_mode(Mode::SUM).unwrap();
        let c0 = summed.chunks_ref()[&0][0].data().buffer().unwrap().clone();
        let c1 = summed.chunks_ref()[&1][0].data().buffer().unwrap().clone();
        assert_eq!(c0, array![1.0, 0.0, 0.0].into_dyn());
        assert_eq!(c1, array![2.0, 3.0, 4.0].into_dyn());
    }

    #[test]
    fn sum_round_trips_through_replica() {
        let shape = [4u64];
        let map = IndexMapBuilder::new()
            .shard(0, normalize(&shape, &[full(0, 3)]).unwrap())
            .shard(1, normalize(&shape, &[full(1, 4)]).unwrap())
            .build();
        let a = DistributedArray::new(array![1.0, 2.0, 3.0, 4.0].into_dyn(), map, Mode::Replica)
            .unwrap();
        let summed = a.to_mode(Mode::SUM).unwrap();
        let mut back = summed.to_mode(Mode::Replica).unwrap();
        assert_eq!(back.materialize().unwrap(), array![1.0, 2.0, 3.0, 4.0].into_dyn());
    }

    #[test]
    fn strided_overlap_round_trips() {
        let shape = [6u64];
        let map = IndexMapBuilder::new()
            .shard(
                0,
                normalize(
                    &shape,
                    &[IndexTerm::Slice {
                        start: Some(0),
                        stop: None,
                        step: Some(2),
                    }],
                )
                .unwrap(),
            )
            .shard(
                1,
                normalize(
                    &shape,
                    &[IndexTerm::Slice {
                        start: Some(1),
                        stop: None,
                        step: Some(2),
                    }],
                )
                .unwrap(),
            )
            .build();
        let a = DistributedArray::new(
            array![0.0, 1.0, 2.0, 3.0, 4.0, 5.0].into_dyn(),
            map,
            Mode::Replica,
        )
        .unwrap();
        let summed = a.to_mode(Mode::SUM).unwrap();
        let mut back = summed.to_mode(Mode::Replica).unwrap();
        assert_eq!(
            back.materialize().unwrap(),
            array![0.0, 1.0, 2.0, 3.0, 4.0, 5.0].into_dyn()
        );
    }

    #[test]
    fn reshard_round_trips() {
        let shape = [4u64];
        let map = IndexMapBuilder::new()
            .shard(0, normalize(&shape, &[full(0, 3)]).unwrap())
            .shard(1, normalize(&shape, &[full(1, 4)]).unwrap())
            .build();
        let a = DistributedArray::new(array![1.0, 2.0, 3.0, 4.0].into_dyn(), map, Mode::Replica)
            .unwrap();
        let new_map = IndexMapBuilder::new()
            .shard(0, normalize(&shape, &[full(0, 4)]).unwrap())
            .build();
        let mut b = a.reshard(new_map).unwrap();
        assert_eq!(b.materialize().unwrap(), array![1.0, 2.0, 3.0, 4.0].into_dyn());
    }

    #[test]
    fn reshard_into_non_covering_map_is_coverage_error() {
        let shape = [4u64];
        let map = IndexMapBuilder::new()
            .shard(0, normalize(&shape, &[full(0, 4)]).unwrap())
            .build();
        let a = DistributedArray::new(array![1.0, 2.0, 3.0, 4.0].into_dyn(), map, Mode::Replica)
            .unwrap();
        let bad_map = IndexMapBuilder::new()
            .shard(0, normalize(&shape, &[full(0, 2)]).unwrap())
            .build();
        let err = a.reshard(bad_map).unwrap_err();
        assert!(matches!(err, DistError::IncompleteCoverage { .. }));
    }

    #[test]
    fn index_map_with_gap_is_coverage_error() {
        let shape = [4u64];
        let map = IndexMapBuilder::new()
            .shard(0, normalize(&shape, &[full(0, 2)]).unwrap())
            .build();
        let err = DistributedArray::<f64>::new(
            array![1.0, 2.0, 3.0, 4.0].into_dyn(),
            map,
            Mode::Replica,
        )
        .unwrap_err();
        assert!(matches!(err, DistError::IncompleteCoverage { .. }));
    }

    #[test]
    fn builder_produces_the_same_array_as_new() {
        let shape = [4u64];
        let map = IndexMapBuilder::new()
            .shard(0, normalize(&shape, &[full(0, 3)]).unwrap())
            .shard(1, normalize(&shape, &[full(1, 4)]).unwrap())
            .build();
        let mut built = DistributedArray::builder()
            .index_map(map)
            .mode(Mode::Replica)
            .build(array![1.0, 2.0, 3.0, 4.0].into_dyn())
            .unwrap();
        assert_eq!(built.materialize().unwrap(), array![1.0, 2.0, 3.0, 4.0].into_dyn());
    }

    #[test]
    fn builder_without_index_map_is_coverage_error() {
        let err = DistributedArray::<f64>::builder()
            .build(array![1.0, 2.0].into_dyn())
            .unwrap_err();
        assert!(matches!(err, DistError::IncompleteCoverage { .. }));
    }

    #[test]
    fn index_map_round_trips_through_json() {
        let shape = [4u64];
        let map = IndexMapBuilder::new()
            .shard(0, normalize(&shape, &[full(0, 3)]).unwrap())
            .shard(1, normalize(&shape, &[full(1, 4)]).unwrap())
            .build();
        let text = serde_json::to_string(&map).unwrap();
        let back: IndexMap = serde_json::from_str(&text).unwrap();
        assert_eq!(map, back);
    }

    // Helper used only by the first test above, to keep its intent (pure
    // round-trip on construction) separate from mutation-requiring
    // `materialize`.
    impl<T: Numeric> DistributedArray<T> {
        fn materialize_clone(&self) -> ArrayD<T> {
            self.clone().materialize().unwrap()
        }
    }
}
