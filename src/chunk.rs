//! Per-device shard: data-or-placeholder plus a readiness event and a
//! queue of lazy pending updates.
//!
//! A [`Chunk`] is bound to exactly one device and owns its buffer
//! exclusively; cross-device reads are never expressed as aliasing, only
//! as [`crate::transfer::transfer`] calls that hand a fresh buffer to the
//! consuming chunk as an [`Update`].

use ndarray::ArrayD;
use num_traits::Zero;

use crate::error::DistError;
use crate::index::ChunkIndex;
use crate::mode::Mode;
use crate::numeric::Numeric;
use crate::runtime::{DeviceId, Event, Stream};
use crate::CoordVec;

/// A chunk's data: either a resident buffer or a placeholder carrying
/// only shape and device, materialized lazily on first [`Chunk::apply_updates`].
#[derive(Clone, Debug)]
pub enum ChunkData<T: Numeric> {
    Buffer(ArrayD<T>),
    Placeholder { shape: CoordVec<u64>, device: DeviceId },
}

impl<T: Numeric> ChunkData<T> {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, ChunkData::Placeholder { .. })
    }

    pub fn buffer(&self) -> Option<&ArrayD<T>> {
        match self {
            ChunkData::Buffer(b) => Some(b),
            ChunkData::Placeholder { .. } => None,
        }
    }
}

/// A deferred write `(transfer, local_idx)` attached to a chunk. `data`
/// and `ready` are the buffer a [`crate::transfer::transfer`] call
/// delivered, plus the token it finished on.
#[derive(Clone, Debug)]
pub struct Update<T: Numeric> {
    pub data: ArrayD<T>,
    pub ready: Event,
    pub local_idx: ChunkIndex,
}

/// An entity bound to one device. Mutated only by its owning device's
/// stream.
#[derive(Clone, Debug)]
pub struct Chunk<T: Numeric> {
    pub(crate) data: ChunkData<T>,
    pub(crate) ready: Event,
    pub(crate) index: ChunkIndex,
    pub(crate) updates: Vec<Update<T>>,
    /// Retention chain: buffers that must stay alive until superseded
    /// writes have fully landed. Populated by [`Chunk::apply_updates`]; in
    /// safe Rust ownership already keeps these buffers alive for as long
    /// as this vector holds them, so the field documents the retention
    /// intent rather than working around a hazard that doesn't exist here.
    pub(crate) prevent_gc: Vec<ArrayD<T>>,
    pub(crate) device: DeviceId,
}

impl<T: Numeric> Chunk<T> {
    pub fn from_buffer(
        index: ChunkIndex,
        device: DeviceId,
        data: ArrayD<T>,
        ready: Event,
    ) -> Result<Self, DistError> {
        let expected = index.shape();
        let actual: CoordVec<u64> = data.shape().iter().map(|&x| x as u64).collect();
        if expected != actual {
            return Err(DistError::ChunkShapeMismatch {
                chunk: actual,
                expected,
            });
        }
        Ok(Self {
            data: ChunkData::Buffer(data),
            ready,
            index,
            updates: Vec::new(),
            prevent_gc: Vec::new(),
            device,
        })
    }

    pub fn placeholder(index: ChunkIndex, device: DeviceId, ready: Event) -> Self {
        let shape = index.shape();
        Self {
            data: ChunkData::Placeholder { shape, device },
            ready,
            index,
            updates: Vec::new(),
            prevent_gc: Vec::new(),
            device,
        }
    }

    pub fn index(&self) -> &ChunkIndex {
        &self.index
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn is_placeholder(&self) -> bool {
        self.data.is_placeholder()
    }

    pub fn data(&self) -> &ChunkData<T> {
        &self.data
    }

    /// Deep-copies `data` on the owning device's stream; placeholder
    /// chunks copy as themselves since there is no buffer to duplicate.
    pub fn copy(&self, stream: &mut Stream) -> Self {
        match &self.data {
            ChunkData::Placeholder { .. } => self.clone(),
            ChunkData::Buffer(b) => Self {
                data: ChunkData::Buffer(b.clone()),
                ready: stream.record(),
                index: self.index.clone(),
                updates: self.updates.clone(),
                prevent_gc: self.prevent_gc.clone(),
                device: self.device,
            },
        }
    }

    /// Appends a pending update; does not touch `data`.
    pub fn add_update(&mut self, data: ArrayD<T>, ready: Event, local_idx: ChunkIndex) {
        self.updates.push(Update {
            data,
            ready,
            local_idx,
        });
    }

    /// Folds all pending updates into `data`, materializing a placeholder
    /// first if necessary.
    pub fn apply_updates(&mut self, mode: Mode, stream: &mut Stream) -> Result<(), DistError> {
        if let ChunkData::Placeholder { shape, .. } = &self.data {
            let dims: Vec<usize> = shape.iter().map(|&x| x as usize).collect();
            let fill = match mode {
                Mode::Replica => T::zero(),
                Mode::Op(op) => op.identity::<T>(),
            };
            self.data = ChunkData::Buffer(ArrayD::from_elem(ndarray::IxDyn(&dims), fill));
        }

        let updates = std::mem::take(&mut self.updates);
        for update in updates {
            update.ready.synchronize();
            let slice_info = update.local_idx.slice_info();
            if let ChunkData::Buffer(buf) = &mut self.data {
                let mut view = buf.slice_mut(slice_info);
                match mode {
                    Mode::Replica => view.assign(&update.data),
                    Mode::Op(op) => {
                        ndarray::Zip::from(&mut view)
                            .and(&update.data)
                            .for_each(|dst, &src| *dst = op.apply(*dst, src));
                    }
                }
            }
            self.prevent_gc.push(update.data);
        }
        self.ready = stream.record();
        Ok(())
    }
}
