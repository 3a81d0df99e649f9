//! Cross-device copies, optionally routed through a collective-communication
//! backend. Everything here goes through [`transfer`]: same-device
//! transfers are a zero-copy clone of the source buffer, cross-device ones
//! go through the [`Collective`] wired into [`Comms`], falling back to a
//! direct device-to-device copy when none is configured.

use std::sync::Arc;

use ndarray::ArrayD;

use crate::numeric::Numeric;
use crate::runtime::{DeviceId, DevicePool, Event};

/// A point-to-point send+recv round trip, collapsed into one call since
/// the simulated runtime executes synchronously on the calling thread. A
/// real backend would issue `send` on the source stream and a
/// matching `recv` on the destination stream inside a `group_start`/
/// `group_end` pair; this trait method stands in for that whole group.
pub trait Collective<T: Numeric>: Send + Sync {
    fn send_recv(&self, data: ArrayD<T>, src: DeviceId, dst: DeviceId) -> ArrayD<T>;
}

/// The always-available fallback collective: a direct host-memory copy.
/// Works everywhere; not a real fabric.
#[derive(Default)]
pub struct LoopbackCollective;

impl<T: Numeric> Collective<T> for LoopbackCollective {
    fn send_recv(&self, data: ArrayD<T>, src: DeviceId, dst: DeviceId) -> ArrayD<T> {
        log::trace!("loopback collective: {} -> {}", src, dst);
        data
    }
}

/// Communicators shared across every array derived from the same parent,
/// constructed once and never mutated after construction.
#[derive(Clone)]
pub struct Comms<T: Numeric> {
    collective: Option<Arc<dyn Collective<T>>>,
}

impl<T: Numeric> Comms<T> {
    pub fn with_collective(collective: Arc<dyn Collective<T>>) -> Self {
        Self {
            collective: Some(collective),
        }
    }

    /// No collective library wired in: every cross-device transfer
    /// degrades to the device-to-device copy fallback.
    pub fn none() -> Self {
        Self { collective: None }
    }
}

impl<T: Numeric> Default for Comms<T> {
    fn default() -> Self {
        Self::with_collective(Arc::new(LoopbackCollective))
    }
}

/// Constructed once per device set. The simulated backend's collective
/// does not actually depend on
/// the device set (there is only ever one process), but the signature
/// mirrors the real contract so a hardware backend can be dropped in
/// without changing call sites.
pub fn create_communicators<T: Numeric>(_devices: impl IntoIterator<Item = DeviceId>) -> Comms<T> {
    Comms::default()
}

/// A resolved buffer resident on one device, ready to be handed to the
/// transfer engine as a source.
pub struct ManagedBuffer<T: Numeric> {
    pub data: ArrayD<T>,
    pub ready: Event,
    pub device: DeviceId,
}

/// The result of a transfer: a buffer now resident on the destination
/// device, plus a readiness token recorded after the transfer lands.
pub struct DataTransfer<T: Numeric> {
    pub data: ArrayD<T>,
    pub ready: Event,
}

/// Moves `src` to `dst_dev`, specialized to a single shared [`Comms`]
/// since the simulated backend keeps one communicator per device set
/// rather than one per endpoint pair.
pub fn transfer<T: Numeric>(
    comms: &Comms<T>,
    pool: &mut DevicePool,
    src: &ManagedBuffer<T>,
    dst_dev: DeviceId,
) -> DataTransfer<T> {
    src.ready.synchronize();
    if src.device == dst_dev {
        log::trace!("zero-copy transfer within device {}", dst_dev);
        let ready = pool.stream(dst_dev).record();
        return DataTransfer {
            data: src.data.clone(),
            ready,
        };
    }

    let data = match &comms.collective {
        Some(c) => {
            log::debug!("transfer {} -> {} via collective", src.device, dst_dev);
            c.send_recv(src.data.clone(), src.device, dst_dev)
        }
        None => {
            log::debug!(
                "transfer {} -> {}: no collective wired in, falling back to device-to-device copy",
                src.device,
                dst_dev
            );
            src.data.clone()
        }
    };
    let ready = pool.stream(dst_dev).record();
    DataTransfer { data, ready }
}
