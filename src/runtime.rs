//! Device/stream/event vocabulary, plus an in-process simulated backend
//! good enough to drive the crate and its tests without real accelerator
//! hardware.
//!
//! Everything outside this module only ever touches devices and events
//! through [`DeviceId`], [`Event`], and [`DevicePool`], never through a raw
//! thread or timer, so swapping in a real multi-GPU backend later is a
//! matter of reimplementing this module alone.

use std::collections::HashMap;

/// Opaque device identifier. Devices are never constructed here; they are
/// just the keys an `index_map` is built over.
pub type DeviceId = usize;

/// An ordering token recorded on a device's stream after the last write to
/// a buffer. Consumers wait on it before reading.
///
/// The simulated backend executes every operation synchronously on the
/// calling thread, so `synchronize` is a no-op check rather than a real
/// wait; what matters is that the rest of the crate is structured around
/// recording and waiting on events at the points where a real asynchronous
/// backend would need them, so one can be dropped in without restructuring
/// call sites.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Event {
    device: DeviceId,
    seq: u64,
}

impl Event {
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Block until the work this event represents is visible to the host.
    pub fn synchronize(&self) {}
}

/// A device's command stream: submissions are ordered within a stream, and
/// `record` stamps an [`Event`] marking "everything submitted so far".
#[derive(Debug)]
pub struct Stream {
    device: DeviceId,
    counter: u64,
}

impl Stream {
    fn new(device: DeviceId) -> Self {
        Self { device, counter: 0 }
    }

    pub fn record(&mut self) -> Event {
        self.counter += 1;
        Event {
            device: self.device,
            seq: self.counter,
        }
    }
}

/// A pool of per-device streams, shared process-wide per device. Owns no
/// buffers; it exists purely to hand out monotonically increasing
/// [`Event`]s in device-submission order.
#[derive(Debug, Default)]
pub struct DevicePool {
    streams: HashMap<DeviceId, Stream>,
}

impl DevicePool {
    pub fn new(devices: impl IntoIterator<Item = DeviceId>) -> Self {
        let streams = devices
            .into_iter()
            .map(|d| (d, Stream::new(d)))
            .collect();
        Self { streams }
    }

    /// Returns the stream for `device`, lazily creating one if this is the
    /// first time the device is touched (e.g. a reshard's destination
    /// device that did not own any shard of the source array).
    pub fn stream(&mut self, device: DeviceId) -> &mut Stream {
        self.streams.entry(device).or_insert_with(|| Stream::new(device))
    }
}
