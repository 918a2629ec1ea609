//! Round-robin ring of device-backed frame buffers.
//!
//! The ring owns the device and every mapped slot for its whole lifetime.
//! Exactly one slot is exposed to the reader at a time; the previously
//! exposed slot goes back to the device before the next one is taken.
//!
//! ```text
//!   acquire_next():   [Filled k-1] ──submit──► [Queued]
//!                     dequeue ──► [Filled k]  (k = acquisitions mod N)
//! ```
//!
//! Callers borrow the exposed bytes through [`BufferRing::current`]; the
//! borrow ends before the next `acquire_next`, so a slot can never be
//! re-queued while it is still being read.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::capture::device::CaptureDevice;
use crate::capture::types::{FrameRef, SlotState, StreamConfig};
use crate::error::CaptureError;

// ── Constants ────────────────────────────────────────────────────

/// Number of slots requested when the caller has no preference.
pub const DEFAULT_SLOTS: usize = 2;

/// Poll interval while the device reports it has no filled buffer yet.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(2);

// ── Slot ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Slot {
    state: SlotState,
    /// Length of the mapping.
    mapped_len: usize,
    /// Bytes reported by the device for the latest fill.
    valid_len: usize,
}

// ── BufferRing ───────────────────────────────────────────────────

/// A fixed pool of device-owned buffers cycled without copying.
#[derive(Debug)]
pub struct BufferRing<D: CaptureDevice> {
    device: D,
    config: StreamConfig,
    slots: Vec<Slot>,
    /// Slot currently exposed to the reader.
    current: Option<usize>,
    /// Slot the next acquisition must return.
    next: usize,
    streaming: bool,
    closed: bool,
}

impl<D: CaptureDevice> BufferRing<D> {
    /// Configure `device` for `requested`, map `slot_count` buffers, queue
    /// them all and start streaming.
    ///
    /// The device is torn down again before any error is returned.
    pub fn open(
        device: D,
        requested: StreamConfig,
        slot_count: usize,
    ) -> Result<Self, CaptureError> {
        let mut ring = Self {
            device,
            config: requested,
            slots: Vec::with_capacity(slot_count),
            current: None,
            next: 0,
            streaming: false,
            closed: false,
        };

        if let Err(e) = ring.setup(requested, slot_count) {
            if let Err(teardown) = ring.close() {
                warn!("cleanup after failed open: {teardown}");
            }
            return Err(e);
        }

        info!(
            "{}: streaming {} with {} slots",
            ring.device.name(),
            ring.config,
            ring.slots.len()
        );
        Ok(ring)
    }

    fn setup(&mut self, requested: StreamConfig, slot_count: usize) -> Result<(), CaptureError> {
        if slot_count == 0 {
            return Err(CaptureError::Unsupported(
                "a buffer ring needs at least one slot".into(),
            ));
        }

        if requested.checked_frame_len().is_none() {
            return Err(CaptureError::Unsupported(format!(
                "{requested}: frame size does not fit in memory"
            )));
        }

        let actual = self.device.set_format(requested)?;
        if actual != requested {
            return Err(CaptureError::DeviceConfig { requested, actual });
        }
        self.config = actual;

        let granted = self.device.request_buffers(slot_count)?;
        if granted == 0 {
            return Err(CaptureError::io(
                "request buffers",
                "device granted no buffers",
            ));
        }
        if granted != slot_count {
            warn!("asked for {slot_count} buffers, device granted {granted}");
        }

        for index in 0..granted {
            let mapped_len = self.device.map_buffer(index)?;
            debug!("mapped slot {index}: {mapped_len} bytes");
            self.slots.push(Slot {
                state: SlotState::Free,
                mapped_len,
                valid_len: 0,
            });
        }

        for index in 0..granted {
            self.submit(index)?;
        }

        self.device.start()?;
        self.streaming = true;
        Ok(())
    }

    /// Hand slot `index` back to the device.
    ///
    /// Submitting a slot that is already queued is a no-op, so callers that
    /// race with the capture-completion edge need no extra bookkeeping.
    pub fn submit(&mut self, index: usize) -> Result<(), CaptureError> {
        self.ensure_open()?;
        let count = self.slots.len();
        let slot = self
            .slots
            .get(index)
            .ok_or(CaptureError::InvalidSlot { index, count })?;

        if slot.state == SlotState::Queued {
            return Ok(());
        }

        self.device.queue(index)?;
        self.slots[index].state = SlotState::Queued;
        if self.current == Some(index) {
            self.current = None;
        }
        Ok(())
    }

    /// Wait for the next filled slot and expose it.
    ///
    /// The previously exposed slot is resubmitted first. While the device
    /// is busy the ring sleeps `backoff` between polls; there is no retry
    /// limit, readiness is the device's call.
    pub async fn acquire_next(&mut self, backoff: Duration) -> Result<FrameRef, CaptureError> {
        self.ensure_open()?;
        if let Some(previous) = self.current.take() {
            self.submit(previous)?;
        }

        let expected = self.next;
        let filled = loop {
            match self.device.dequeue()? {
                Some(filled) => break filled,
                None => tokio::time::sleep(backoff).await,
            }
        };

        if filled.index != expected {
            if let Some(slot) = self.slots.get_mut(filled.index) {
                slot.state = SlotState::Free;
            }
            return Err(CaptureError::io(
                "dequeue buffer",
                format!(
                    "device returned slot {} but the ring expected slot {expected}",
                    filled.index
                ),
            ));
        }

        let slot = &mut self.slots[expected];
        slot.state = SlotState::Filled;
        slot.valid_len = if filled.bytes_used == 0 {
            slot.mapped_len
        } else {
            filled.bytes_used.min(slot.mapped_len)
        };
        let len = slot.valid_len;

        self.current = Some(expected);
        self.next = (expected + 1) % self.slots.len();

        Ok(FrameRef {
            index: expected,
            len,
            sequence: filled.sequence,
        })
    }

    /// Bytes of the exposed slot, truncated to the latest device-reported
    /// length.
    pub fn current(&self) -> Option<&[u8]> {
        let index = self.current?;
        let valid = self.slots[index].valid_len;
        let bytes = self.device.buffer(index);
        Some(&bytes[..valid.min(bytes.len())])
    }

    /// Index of the exposed slot.
    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// State of slot `index`, `None` when out of range.
    pub fn slot_state(&self, index: usize) -> Option<SlotState> {
        self.slots.get(index).map(|s| s.state)
    }

    /// Number of slots currently exposed to the reader (0 or 1).
    pub fn filled_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Filled)
            .count()
    }

    /// Number of slots currently owned by the device.
    pub fn queued_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Queued)
            .count()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Geometry the device accepted.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop streaming, unmap every slot and release the device.
    ///
    /// Every step runs even when an earlier one failed; failures are
    /// collected into [`CaptureError::Teardown`]. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), CaptureError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.current = None;

        let mut errors = Vec::new();

        if self.streaming {
            self.streaming = false;
            if let Err(e) = self.device.stop() {
                errors.push(e);
            }
        }

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Err(e) = self.device.unmap_buffer(index) {
                errors.push(e);
            }
            slot.state = SlotState::Free;
        }

        if let Err(e) = self.device.release() {
            errors.push(e);
        }

        if errors.is_empty() {
            debug!("{}: closed", self.device.name());
            Ok(())
        } else {
            Err(CaptureError::Teardown(errors))
        }
    }

    fn ensure_open(&self) -> Result<(), CaptureError> {
        if self.closed {
            Err(CaptureError::io("buffer ring", "ring is closed"))
        } else {
            Ok(())
        }
    }
}

impl<D: CaptureDevice> Drop for BufferRing<D> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("closing capture device: {e}");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::device::DequeuedBuffer;
    use crate::capture::synthetic::{SyntheticDevice, read_sequence_stamp};
    use crate::capture::types::PixelFormat;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use proptest::prelude::*;

    fn cfg() -> StreamConfig {
        StreamConfig::new(32, 8, PixelFormat::Yuyv)
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn open_queues_every_slot() {
        let ring = BufferRing::open(SyntheticDevice::new(), cfg(), 3).unwrap();
        assert_eq!(ring.slot_count(), 3);
        assert_eq!(ring.queued_count(), 3);
        assert_eq!(ring.filled_count(), 0);
        assert!(ring.current().is_none());
    }

    #[tokio::test]
    async fn acquisitions_cycle_round_robin() {
        let mut ring = BufferRing::open(SyntheticDevice::new(), cfg(), 2).unwrap();
        for k in 0..6 {
            let frame = ring.acquire_next(DEFAULT_BACKOFF).await.unwrap();
            assert_eq!(frame.index, k % 2);
            assert_eq!(frame.len, cfg().frame_len());
            assert_eq!(ring.filled_count(), 1);
            assert_eq!(ring.queued_count(), 1);
        }
    }

    #[tokio::test]
    async fn current_exposes_device_bytes() {
        let mut ring = BufferRing::open(SyntheticDevice::new(), cfg(), 2).unwrap();
        let first = ring.acquire_next(DEFAULT_BACKOFF).await.unwrap();
        let bytes = ring.current().unwrap();
        assert_eq!(bytes.len(), first.len);
        assert_eq!(read_sequence_stamp(bytes), Some(first.sequence));

        let second = ring.acquire_next(DEFAULT_BACKOFF).await.unwrap();
        assert!(second.sequence > first.sequence);
        assert_eq!(read_sequence_stamp(ring.current().unwrap()), Some(second.sequence));
    }

    #[tokio::test]
    async fn submit_is_idempotent() {
        let mut ring = BufferRing::open(SyntheticDevice::new(), cfg(), 2).unwrap();
        ring.submit(1).unwrap();
        ring.submit(1).unwrap();
        assert_eq!(ring.queued_count(), 2);

        let frame = ring.acquire_next(DEFAULT_BACKOFF).await.unwrap();
        ring.submit(frame.index).unwrap();
        ring.submit(frame.index).unwrap();
        assert_eq!(ring.filled_count(), 0);
        assert!(ring.current().is_none());

        // The explicit submit already returned the slot; the next
        // acquisition must not queue it again.
        let next = ring.acquire_next(DEFAULT_BACKOFF).await.unwrap();
        assert_eq!(next.index, 1);
    }

    #[tokio::test]
    async fn submit_rejects_unknown_slot() {
        let mut ring = BufferRing::open(SyntheticDevice::new(), cfg(), 2).unwrap();
        let err = ring.submit(5).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidSlot { index: 5, count: 2 }));
    }

    #[tokio::test]
    async fn single_slot_ring_works() {
        let mut ring = BufferRing::open(SyntheticDevice::new(), cfg(), 1).unwrap();
        for _ in 0..3 {
            let frame = ring.acquire_next(DEFAULT_BACKOFF).await.unwrap();
            assert_eq!(frame.index, 0);
            assert_eq!(ring.queued_count(), 0);
        }
    }

    #[tokio::test]
    async fn busy_device_is_retried_not_failed() {
        let device = SyntheticDevice::new().with_busy_polls(5);
        let mut ring = BufferRing::open(device, cfg(), 2).unwrap();
        let frame = ring
            .acquire_next(Duration::from_micros(100))
            .await
            .unwrap();
        assert_eq!(frame.index, 0);
    }

    #[tokio::test]
    async fn rejected_geometry_is_config_error() {
        let device = SyntheticDevice::new().with_max_resolution(16, 8);
        let err = BufferRing::open(device, cfg(), 2).err().unwrap();
        match err {
            CaptureError::DeviceConfig { requested, actual } => {
                assert_eq!(requested, cfg());
                assert_eq!(actual.width, 16);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn zero_slots_is_rejected() {
        assert!(BufferRing::open(SyntheticDevice::new(), cfg(), 0).is_err());
    }

    #[tokio::test]
    async fn overflowing_geometry_is_rejected() {
        let huge = StreamConfig::new(u32::MAX, u32::MAX, PixelFormat::Rgb24);
        let device = SyntheticDevice::new().with_max_resolution(u32::MAX, u32::MAX);
        let err = BufferRing::open(device, huge, 2).unwrap_err();
        assert!(matches!(err, CaptureError::Unsupported(_)));
    }

    #[tokio::test]
    async fn closed_ring_refuses_work() {
        let mut ring = BufferRing::open(SyntheticDevice::new(), cfg(), 2).unwrap();
        ring.close().unwrap();
        ring.close().unwrap();
        assert!(ring.is_closed());
        assert!(ring.acquire_next(DEFAULT_BACKOFF).await.is_err());
        assert_eq!(ring.slot_state(0), Some(SlotState::Free));
    }

    #[tokio::test]
    async fn paced_device_drops_frames_for_slow_reader() {
        let interval = Duration::from_millis(5);
        let device = SyntheticDevice::new().with_frame_interval(interval);
        let mut ring = BufferRing::open(device, cfg(), 2).unwrap();

        let mut sequences = Vec::new();
        for _ in 0..8 {
            let frame = ring.acquire_next(Duration::from_millis(1)).await.unwrap();
            assert!(ring.filled_count() <= 1);
            sequences.push(frame.sequence);
            tokio::time::sleep(interval * 2).await;
        }

        assert!(sequences.windows(2).all(|w| w[1] > w[0]));
        // Eight reads spaced two intervals apart span at least fourteen
        // device frames; the ring kept only the latest each time.
        assert!(sequences[7] - sequences[0] >= 14);
        assert_eq!(ring.slot_count(), 2);
    }

    // ── Failure injection ────────────────────────────────────────

    /// Wraps a synthetic device and fails selected release steps.
    struct FlakyDevice {
        inner: SyntheticDevice,
        fail_stop: bool,
        fail_unmap: bool,
        released: Arc<AtomicBool>,
        out_of_order: bool,
    }

    impl CaptureDevice for FlakyDevice {
        fn set_format(&mut self, requested: StreamConfig) -> Result<StreamConfig, CaptureError> {
            self.inner.set_format(requested)
        }
        fn request_buffers(&mut self, count: usize) -> Result<usize, CaptureError> {
            self.inner.request_buffers(count)
        }
        fn map_buffer(&mut self, index: usize) -> Result<usize, CaptureError> {
            self.inner.map_buffer(index)
        }
        fn buffer(&self, index: usize) -> &[u8] {
            self.inner.buffer(index)
        }
        fn queue(&mut self, index: usize) -> Result<(), CaptureError> {
            self.inner.queue(index)
        }
        fn dequeue(&mut self) -> Result<Option<DequeuedBuffer>, CaptureError> {
            let filled = self.inner.dequeue()?;
            if self.out_of_order {
                return Ok(filled.map(|b| DequeuedBuffer { index: 1, ..b }));
            }
            Ok(filled)
        }
        fn start(&mut self) -> Result<(), CaptureError> {
            self.inner.start()
        }
        fn stop(&mut self) -> Result<(), CaptureError> {
            self.inner.stop()?;
            if self.fail_stop {
                return Err(CaptureError::io("stop streaming", "injected"));
            }
            Ok(())
        }
        fn unmap_buffer(&mut self, index: usize) -> Result<(), CaptureError> {
            self.inner.unmap_buffer(index)?;
            if self.fail_unmap {
                return Err(CaptureError::io("munmap", "injected"));
            }
            Ok(())
        }
        fn release(&mut self) -> Result<(), CaptureError> {
            self.released.store(true, Ordering::SeqCst);
            self.inner.release()
        }
        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn flaky(fail_stop: bool, fail_unmap: bool) -> (FlakyDevice, Arc<AtomicBool>) {
        let released = Arc::new(AtomicBool::new(false));
        (
            FlakyDevice {
                inner: SyntheticDevice::new(),
                fail_stop,
                fail_unmap,
                released: released.clone(),
                out_of_order: false,
            },
            released,
        )
    }

    #[tokio::test]
    async fn teardown_runs_every_step_and_aggregates() {
        let (device, released) = flaky(true, true);
        let mut ring = BufferRing::open(device, cfg(), 2).unwrap();
        ring.acquire_next(DEFAULT_BACKOFF).await.unwrap();

        match ring.close() {
            Err(CaptureError::Teardown(errors)) => {
                // stop + one unmap per slot
                assert_eq!(errors.len(), 3);
            }
            other => panic!("expected teardown error, got {other:?}"),
        }
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn drop_releases_device() {
        let (device, released) = flaky(false, true);
        {
            let _ring = BufferRing::open(device, cfg(), 2).unwrap();
        }
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failed_open_releases_device() {
        let (mut device, released) = flaky(false, false);
        device.inner = SyntheticDevice::new().with_max_resolution(8, 8);
        assert!(BufferRing::open(device, cfg(), 2).is_err());
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn out_of_order_dequeue_is_device_error() {
        let (mut device, _) = flaky(false, false);
        device.out_of_order = true;
        let mut ring = BufferRing::open(device, cfg(), 2).unwrap();
        let err = ring.acquire_next(DEFAULT_BACKOFF).await.unwrap_err();
        assert!(matches!(err, CaptureError::DeviceIo { .. }));
    }

    // ── Ring invariant ───────────────────────────────────────────

    #[derive(Debug, Clone)]
    enum Op {
        Acquire,
        Submit(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => Just(Op::Acquire),
            1 => (0usize..4).prop_map(Op::Submit),
        ]
    }

    proptest! {
        #[test]
        fn at_most_one_filled_and_strict_round_robin(
            slots in 1usize..=4,
            ops in proptest::collection::vec(op(), 1..40),
        ) {
            let rt = runtime();
            rt.block_on(async {
                let mut ring = BufferRing::open(SyntheticDevice::new(), cfg(), slots).unwrap();
                let mut k = 0usize;
                for op in ops {
                    match op {
                        Op::Acquire => {
                            let frame = ring.acquire_next(DEFAULT_BACKOFF).await.unwrap();
                            prop_assert_eq!(frame.index, k % slots);
                            k += 1;
                        }
                        Op::Submit(index) if index < slots => {
                            ring.submit(index).unwrap();
                        }
                        Op::Submit(index) => {
                            prop_assert!(ring.submit(index).is_err());
                        }
                    }
                    prop_assert!(ring.filled_count() <= 1);
                    prop_assert!(ring.queued_count() + ring.filled_count() == slots);
                }
                Ok(())
            })?;
        }
    }
}
