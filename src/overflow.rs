// Crash-safe overflow ring, reached only when the primary queue is full
//
// Lossy by contract: when this ring is also full the record is dropped and
// counted. A simple size/write/read atomic triple is enough here because
// the primary queue absorbs the common case; a per-slot state byte keeps
// the drain from ever observing a half-written record.

use crate::record::Record;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

const EMPTY: u8 = 0;
const READY: u8 = 1;

struct Slot {
    state: AtomicU8,
    record: UnsafeCell<Option<Record>>,
}

/// Bounded lossy ring buffer drained by the writer.
///
/// Relative-age ordering between this ring and the primary queue is not
/// preserved; the writer always drains the primary first.
pub struct OverflowBuffer {
    slots: Box<[Slot]>,
    capacity: usize,
    size: AtomicUsize,
    write_idx: AtomicU64,
    read_idx: AtomicU64,
    dropped: AtomicU64,
}

// SAFETY: slot access is gated by the EMPTY/READY state machine; a slot is
// written only after its reservation (size CAS + write_idx claim) and read
// only after the producer's Release store of READY.
unsafe impl Send for OverflowBuffer {}
unsafe impl Sync for OverflowBuffer {}

impl OverflowBuffer {
    /// # Panics
    /// Panics if capacity is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "overflow capacity must be non-zero");

        let slots: Vec<Slot> = (0..capacity)
            .map(|_| Slot {
                state: AtomicU8::new(EMPTY),
                record: UnsafeCell::new(None),
            })
            .collect();

        Self {
            slots: slots.into_boxed_slice(),
            capacity,
            size: AtomicUsize::new(0),
            write_idx: AtomicU64::new(0),
            read_idx: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Try to enqueue; on a full ring the record is dropped and counted.
    pub fn try_push(&self, record: Record) -> bool {
        // Reserve a unit of capacity; CAS so a reservation is never undone
        loop {
            let size = self.size.load(Ordering::Acquire);
            if size >= self.capacity {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            if self
                .size
                .compare_exchange_weak(size, size + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
            std::hint::spin_loop();
        }

        let idx = self.write_idx.fetch_add(1, Ordering::AcqRel);
        let slot = &self.slots[(idx % self.capacity as u64) as usize];

        // The slot may still hold the previous lap's record mid-drain
        let mut spins = 0u32;
        while slot.state.load(Ordering::Acquire) != EMPTY {
            spins += 1;
            if spins < 64 {
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }

        // SAFETY: state == EMPTY plus the capacity reservation grants this
        // producer exclusive access until the Release below
        unsafe {
            *slot.record.get() = Some(record);
        }
        slot.state.store(READY, Ordering::Release);
        true
    }

    /// Drain every record currently in the ring.
    ///
    /// Single consumer only, serialized externally like the primary queue.
    pub fn pop_all(&self) -> Vec<Record> {
        let taken = self.size.swap(0, Ordering::AcqRel);
        if taken == 0 {
            return Vec::new();
        }

        let read = self.read_idx.load(Ordering::Relaxed);
        let mut drained = Vec::with_capacity(taken);
        for k in 0..taken as u64 {
            let slot = &self.slots[((read + k) % self.capacity as u64) as usize];

            // A reservation may not have published yet; bounded by
            // producer progress
            let mut spins = 0u32;
            while slot.state.load(Ordering::Acquire) != READY {
                spins += 1;
                if spins < 64 {
                    std::hint::spin_loop();
                } else {
                    std::thread::yield_now();
                }
            }

            // SAFETY: READY means the producer finished its write and will
            // not touch the slot again this lap
            if let Some(record) = unsafe { (*slot.record.get()).take() } {
                drained.push(record);
            }
            slot.state.store(EMPTY, Ordering::Release);
        }

        self.read_idx.store(read + taken as u64, Ordering::Release);
        drained
    }

    /// Number of records permanently dropped because the ring was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
