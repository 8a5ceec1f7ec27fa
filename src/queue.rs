// Lock-free bounded MPSC queue for the producer -> writer handoff
//
// Per-slot sequence tickets in the style of the Vyukov bounded queue:
// slot.seq == ticket       -> slot free for that ticket
// slot.seq == ticket + 1   -> record published, readable
// slot.seq == ticket + cap -> consumer released the slot for the next lap

use crate::record::Record;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache-aligned wrapper to prevent false sharing
#[repr(align(64))]
struct CacheAligned<T>(T);

struct Slot {
    seq: AtomicU64,
    record: UnsafeCell<Option<Record>>,
}

/// Lock-free multiple-producer single-consumer bounded queue.
///
/// `try_push` never blocks and never allocates; it either takes ownership
/// of the record or hands it back. `pop_all` must only ever be called from
/// one consumer at a time.
pub struct PrimaryQueue {
    slots: Box<[Slot]>,
    capacity: usize,
    tail: CacheAligned<AtomicU64>,
    head: CacheAligned<AtomicU64>,
}

// SAFETY: PrimaryQueue is Sync because:
// - Producers coordinate slot ownership via CAS on tail
// - A slot's record is only touched by the ticket holder (seq == ticket)
//   or the consumer (seq == ticket + 1), never both at once
// - Release stores on seq publish the record to the acquiring side
unsafe impl Send for PrimaryQueue {}
unsafe impl Sync for PrimaryQueue {}

impl PrimaryQueue {
    /// Create a queue with a fixed capacity.
    ///
    /// # Panics
    /// Panics if capacity is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");

        let slots: Vec<Slot> = (0..capacity)
            .map(|i| Slot {
                seq: AtomicU64::new(i as u64),
                record: UnsafeCell::new(None),
            })
            .collect();

        Self {
            slots: slots.into_boxed_slice(),
            capacity,
            tail: CacheAligned(AtomicU64::new(0)),
            head: CacheAligned(AtomicU64::new(0)),
        }
    }

    /// Try to enqueue a record without blocking.
    ///
    /// Returns the record back when the queue is full so the caller can
    /// route it to a fallback.
    pub fn try_push(&self, record: Record) -> Result<(), Record> {
        let cap = self.capacity as u64;

        loop {
            let tail = self.tail.0.load(Ordering::Relaxed);
            let head = self.head.0.load(Ordering::Acquire);

            // Reserved but not yet consumed count
            if tail.wrapping_sub(head) >= cap {
                return Err(record);
            }

            // Reserve ticket `tail`
            match self.tail.0.compare_exchange_weak(
                tail,
                tail + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    let slot = &self.slots[(tail % cap) as usize];

                    // Wait for the consumer to hand the slot back; bounded
                    // only by consumer progress
                    let mut spins = 0u32;
                    while slot.seq.load(Ordering::Acquire) != tail {
                        spins += 1;
                        if spins < 64 {
                            std::hint::spin_loop();
                        } else {
                            std::thread::yield_now();
                        }
                    }

                    // SAFETY: seq == ticket grants this producer exclusive
                    // access to the slot until the Release below
                    unsafe {
                        *slot.record.get() = Some(record);
                    }

                    // Publish; pairs with the consumer's Acquire on seq
                    slot.seq.store(tail + 1, Ordering::Release);
                    return Ok(());
                }
                Err(_) => {
                    // Another producer won the ticket
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Drain every published record.
    ///
    /// Single consumer only: callers must serialize access externally
    /// (the facade holds its sink lock around every drain).
    pub fn pop_all(&self) -> Vec<Record> {
        let cap = self.capacity as u64;

        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Acquire);
        let available = tail.saturating_sub(head);
        if available == 0 {
            return Vec::new();
        }

        let mut drained = Vec::with_capacity(available as usize);
        for k in 0..available {
            let ticket = head + k;
            let slot = &self.slots[(ticket % cap) as usize];

            // Wait until the producer that holds this ticket publishes
            let mut spins = 0u32;
            while slot.seq.load(Ordering::Acquire) != ticket + 1 {
                spins += 1;
                if spins < 64 {
                    std::hint::spin_loop();
                } else {
                    std::thread::yield_now();
                }
            }

            // SAFETY: seq == ticket + 1 means the record is fully written
            // and producers will not touch the slot until the Release below
            if let Some(record) = unsafe { (*slot.record.get()).take() } {
                drained.push(record);
            }

            // Hand the slot back for the next lap
            slot.seq.store(ticket + cap, Ordering::Release);
        }

        self.head.0.store(head + available, Ordering::Release);
        drained
    }

    /// Number of records currently reserved or published
    pub fn len(&self) -> usize {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Relaxed);
        (tail.saturating_sub(head) as usize).min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Level;
    use std::sync::Arc;
    use std::thread;

    fn record(tag: &str, message: &str) -> Record {
        Record::capture(Level::Info, std::process::id(), tag, message)
    }

    #[test]
    fn test_push_pop_basic() {
        let queue = PrimaryQueue::new(4);

        queue.try_push(record("T", "first")).unwrap();
        queue.try_push(record("T", "second")).unwrap();
        assert_eq!(queue.len(), 2);

        let drained = queue.pop_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].message, "first");
        assert_eq!(drained[1].message, "second");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_returns_record() {
        let queue = PrimaryQueue::new(2);

        queue.try_push(record("T", "a")).unwrap();
        queue.try_push(record("T", "b")).unwrap();

        let rejected = queue.try_push(record("T", "c")).unwrap_err();
        assert_eq!(rejected.message, "c");
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_capacity_one_wraps() {
        let queue = PrimaryQueue::new(1);

        for i in 0..16 {
            queue.try_push(record("T", &format!("msg{i}"))).unwrap();
            assert!(queue.try_push(record("T", "overflow")).is_err());
            let drained = queue.pop_all();
            assert_eq!(drained.len(), 1);
            assert_eq!(drained[0].message, format!("msg{i}"));
        }
    }

    #[test]
    fn test_wraparound_across_laps() {
        let queue = PrimaryQueue::new(4);

        for lap in 0..8 {
            for i in 0..4 {
                queue
                    .try_push(record("T", &format!("{lap}-{i}")))
                    .unwrap();
            }
            let drained = queue.pop_all();
            let messages: Vec<_> = drained.iter().map(|r| r.message.as_str()).collect();
            assert_eq!(
                messages,
                vec![
                    format!("{lap}-0"),
                    format!("{lap}-1"),
                    format!("{lap}-2"),
                    format!("{lap}-3")
                ]
            );
        }
    }

    #[test]
    fn test_concurrent_producers_lose_nothing() {
        let queue = Arc::new(PrimaryQueue::new(1024));
        let mut handles = vec![];

        for t in 0..4 {
            let queue = Arc::clone(&queue);
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    let tag = format!("T{t}");
                    loop {
                        match queue.try_push(record(&tag, &format!("{i}"))) {
                            Ok(()) => break,
                            Err(_) => thread::yield_now(),
                        }
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let drained = queue.pop_all();
        assert_eq!(drained.len(), 400);

        // Per-producer FIFO: each tag's messages come out in submission order
        for t in 0..4 {
            let tag = format!("T{t}");
            let messages: Vec<_> = drained
                .iter()
                .filter(|r| r.tag == tag)
                .map(|r| r.message.as_str())
                .collect();
            let expected: Vec<String> = (0..100).map(|i| i.to_string()).collect();
            assert_eq!(messages, expected);
        }
    }

    #[test]
    fn test_concurrent_drain_while_producing() {
        let queue = Arc::new(PrimaryQueue::new(16));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..1000 {
                    loop {
                        match queue.try_push(record("T", &format!("{i}"))) {
                            Ok(()) => break,
                            Err(_) => thread::yield_now(),
                        }
                    }
                }
            })
        };

        let mut seen = 0;
        while seen < 1000 {
            seen += queue.pop_all().len();
            assert!(queue.len() <= queue.capacity());
        }
        producer.join().unwrap();
        assert_eq!(seen, 1000);
        assert!(queue.is_empty());
    }

    #[test]
    #[should_panic(expected = "non-zero")]
    fn test_zero_capacity_rejected() {
        let _ = PrimaryQueue::new(0);
    }
}
