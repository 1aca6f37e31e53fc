//! Bounded ring of pre-encapsulated outbound frames (spec §3 `TxQueue`,
//! §4.5). Grounded on the teacher's `PktBuf` in `sw/src/pkt_buf.rs`: same
//! "fixed storage carved into slots, head/tail indices, no heap" shape,
//! adapted from sub-slices of one MMIO arena to an array of owned fixed-size
//! slots, since this crate has no single memory-mapped arena to carve up.

use debug::{logln, LL};

const LOG_LEVEL: LL = LL::Debug;

/// Default ring capacity (spec §3). One slot is always left empty to
/// distinguish full from empty without a separate counter, so the usable
/// capacity is `TX_QUEUE_LEN - 1`.
pub const TX_QUEUE_LEN: usize = 16;

/// Largest frame a single `TxSlot` can carry. Sized to the default
/// `RX_BUFFER_SIZE` (spec §3) so one constant covers both a BNEP frame atop
/// the largest reasonable Ethernet payload and a full SLIP-escaped run.
pub const TX_SLOT_CAP: usize = 1700;

/// Failure enqueuing a frame (spec §7 "Data-plane exhaustion").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TxQueueError {
    /// The ring is at capacity; the frame is dropped.
    Full,
    /// The frame is larger than any slot can hold; dropped regardless of
    /// occupancy.
    FrameTooLarge,
}

/// One owned, contiguous, already-encapsulated outbound frame (spec §3).
#[derive(Clone, Copy)]
pub struct TxSlot {
    buf: [u8; TX_SLOT_CAP],
    len: usize,
}

impl TxSlot {
    pub const fn empty() -> TxSlot {
        TxSlot { buf: [0u8; TX_SLOT_CAP], len: 0 }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<TxSlot> {
        if bytes.len() > TX_SLOT_CAP {
            return None;
        }
        let mut slot = TxSlot::empty();
        slot.buf[..bytes.len()].copy_from_slice(bytes);
        slot.len = bytes.len();
        Some(slot)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

/// Fixed-capacity FIFO ring of `TxSlot`s (spec §3, §5 "ordering within the
/// queue is strictly FIFO"). Enqueue is rejected once full rather than
/// overwriting the oldest frame.
pub struct TxQueue {
    slots: [TxSlot; TX_QUEUE_LEN],
    head: usize,
    tail: usize,
    count: usize,
}

impl TxQueue {
    pub const fn new() -> TxQueue {
        TxQueue { slots: [TxSlot::empty(); TX_QUEUE_LEN], head: 0, tail: 0, count: 0 }
    }

    /// Usable capacity, one less than `TX_QUEUE_LEN` (spec §3).
    pub const fn capacity(&self) -> usize {
        TX_QUEUE_LEN - 1
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count >= self.capacity()
    }

    /// Enqueue an already-encapsulated frame. Rejected without disturbing
    /// head/tail if the ring is full or the frame overruns a slot (spec §8
    /// "Queue-full drop returns OutOfMemory without corrupting head/tail
    /// indices").
    pub fn enqueue(&mut self, bytes: &[u8]) -> Result<(), TxQueueError> {
        if self.is_full() {
            return Err(TxQueueError::Full);
        }
        let slot = TxSlot::from_bytes(bytes).ok_or(TxQueueError::FrameTooLarge)?;
        self.slots[self.tail] = slot;
        self.tail = (self.tail + 1) % TX_QUEUE_LEN;
        self.count += 1;
        Ok(())
    }

    /// Copy out the next frame to send without removing it from the ring.
    /// `TxSlot` is `Copy`, so this sidesteps holding a borrow of the queue
    /// across the send call that decides whether to `pop` it.
    pub fn peek(&self) -> Option<TxSlot> {
        if self.is_empty() {
            None
        } else {
            Some(self.slots[self.head])
        }
    }

    /// Remove the frame last returned by `peek` (the HAL accepted it).
    pub fn pop(&mut self) {
        if !self.is_empty() {
            self.head = (self.head + 1) % TX_QUEUE_LEN;
            self.count -= 1;
        }
    }

    /// Drop every queued frame, freeing all slots (spec §5 `stop`
    /// cancellation primitive).
    pub fn clear(&mut self) {
        if self.count > 0 {
            logln!(LL::Debug, "txqueue: flushing {} frame(s)", self.count);
        }
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_dequeue_is_fifo() {
        let mut q = TxQueue::new();
        q.enqueue(&[1, 2, 3]).unwrap();
        q.enqueue(&[4, 5]).unwrap();
        assert_eq!(q.peek().unwrap().as_bytes(), &[1, 2, 3]);
        q.pop();
        assert_eq!(q.peek().unwrap().as_bytes(), &[4, 5]);
        q.pop();
        assert!(q.is_empty());
    }

    #[test]
    fn queue_full_rejects_without_corrupting_indices() {
        let mut q = TxQueue::new();
        for i in 0..q.capacity() {
            q.enqueue(&[i as u8]).unwrap();
        }
        assert!(q.is_full());
        assert_eq!(q.enqueue(&[0xFF]), Err(TxQueueError::Full));
        // Still drains in original order; nothing was corrupted by the
        // rejected enqueue.
        for i in 0..q.capacity() {
            assert_eq!(q.peek().unwrap().as_bytes(), &[i as u8]);
            q.pop();
        }
        assert!(q.is_empty());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut q = TxQueue::new();
        let huge = [0u8; TX_SLOT_CAP + 1];
        assert_eq!(q.enqueue(&huge), Err(TxQueueError::FrameTooLarge));
        assert!(q.is_empty());
    }

    #[test]
    fn clear_empties_ring() {
        let mut q = TxQueue::new();
        q.enqueue(&[1]).unwrap();
        q.enqueue(&[2]).unwrap();
        q.clear();
        assert!(q.is_empty());
        assert!(q.peek().is_none());
    }

    #[test]
    fn ring_wraps_around_storage() {
        let mut q = TxQueue::new();
        // Fill and drain repeatedly so head/tail wrap past TX_QUEUE_LEN.
        for round in 0..3 {
            for i in 0..q.capacity() {
                q.enqueue(&[(round * 10 + i) as u8]).unwrap();
            }
            for i in 0..q.capacity() {
                assert_eq!(q.peek().unwrap().as_bytes(), &[(round * 10 + i) as u8]);
                q.pop();
            }
        }
        assert!(q.is_empty());
    }
}
