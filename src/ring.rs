use crate::{
    QueueError,
    traits::{BoundedBuild, BoundedQueue, ConsumerQueue},
};
use crossbeam_utils::CachePadded;
use std::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    sync::atomic::{AtomicUsize, Ordering},
};

/// One ring slot: the payload plus the sequence stamp that arbitrates it.
///
/// The stamp encodes which lap of the ring the slot belongs to. A slot is
/// writable when its stamp equals the producer cursor, and readable when it
/// equals the consumer cursor plus one.
struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded MPMC ring buffer with per-slot sequence stamps.
///
/// This is Dmitry Vyukov's bounded queue: a power-of-two array of slots,
/// a producer cursor, and a consumer cursor. The cursors only ever grow;
/// wrap-around exists solely in the index computation `cursor & (N - 1)`.
/// Each slot's sequence stamp tells both sides whether the slot is theirs
/// for the current lap, so the cursors themselves can be updated with
/// relaxed ordering -- the stamp publication carries the synchronization.
///
/// The ring never allocates after construction and never blocks; enqueue
/// reports [`QueueError::Full`] and dequeue [`QueueError::Empty`] as plain
/// return values.
///
/// # Examples
///
/// ```rust
/// use quiver::ring::RingQueue;
/// use quiver::traits::BoundedQueue;
///
/// # fn main() -> Result<(), quiver::QueueError> {
/// let queue = RingQueue::with_capacity(4)?;
///
/// for i in 0..4 {
///     assert!(queue.mp_enqueue(i).is_ok());
/// }
/// // Fifth enqueue finds no slot and hands the value back.
/// assert!(queue.mp_enqueue(4).is_err());
///
/// assert_eq!(queue.mc_dequeue()?, 0);
/// assert!(queue.mp_enqueue(4).is_ok());
/// # Ok(())
/// # }
/// ```
pub struct RingQueue<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    /// Producer cursor: the next logical slot to claim for an enqueue.
    head: CachePadded<AtomicUsize>,
    /// Consumer cursor: the next logical slot to drain.
    tail: CachePadded<AtomicUsize>,
}

// SAFETY: items move through the ring by value; slots are handed between
// threads only through the acquire/release sequence-stamp protocol.
unsafe impl<T: Send> Send for RingQueue<T> {}
unsafe impl<T: Send> Sync for RingQueue<T> {}

impl<T> RingQueue<T> {
    /// Create a ring holding up to `capacity` elements.
    ///
    /// # Returns
    /// The ring, or [`QueueError::InvalidCapacity`] unless `capacity` is a
    /// nonzero power of two.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use quiver::{QueueError, ring::RingQueue};
    ///
    /// assert!(RingQueue::<u32>::with_capacity(8).is_ok());
    /// assert_eq!(
    ///     RingQueue::<u32>::with_capacity(6).err(),
    ///     Some(QueueError::InvalidCapacity)
    /// );
    /// ```
    pub fn with_capacity(capacity: usize) -> Result<Self, QueueError> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(QueueError::InvalidCapacity);
        }

        let slots = (0..capacity)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Ok(Self {
            slots,
            mask: capacity - 1,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        })
    }

    /// Maximum number of elements the ring can hold.
    pub const fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Push a value, contending with other producers via CAS on the
    /// producer cursor.
    pub fn mp_enqueue(&self, value: T) -> Result<(), (T, QueueError)> {
        loop {
            let head = self.head.load(Ordering::Relaxed);
            let slot = &self.slots[head & self.mask];
            let sequence = slot.sequence.load(Ordering::Acquire);
            let dif = sequence.wrapping_sub(head) as isize;

            if dif == 0 {
                // The slot is ours for this lap if we win the cursor race.
                if self
                    .head
                    .compare_exchange_weak(head, head + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    // SAFETY: winning the CAS grants exclusive write access
                    // to this slot until the stamp below is published.
                    unsafe { (*slot.value.get()).write(value) };
                    slot.sequence.store(head + 1, Ordering::Release);
                    return Ok(());
                }
            } else if dif < 0 {
                // The slot still carries last lap's item: ring is full.
                return Err((value, QueueError::Full));
            }
            // dif > 0: another producer claimed and published this slot
            // already; reload the cursor and try the next one.
        }
    }

    /// Push a value from the only producer.
    ///
    /// The cursor is claimed with a plain store instead of a CAS, which is
    /// the entire point of the role tag.
    ///
    /// # Safety
    /// No other thread may execute any enqueue on this queue for the
    /// duration of the call.
    pub unsafe fn sp_enqueue(&self, value: T) -> Result<(), (T, QueueError)> {
        let head = self.head.load(Ordering::Relaxed);
        let slot = &self.slots[head & self.mask];
        let sequence = slot.sequence.load(Ordering::Acquire);

        // With an exclusive producer the stamp is either ours (empty slot)
        // or a lap behind (full ring); it can never be ahead.
        if sequence == head {
            self.head.store(head + 1, Ordering::Relaxed);
            // SAFETY: the exclusivity contract means nobody else can claim
            // this slot between the load and the store above.
            unsafe { (*slot.value.get()).write(value) };
            slot.sequence.store(head + 1, Ordering::Release);
            Ok(())
        } else {
            Err((value, QueueError::Full))
        }
    }

    /// Pop a value, contending with other consumers via CAS on the
    /// consumer cursor.
    pub fn mc_dequeue(&self) -> Result<T, QueueError> {
        loop {
            let tail = self.tail.load(Ordering::Relaxed);
            let slot = &self.slots[tail & self.mask];
            let sequence = slot.sequence.load(Ordering::Acquire);
            let dif = sequence.wrapping_sub(tail.wrapping_add(1)) as isize;

            if dif == 0 {
                if self
                    .tail
                    .compare_exchange_weak(tail, tail + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    // SAFETY: winning the CAS grants exclusive read access;
                    // the acquire load of the stamp ordered the producer's
                    // write before this read.
                    let value = unsafe { (*slot.value.get()).assume_init_read() };
                    // Return the slot to the pool for the next lap.
                    slot.sequence
                        .store(tail.wrapping_add(self.capacity()), Ordering::Release);
                    return Ok(value);
                }
            } else if dif < 0 {
                return Err(QueueError::Empty);
            }
        }
    }

    /// Pop a value with a single attempt, refusing to wait out a slot race.
    pub fn mc_dequeue_uncontended(&self) -> Result<T, QueueError> {
        let tail = self.tail.load(Ordering::Relaxed);
        let slot = &self.slots[tail & self.mask];
        let sequence = slot.sequence.load(Ordering::Acquire);
        let dif = sequence.wrapping_sub(tail.wrapping_add(1)) as isize;

        if dif < 0 {
            return Err(QueueError::Empty);
        }
        if dif == 0
            && self
                .tail
                .compare_exchange(tail, tail + 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            // SAFETY: as in `mc_dequeue`.
            let value = unsafe { (*slot.value.get()).assume_init_read() };
            slot.sequence
                .store(tail.wrapping_add(self.capacity()), Ordering::Release);
            return Ok(value);
        }
        // Lost the race, or the slot is mid-publication by a peer.
        Err(QueueError::Contended)
    }

    /// Pop a value as the only consumer.
    ///
    /// # Safety
    /// No other thread may execute any dequeue on this queue for the
    /// duration of the call.
    pub unsafe fn sc_dequeue(&self) -> Result<T, QueueError> {
        let tail = self.tail.load(Ordering::Relaxed);
        let slot = &self.slots[tail & self.mask];
        let sequence = slot.sequence.load(Ordering::Acquire);

        if sequence == tail.wrapping_add(1) {
            self.tail.store(tail + 1, Ordering::Relaxed);
            // SAFETY: the exclusivity contract makes the cursor store above
            // unobservable by peers; the acquire load ordered the
            // producer's write before this read.
            let value = unsafe { (*slot.value.get()).assume_init_read() };
            slot.sequence
                .store(tail.wrapping_add(self.capacity()), Ordering::Release);
            Ok(value)
        } else {
            Err(QueueError::Empty)
        }
    }
}

impl<T> Drop for RingQueue<T> {
    fn drop(&mut self) {
        // No operation is in flight once we hold `&mut self`, so every
        // claimed slot has been published. Walk the occupied range and drop
        // the remaining items in place.
        let head = *self.head.get_mut();
        let mut tail = *self.tail.get_mut();
        while tail != head {
            let index = tail & self.mask;
            if *self.slots[index].sequence.get_mut() == tail.wrapping_add(1) {
                // SAFETY: stamp `tail + 1` means the slot holds an item
                // that was never dequeued.
                unsafe { self.slots[index].value.get_mut().assume_init_drop() };
            }
            tail = tail.wrapping_add(1);
        }
    }
}

impl<T: Send> ConsumerQueue<T> for RingQueue<T> {
    fn mc_dequeue(&self) -> Result<T, QueueError> {
        Self::mc_dequeue(self)
    }

    fn mc_dequeue_uncontended(&self) -> Result<T, QueueError> {
        Self::mc_dequeue_uncontended(self)
    }

    unsafe fn sc_dequeue(&self) -> Result<T, QueueError> {
        // SAFETY: forwarded contract.
        unsafe { Self::sc_dequeue(self) }
    }
}

impl<T: Send> BoundedQueue<T> for RingQueue<T> {
    fn mp_enqueue(&self, value: T) -> Result<(), (T, QueueError)> {
        Self::mp_enqueue(self, value)
    }

    unsafe fn sp_enqueue(&self, value: T) -> Result<(), (T, QueueError)> {
        // SAFETY: forwarded contract.
        unsafe { Self::sp_enqueue(self, value) }
    }
}

impl<T: Send> BoundedBuild<T> for RingQueue<T> {
    fn with_capacity(capacity: usize) -> Result<Self, QueueError> {
        Self::with_capacity(capacity)
    }
}
