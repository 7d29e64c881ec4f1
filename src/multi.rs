use crate::{
    QueueError,
    tls::ThreadLocalStore,
    traits::{BoundedBuild, BoundedQueue, ConsumerQueue, UnboundedQueue},
};
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use std::{marker::PhantomData, sync::Arc};

/// Shard indexes handed to producer threads: freed indexes are reused
/// before the round-robin counter mints new ones, so a long-lived queue
/// with short-lived producer threads keeps cycling the same few shards.
struct IndexPool {
    next: usize,
    released: Vec<usize>,
    shards: usize,
}

impl IndexPool {
    fn acquire(&mut self) -> usize {
        self.released.pop().unwrap_or_else(|| {
            let index = self.next % self.shards;
            self.next += 1;
            index
        })
    }

    fn release(&mut self, index: usize) {
        self.released.push(index);
    }
}

/// A logical queue sharded over `K` inner queues.
///
/// Contention drops because threads rarely meet: each producer thread is
/// assigned one shard on its first enqueue and sticks to it until the
/// thread exits (the assignment rides a [`ThreadLocalStore`], so the index
/// returns to a shared pool for reuse). Each consumer thread keeps a
/// *hitlist* -- its own ordering of the shard indexes -- and walks it in
/// two passes: first with the uncontended probe, so one busy shard cannot
/// serialize every consumer, then with the contended dequeue. A hit
/// rotates the winning shard to the front of that thread's hitlist, which
/// adapts the scan toward shards that are actually producing.
///
/// FIFO order holds per shard, which combined with producer affinity means
/// each producer thread's items are dequeued in the order it enqueued
/// them. There is no ordering between items of different producers.
///
/// `MultiQueue` takes on the capacity discipline of its inner queue: with
/// an [`UnboundedQueue`] inner it is unbounded, with a [`BoundedQueue`]
/// inner each shard is bounded and enqueue reports
/// [`QueueError::Full`] when the calling thread's shard fills up.
///
/// # Examples
///
/// ```rust
/// use quiver::list::ListQueue;
/// use quiver::multi::MultiQueue;
/// use quiver::traits::{ConsumerQueue, UnboundedQueue};
///
/// let queue: MultiQueue<u64, ListQueue<u64>> = MultiQueue::new(4);
///
/// queue.mp_enqueue(1);
/// queue.mp_enqueue(2);
/// assert_eq!(queue.mc_dequeue(), Ok(1));
/// assert_eq!(queue.mc_dequeue(), Ok(2));
/// assert!(queue.mc_dequeue().is_err());
/// ```
pub struct MultiQueue<T, Q> {
    shards: Box<[CachePadded<Q>]>,
    /// Producer thread -> shard index, recycled through the pool.
    assignment: ThreadLocalStore<usize>,
    /// Consumer thread -> its scan order over the shard indexes.
    hitlist: ThreadLocalStore<Vec<usize>>,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T, Q> MultiQueue<T, Q> {
    fn from_shards(shards: Vec<Q>) -> Self {
        let count = shards.len();
        assert!(count > 0, "a sharded queue needs at least one subqueue");

        let pool = Arc::new(Mutex::new(IndexPool {
            next: 0,
            released: Vec::new(),
            shards: count,
        }));
        let assignment = {
            let acquire = Arc::clone(&pool);
            ThreadLocalStore::with_return(
                move || acquire.lock().acquire(),
                move |index| pool.lock().release(index),
            )
        };
        let hitlist = ThreadLocalStore::new(move || (0..count).collect());

        Self {
            shards: shards.into_iter().map(CachePadded::new).collect(),
            assignment,
            hitlist,
            _marker: PhantomData,
        }
    }

    /// Number of shards.
    pub fn subqueues(&self) -> usize {
        self.shards.len()
    }

    /// The calling thread's hitlist, initialized on first access, with a
    /// sanity fallback should a panicking probe have lost it.
    fn checked_hitlist(&self) -> Vec<usize> {
        let mut hitlist = self.hitlist.take();
        if hitlist.len() != self.shards.len() {
            hitlist = (0..self.shards.len()).collect();
        }
        hitlist
    }

    /// Walk the hitlist probing each shard; on a hit, rotate the winning
    /// index to the front so the next scan starts there.
    fn scan<F>(&self, hitlist: &mut [usize], mut probe: F) -> Option<T>
    where
        F: FnMut(&Q) -> Result<T, QueueError>,
    {
        for pos in 0..hitlist.len() {
            if let Ok(value) = probe(&self.shards[hitlist[pos]]) {
                if pos > 0 {
                    hitlist[..=pos].rotate_right(1);
                }
                return Some(value);
            }
        }
        None
    }

    #[cfg(test)]
    pub(crate) fn shard(&self, index: usize) -> &Q {
        &self.shards[index]
    }

    #[cfg(test)]
    pub(crate) fn hitlist_snapshot(&self) -> Vec<usize> {
        self.hitlist.with(|list| list.clone())
    }
}

impl<T, Q> MultiQueue<T, Q>
where
    Q: UnboundedQueue<T> + Default,
{
    /// Create a queue sharded over `subqueues` default-constructed inner
    /// queues.
    ///
    /// # Panics
    /// Panics if `subqueues` is zero.
    pub fn new(subqueues: usize) -> Self {
        Self::from_shards((0..subqueues).map(|_| Q::default()).collect())
    }
}

impl<T, Q> MultiQueue<T, Q>
where
    Q: BoundedBuild<T>,
{
    /// Create a queue sharded over `subqueues` bounded inner queues of
    /// `capacity` elements each.
    ///
    /// # Returns
    /// The queue, or whatever construction error the inner queue reports
    /// for `capacity`.
    ///
    /// # Panics
    /// Panics if `subqueues` is zero.
    pub fn with_capacity(capacity: usize, subqueues: usize) -> Result<Self, QueueError> {
        let shards = (0..subqueues)
            .map(|_| Q::with_capacity(capacity))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_shards(shards))
    }
}

impl<T: Send, Q: ConsumerQueue<T>> ConsumerQueue<T> for MultiQueue<T, Q> {
    fn mc_dequeue(&self) -> Result<T, QueueError> {
        let mut hitlist = self.checked_hitlist();
        let hit = self
            .scan(&mut hitlist, |shard| shard.mc_dequeue_uncontended())
            .or_else(|| self.scan(&mut hitlist, Q::mc_dequeue));
        self.hitlist.put(hitlist);
        hit.ok_or(QueueError::Empty)
    }

    fn mc_dequeue_uncontended(&self) -> Result<T, QueueError> {
        let mut hitlist = self.checked_hitlist();
        let hit = self.scan(&mut hitlist, |shard| shard.mc_dequeue_uncontended());
        self.hitlist.put(hitlist);
        hit.ok_or(QueueError::Empty)
    }

    unsafe fn sc_dequeue(&self) -> Result<T, QueueError> {
        let mut hitlist = self.checked_hitlist();
        // SAFETY: the caller's exclusivity covers every shard.
        let hit = self.scan(&mut hitlist, |shard| unsafe { shard.sc_dequeue() });
        self.hitlist.put(hitlist);
        hit.ok_or(QueueError::Empty)
    }
}

impl<T: Send, Q: UnboundedQueue<T>> UnboundedQueue<T> for MultiQueue<T, Q> {
    fn mp_enqueue(&self, value: T) {
        self.shards[self.assignment.get()].mp_enqueue(value);
    }

    unsafe fn sp_enqueue(&self, value: T) {
        // SAFETY: the caller's exclusivity covers the shard as well.
        unsafe { self.shards[self.assignment.get()].sp_enqueue(value) }
    }
}

impl<T: Send, Q: BoundedQueue<T>> BoundedQueue<T> for MultiQueue<T, Q> {
    fn mp_enqueue(&self, value: T) -> Result<(), (T, QueueError)> {
        self.shards[self.assignment.get()].mp_enqueue(value)
    }

    unsafe fn sp_enqueue(&self, value: T) -> Result<(), (T, QueueError)> {
        // SAFETY: the caller's exclusivity covers the shard as well.
        unsafe { self.shards[self.assignment.get()].sp_enqueue(value) }
    }
}
