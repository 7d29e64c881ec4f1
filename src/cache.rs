use crate::{
    QueueError,
    list::ListQueue,
    ring::RingQueue,
    traits::{ConsumerQueue, UnboundedQueue},
};

/// A small ring in front of an unbounded list queue.
///
/// Enqueue tries the ring first and falls through to the list when the
/// ring is full; dequeue drains the ring first and falls back to the list.
/// For bursty workloads that usually fit the ring this keeps the hot path
/// on the cache-friendly core while never refusing an item.
///
/// **This queue does not preserve FIFO order.** An item that overflowed
/// into the list can be dequeued long after later items that landed in the
/// ring, and vice versa. Callers that need ordering must use one of the
/// ordered cores instead; this composition is strictly a best-effort
/// latency optimization.
///
/// # Examples
///
/// ```rust
/// use quiver::cache::CacheQueue;
/// use quiver::traits::{ConsumerQueue, UnboundedQueue};
///
/// # fn main() -> Result<(), quiver::QueueError> {
/// let queue = CacheQueue::with_capacity(4)?;
///
/// // More items than the ring holds; the rest overflow into the list.
/// for i in 0..10u32 {
///     queue.mp_enqueue(i);
/// }
///
/// let mut drained: Vec<u32> = (0..10).map(|_| queue.mc_dequeue().unwrap()).collect();
/// drained.sort_unstable();
/// assert_eq!(drained, (0..10).collect::<Vec<_>>());
/// # Ok(())
/// # }
/// ```
pub struct CacheQueue<T> {
    front: RingQueue<T>,
    overflow: ListQueue<T>,
}

impl<T> CacheQueue<T> {
    /// Create a cache queue whose ring stage holds `cache_capacity`
    /// elements.
    ///
    /// # Returns
    /// The queue, or [`QueueError::InvalidCapacity`] unless
    /// `cache_capacity` is a nonzero power of two.
    pub fn with_capacity(cache_capacity: usize) -> Result<Self, QueueError> {
        Ok(Self {
            front: RingQueue::with_capacity(cache_capacity)?,
            overflow: ListQueue::new(),
        })
    }
}

impl<T: Send> ConsumerQueue<T> for CacheQueue<T> {
    fn mc_dequeue(&self) -> Result<T, QueueError> {
        match self.front.mc_dequeue() {
            Ok(value) => Ok(value),
            Err(_) => self.overflow.mc_dequeue(),
        }
    }

    fn mc_dequeue_uncontended(&self) -> Result<T, QueueError> {
        let front_miss = match self.front.mc_dequeue_uncontended() {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        match self.overflow.mc_dequeue_uncontended() {
            Ok(value) => Ok(value),
            // A contended stage means the queue may well not be empty.
            Err(QueueError::Contended) => Err(QueueError::Contended),
            Err(_) if front_miss == QueueError::Contended => Err(QueueError::Contended),
            Err(e) => Err(e),
        }
    }

    unsafe fn sc_dequeue(&self) -> Result<T, QueueError> {
        // SAFETY: the caller's exclusivity covers both stages.
        unsafe {
            match self.front.sc_dequeue() {
                Ok(value) => Ok(value),
                Err(_) => self.overflow.sc_dequeue(),
            }
        }
    }
}

impl<T: Send> UnboundedQueue<T> for CacheQueue<T> {
    fn mp_enqueue(&self, value: T) {
        if let Err((value, _)) = self.front.mp_enqueue(value) {
            self.overflow.mp_enqueue(value);
        }
    }

    unsafe fn sp_enqueue(&self, value: T) {
        // SAFETY: the caller's exclusivity covers both stages.
        unsafe {
            if let Err((value, _)) = self.front.sp_enqueue(value) {
                self.overflow.sp_enqueue(value);
            }
        }
    }
}
