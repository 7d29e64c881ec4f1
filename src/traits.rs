use crate::QueueError;

/// Consumer-side operations, identical for every capacity discipline.
///
/// Dequeue does not care whether enqueue can fail, so the consumer surface
/// is shared: [`BoundedQueue`] and [`UnboundedQueue`] both build on this
/// trait, and generic consumers (the sharded queue's hitlist walk, channel
/// receivers) bound on it alone.
///
/// `mc_dequeue` is always safe under any number of concurrent consumers.
/// `sc_dequeue` is a strictly faster specialization whose caller promises
/// exclusivity; it is `unsafe` because breaking the promise is a data
/// race, not merely a wrong answer.
pub trait ConsumerQueue<T>: Send + Sync {
    /// Pop a value, assuming any number of concurrent consumers.
    ///
    /// Waits out consumer-side contention (yield-spinning where the core
    /// needs to), so it never reports [`QueueError::Contended`].
    ///
    /// # Returns
    /// The popped value, or [`QueueError::Empty`].
    fn mc_dequeue(&self) -> Result<T, QueueError>;

    /// Pop a value without waiting for other consumers.
    ///
    /// Identical to [`mc_dequeue`](ConsumerQueue::mc_dequeue) except that
    /// it refuses to wait: if another consumer is mid-dequeue, it returns
    /// [`QueueError::Contended`] immediately. The sharded layer uses this
    /// as its first-pass probe so one busy shard cannot serialize every
    /// consumer.
    fn mc_dequeue_uncontended(&self) -> Result<T, QueueError>;

    /// Pop a value as the only consumer.
    ///
    /// # Safety
    /// No other thread may execute any dequeue on this queue for the
    /// duration of the call.
    unsafe fn sc_dequeue(&self) -> Result<T, QueueError>;
}

/// Producer-side operations of a bounded MPMC queue.
///
/// Bounded queues have a fixed capacity decided at construction, so every
/// enqueue can fail with [`QueueError::Full`]. The rejected value is handed
/// back to the caller, which decides the policy: retry, back off, drop, or
/// fall through to an unbounded queue.
///
/// `sp_enqueue` mirrors [`sc_dequeue`](ConsumerQueue::sc_dequeue): faster,
/// exclusive, and `unsafe` for the same reason.
pub trait BoundedQueue<T>: ConsumerQueue<T> {
    /// Push a value, assuming any number of concurrent producers.
    ///
    /// # Returns
    /// `Ok(())` on success, or the rejected value together with
    /// [`QueueError::Full`] when no slot is free.
    fn mp_enqueue(&self, value: T) -> Result<(), (T, QueueError)>;

    /// Push a value from the only producer.
    ///
    /// # Safety
    /// No other thread may execute any enqueue on this queue for the
    /// duration of the call.
    unsafe fn sp_enqueue(&self, value: T) -> Result<(), (T, QueueError)>;
}

/// Producer-side operations of an unbounded MPMC queue.
///
/// Unbounded queues allocate on demand, so enqueue always succeeds and
/// returns nothing.
pub trait UnboundedQueue<T>: ConsumerQueue<T> {
    /// Push a value, assuming any number of concurrent producers.
    fn mp_enqueue(&self, value: T);

    /// Push a value from the only producer.
    ///
    /// # Safety
    /// No other thread may execute any enqueue on this queue for the
    /// duration of the call.
    unsafe fn sp_enqueue(&self, value: T);
}

/// Construction of bounded queues from a capacity.
///
/// Implemented by every bounded queue whose only construction parameter is
/// its capacity, so compositions like
/// [`MultiQueue`](crate::multi::MultiQueue) can build their subqueues
/// generically.
pub trait BoundedBuild<T>: BoundedQueue<T> + Sized {
    /// Create a queue holding up to `capacity` elements.
    ///
    /// # Returns
    /// The queue, or [`QueueError::InvalidCapacity`] if the implementation
    /// rejects the requested capacity.
    fn with_capacity(capacity: usize) -> Result<Self, QueueError>;
}
