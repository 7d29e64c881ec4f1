use crate::{
    QueueError,
    traits::{BoundedQueue, ConsumerQueue, UnboundedQueue},
};
use std::{fmt, marker::PhantomData, sync::Arc};

/// Shared-producer handle; clone one per producer thread.
///
/// The handle only ever uses the `mp` role, so any number of clones may
/// send concurrently. Pair it with [`Receiver`] or [`SoleReceiver`] through
/// the [`mpmc`]/[`mpsc`] constructors.
///
/// # Examples
///
/// ```rust
/// use quiver::channel::mpmc;
/// use quiver::list::ListQueue;
/// use std::thread;
///
/// let (sender, receiver) = mpmc(ListQueue::new());
///
/// let handles: Vec<_> = (0..4)
///     .map(|pid| {
///         let sender = sender.clone();
///         thread::spawn(move || {
///             for i in 0..100u64 {
///                 sender.send(pid * 1_000 + i);
///             }
///         })
///     })
///     .collect();
/// for handle in handles {
///     handle.join().unwrap();
/// }
///
/// let mut received = 0;
/// while receiver.try_recv().is_ok() {
///     received += 1;
/// }
/// assert_eq!(received, 400);
/// ```
pub struct Sender<T, Q> {
    queue: Arc<Q>,
    _marker: PhantomData<fn(T)>,
}

impl<T, Q> Clone for Sender<T, Q> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            _marker: PhantomData,
        }
    }
}

impl<T, Q> fmt::Debug for Sender<T, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender").finish_non_exhaustive()
    }
}

impl<T, Q> Sender<T, Q>
where
    Q: UnboundedQueue<T>,
{
    /// Send a value; unbounded queues always accept.
    pub fn send(&self, value: T) {
        self.queue.mp_enqueue(value);
    }
}

impl<T, Q> Sender<T, Q>
where
    Q: BoundedQueue<T>,
{
    /// Try to send a value; hands it back with [`QueueError::Full`] when
    /// the queue has no room.
    pub fn try_send(&self, value: T) -> Result<(), (T, QueueError)> {
        self.queue.mp_enqueue(value)
    }
}

/// Exclusive-producer handle: the safe face of the `sp` role.
///
/// A `SoleSender` is the only producer handle its constructor emits, it
/// cannot be cloned, and sending takes `&mut self`. Together that
/// re-establishes the single-producer contract in the type system, so the
/// handle can drive the queue's `sp` fast path without any `unsafe` at the
/// call site.
pub struct SoleSender<T, Q> {
    queue: Arc<Q>,
    _marker: PhantomData<fn(T)>,
}

impl<T, Q> fmt::Debug for SoleSender<T, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoleSender").finish_non_exhaustive()
    }
}

impl<T, Q> SoleSender<T, Q>
where
    Q: UnboundedQueue<T>,
{
    /// Send a value over the single-producer fast path.
    pub fn send(&mut self, value: T) {
        // SAFETY: this handle is the only producer-capable reference to
        // the queue (the constructors hand out exactly one, it is not
        // Clone, and `&mut self` excludes concurrent use).
        unsafe { self.queue.sp_enqueue(value) }
    }
}

impl<T, Q> SoleSender<T, Q>
where
    Q: BoundedQueue<T>,
{
    /// Try to send a value over the single-producer fast path.
    pub fn try_send(&mut self, value: T) -> Result<(), (T, QueueError)> {
        // SAFETY: as for the unbounded `send`.
        unsafe { self.queue.sp_enqueue(value) }
    }
}

/// Shared-consumer handle; clone one per consumer thread.
///
/// Uses the `mc` role, so any number of clones may receive concurrently.
/// [`try_recv`](Self::try_recv) waits out other consumers (yield-spinning
/// where the core does) and fails only with [`QueueError::Empty`];
/// [`try_recv_uncontended`](Self::try_recv_uncontended) additionally backs
/// off with [`QueueError::Contended`] rather than waiting.
pub struct Receiver<T, Q> {
    queue: Arc<Q>,
    _marker: PhantomData<fn(T)>,
}

impl<T, Q> Clone for Receiver<T, Q> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            _marker: PhantomData,
        }
    }
}

impl<T, Q> fmt::Debug for Receiver<T, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver").finish_non_exhaustive()
    }
}

impl<T, Q> Receiver<T, Q>
where
    Q: ConsumerQueue<T>,
{
    /// Receive a value, or [`QueueError::Empty`] when none is ready.
    pub fn try_recv(&self) -> Result<T, QueueError> {
        self.queue.mc_dequeue()
    }

    /// Receive a value without waiting for other consumers.
    pub fn try_recv_uncontended(&self) -> Result<T, QueueError> {
        self.queue.mc_dequeue_uncontended()
    }
}

/// Exclusive-consumer handle: the safe face of the `sc` role.
///
/// Mirrors [`SoleSender`]: exactly one exists per queue, it cannot be
/// cloned, and receiving takes `&mut self`, which is what lets it use the
/// `sc` fast path safely.
pub struct SoleReceiver<T, Q> {
    queue: Arc<Q>,
    _marker: PhantomData<fn(T)>,
}

impl<T, Q> fmt::Debug for SoleReceiver<T, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoleReceiver").finish_non_exhaustive()
    }
}

impl<T, Q> SoleReceiver<T, Q>
where
    Q: ConsumerQueue<T>,
{
    /// Receive a value over the single-consumer fast path.
    pub fn try_recv(&mut self) -> Result<T, QueueError> {
        // SAFETY: this handle is the only consumer-capable reference to
        // the queue (the constructors hand out exactly one, it is not
        // Clone, and `&mut self` excludes concurrent use).
        unsafe { self.queue.sc_dequeue() }
    }
}

fn split<Q>(queue: Q) -> (Arc<Q>, Arc<Q>) {
    let queue = Arc::new(queue);
    (Arc::clone(&queue), queue)
}

/// Wrap a queue into a multi-producer, multi-consumer handle pair.
///
/// Both handles are cloneable; every operation uses the `mp`/`mc` roles.
///
/// # Examples
///
/// ```rust
/// use quiver::channel::mpmc;
/// use quiver::ring::RingQueue;
///
/// # fn main() -> Result<(), quiver::QueueError> {
/// let (sender, receiver) = mpmc(RingQueue::with_capacity(8)?);
/// sender.try_send(1).ok();
/// assert_eq!(receiver.try_recv()?, 1);
/// # Ok(())
/// # }
/// ```
pub fn mpmc<T, Q>(queue: Q) -> (Sender<T, Q>, Receiver<T, Q>) {
    let (a, b) = split(queue);
    (
        Sender {
            queue: a,
            _marker: PhantomData,
        },
        Receiver {
            queue: b,
            _marker: PhantomData,
        },
    )
}

/// Wrap a queue into a single-producer, multi-consumer handle pair.
///
/// The sender is exclusive and rides the `sp` fast path; receivers clone
/// freely.
pub fn spmc<T, Q>(queue: Q) -> (SoleSender<T, Q>, Receiver<T, Q>) {
    let (a, b) = split(queue);
    (
        SoleSender {
            queue: a,
            _marker: PhantomData,
        },
        Receiver {
            queue: b,
            _marker: PhantomData,
        },
    )
}

/// Wrap a queue into a multi-producer, single-consumer handle pair.
///
/// Senders clone freely; the receiver is exclusive and rides the `sc`
/// fast path.
///
/// # Examples
///
/// ```rust
/// use quiver::channel::mpsc;
/// use quiver::list::ListQueue;
/// use std::thread;
///
/// let (sender, mut receiver) = mpsc(ListQueue::new());
///
/// let producer = {
///     let sender = sender.clone();
///     thread::spawn(move || {
///         for i in 0..100u32 {
///             sender.send(i);
///         }
///     })
/// };
/// producer.join().unwrap();
///
/// for i in 0..100 {
///     assert_eq!(receiver.try_recv(), Ok(i));
/// }
/// ```
pub fn mpsc<T, Q>(queue: Q) -> (Sender<T, Q>, SoleReceiver<T, Q>) {
    let (a, b) = split(queue);
    (
        Sender {
            queue: a,
            _marker: PhantomData,
        },
        SoleReceiver {
            queue: b,
            _marker: PhantomData,
        },
    )
}

/// Wrap a queue into a single-producer, single-consumer handle pair.
///
/// Both handles are exclusive, so every operation takes the role fast
/// paths with no `unsafe` at the call site.
///
/// # Examples
///
/// ```rust
/// use quiver::channel::spsc;
/// use quiver::ring::RingQueue;
///
/// # fn main() -> Result<(), quiver::QueueError> {
/// let (mut sender, mut receiver) = spsc(RingQueue::with_capacity(4)?);
///
/// sender.try_send("ping").ok();
/// assert_eq!(receiver.try_recv()?, "ping");
/// # Ok(())
/// # }
/// ```
pub fn spsc<T, Q>(queue: Q) -> (SoleSender<T, Q>, SoleReceiver<T, Q>) {
    let (a, b) = split(queue);
    (
        SoleSender {
            queue: a,
            _marker: PhantomData,
        },
        SoleReceiver {
            queue: b,
            _marker: PhantomData,
        },
    )
}
