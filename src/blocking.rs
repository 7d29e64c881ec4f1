use crate::{
    QueueError,
    traits::{BoundedQueue, UnboundedQueue},
};
use parking_lot::{Condvar, Mutex};
use std::marker::PhantomData;

/// Blocking wrapper over a bounded nonblocking queue.
///
/// Adds two condition variables to the inner queue: `not_empty`, signalled
/// after every successful enqueue, and `not_full`, signalled after every
/// successful dequeue. [`enqueue`](Self::enqueue) parks the calling thread
/// until a slot frees up instead of reporting [`QueueError::Full`];
/// [`dequeue`](Self::dequeue) parks until an item arrives instead of
/// reporting [`QueueError::Empty`].
///
/// The wrapper adds no ordering of its own -- the inner queue decides --
/// and provides no timeouts or cancellation; a parked caller returns only
/// when a peer operation wakes it. Waking is reliable: the signalling side
/// passes through the waiter's mutex before notifying, so a wakeup cannot
/// fall between a waiter's last failed attempt and its park.
///
/// All operations use the `mp`/`mc` roles of the inner queue.
///
/// # Examples
///
/// ```rust
/// use quiver::blocking::BlockingBoundedQueue;
/// use quiver::ring::RingQueue;
///
/// # fn main() -> Result<(), quiver::QueueError> {
/// let queue = BlockingBoundedQueue::new(RingQueue::with_capacity(8)?);
///
/// queue.enqueue(5);
/// assert_eq!(queue.dequeue(), 5);
/// assert!(queue.try_dequeue().is_err());
/// # Ok(())
/// # }
/// ```
pub struct BlockingBoundedQueue<T, Q> {
    inner: Q,
    producer_lock: Mutex<()>,
    not_full: Condvar,
    consumer_lock: Mutex<()>,
    not_empty: Condvar,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T, Q> BlockingBoundedQueue<T, Q>
where
    Q: BoundedQueue<T>,
{
    /// Wrap a bounded nonblocking queue.
    pub fn new(inner: Q) -> Self {
        Self {
            inner,
            producer_lock: Mutex::new(()),
            not_full: Condvar::new(),
            consumer_lock: Mutex::new(()),
            not_empty: Condvar::new(),
            _marker: PhantomData,
        }
    }

    /// Push a value, parking until a slot is free.
    pub fn enqueue(&self, value: T) {
        let mut value = match self.inner.mp_enqueue(value) {
            Ok(()) => {
                self.signal_not_empty();
                return;
            }
            Err((value, _)) => value,
        };

        let mut guard = self.producer_lock.lock();
        loop {
            match self.inner.mp_enqueue(value) {
                Ok(()) => break,
                Err((rejected, _)) => {
                    value = rejected;
                    self.not_full.wait(&mut guard);
                }
            }
        }
        drop(guard);
        self.signal_not_empty();
    }

    /// Push a value without parking; the inner queue's contract, plus the
    /// `not_empty` signal on success.
    pub fn try_enqueue(&self, value: T) -> Result<(), (T, QueueError)> {
        self.inner.mp_enqueue(value).map(|()| self.signal_not_empty())
    }

    /// Pop a value, parking until one arrives.
    pub fn dequeue(&self) -> T {
        if let Ok(value) = self.inner.mc_dequeue() {
            self.signal_not_full();
            return value;
        }

        let mut guard = self.consumer_lock.lock();
        let value = loop {
            match self.inner.mc_dequeue() {
                Ok(value) => break value,
                Err(_) => self.not_empty.wait(&mut guard),
            }
        };
        drop(guard);
        self.signal_not_full();
        value
    }

    /// Pop a value without parking; the inner queue's contract, plus the
    /// `not_full` signal on success.
    pub fn try_dequeue(&self) -> Result<T, QueueError> {
        let value = self.inner.mc_dequeue()?;
        self.signal_not_full();
        Ok(value)
    }

    /// Passing through the consumer mutex orders this signal after any
    /// consumer's failed attempt, so the notify cannot be lost.
    fn signal_not_empty(&self) {
        drop(self.consumer_lock.lock());
        self.not_empty.notify_one();
    }

    fn signal_not_full(&self) {
        drop(self.producer_lock.lock());
        self.not_full.notify_one();
    }
}

/// Blocking wrapper over an unbounded nonblocking queue.
///
/// Enqueue on an unbounded queue cannot fail, so only the consumer side
/// parks: [`dequeue`](Self::dequeue) waits on `not_empty` instead of
/// reporting [`QueueError::Empty`]. See [`BlockingBoundedQueue`] for the
/// signalling discipline.
///
/// # Examples
///
/// ```rust
/// use quiver::blocking::BlockingUnboundedQueue;
/// use quiver::list::ListQueue;
///
/// let queue = BlockingUnboundedQueue::new(ListQueue::new());
///
/// queue.enqueue("job");
/// assert_eq!(queue.dequeue(), "job");
/// ```
pub struct BlockingUnboundedQueue<T, Q> {
    inner: Q,
    consumer_lock: Mutex<()>,
    not_empty: Condvar,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T, Q> BlockingUnboundedQueue<T, Q>
where
    Q: UnboundedQueue<T>,
{
    /// Wrap an unbounded nonblocking queue.
    pub fn new(inner: Q) -> Self {
        Self {
            inner,
            consumer_lock: Mutex::new(()),
            not_empty: Condvar::new(),
            _marker: PhantomData,
        }
    }

    /// Push a value; never parks.
    pub fn enqueue(&self, value: T) {
        self.inner.mp_enqueue(value);
        self.signal_not_empty();
    }

    /// Pop a value, parking until one arrives.
    pub fn dequeue(&self) -> T {
        if let Ok(value) = self.inner.mc_dequeue() {
            return value;
        }

        let mut guard = self.consumer_lock.lock();
        let value = loop {
            match self.inner.mc_dequeue() {
                Ok(value) => break value,
                Err(_) => self.not_empty.wait(&mut guard),
            }
        };
        drop(guard);
        value
    }

    /// Pop a value without parking; the inner queue's contract unchanged.
    pub fn try_dequeue(&self) -> Result<T, QueueError> {
        self.inner.mc_dequeue()
    }

    fn signal_not_empty(&self) {
        drop(self.consumer_lock.lock());
        self.not_empty.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::list::ListQueue;
    use crate::ring::RingQueue;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn consumer_parks_and_wakes() {
        let queue = Arc::new(BlockingUnboundedQueue::new(ListQueue::new()));
        let got_first = Arc::new(AtomicBool::new(false));

        let consumer = {
            let queue = Arc::clone(&queue);
            let got_first = Arc::clone(&got_first);
            thread::spawn(move || {
                let first = queue.dequeue();
                got_first.store(true, Ordering::SeqCst);
                let second = queue.dequeue();
                (first, second)
            })
        };

        // The consumer has nothing to take yet, so it must still be parked.
        thread::sleep(Duration::from_millis(50));
        assert!(!got_first.load(Ordering::SeqCst));

        queue.enqueue(1);
        while !got_first.load(Ordering::SeqCst) {
            thread::yield_now();
        }

        // It parks again for the second item.
        thread::sleep(Duration::from_millis(20));
        queue.enqueue(2);

        assert_eq!(consumer.join().unwrap(), (1, 2));
    }

    #[test]
    fn producer_parks_on_full_and_wakes() {
        let queue = Arc::new(BlockingBoundedQueue::new(
            RingQueue::with_capacity(2).unwrap(),
        ));
        queue.try_enqueue(1).unwrap();
        queue.try_enqueue(2).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = Arc::clone(&queue);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                queue.enqueue(3);
                done.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst), "enqueue should be parked");

        assert_eq!(queue.dequeue(), 1);
        producer.join().unwrap();

        assert_eq!(queue.dequeue(), 2);
        assert_eq!(queue.dequeue(), 3);
        assert!(queue.try_dequeue().is_err());
    }

    #[test]
    fn try_variants_follow_inner_contract() {
        let queue = BlockingBoundedQueue::new(RingQueue::with_capacity(2).unwrap());

        assert_eq!(queue.try_dequeue(), Err(QueueError::Empty));
        queue.try_enqueue(1).unwrap();
        queue.try_enqueue(2).unwrap();
        assert_eq!(queue.try_enqueue(3), Err((3, QueueError::Full)));
        assert_eq!(queue.try_dequeue(), Ok(1));
        assert_eq!(queue.try_dequeue(), Ok(2));
    }

    #[test]
    fn try_enqueue_wakes_parked_consumer() {
        let queue = Arc::new(BlockingBoundedQueue::new(
            RingQueue::with_capacity(4).unwrap(),
        ));

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue())
        };

        thread::sleep(Duration::from_millis(30));
        queue.try_enqueue(11).unwrap();
        assert_eq!(consumer.join().unwrap(), 11);
    }

    #[test]
    fn many_blocking_consumers_drain_everything() {
        let queue = Arc::new(BlockingUnboundedQueue::new(ListQueue::new()));
        let consumers = 4usize;
        let items = 1_000usize;

        let handles: Vec<_> = (0..consumers)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut sum = 0u64;
                    for _ in 0..items {
                        sum += queue.dequeue();
                    }
                    sum
                })
            })
            .collect();

        for i in 0..(consumers * items) {
            queue.enqueue(i as u64);
        }

        let total: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        let expected: u64 = (0..(consumers * items) as u64).sum();
        assert_eq!(total, expected);
    }
}
