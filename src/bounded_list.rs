use crate::{
    QueueError,
    traits::{BoundedBuild, BoundedQueue, ConsumerQueue},
};
use crossbeam_utils::CachePadded;
use std::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
    thread,
};

/// One list node, identical in shape to the unbounded list queue's.
struct Node<T> {
    value: UnsafeCell<MaybeUninit<T>>,
    next: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
    fn empty() -> Self {
        Self {
            value: UnsafeCell::new(MaybeUninit::uninit()),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

/// Bounded MPMC queue over a fixed node pool.
///
/// The same linked-list machinery as [`ListQueue`](crate::list::ListQueue),
/// except that every node is allocated once at construction and there is no
/// allocator fallback: when the freelist runs dry, enqueue fails with
/// [`QueueError::Full`] and hands the value back. Dequeue retires nodes to
/// the freelist exactly as the unbounded queue does, so capacity is
/// restored as items drain.
///
/// Unlike [`RingQueue`](crate::ring::RingQueue), the capacity does not have
/// to be a power of two; any nonzero capacity is accepted. Two extra nodes
/// are allocated internally for the list sentinels so the advertised
/// capacity is all usable.
///
/// # Examples
///
/// ```rust
/// use quiver::bounded_list::BoundedListQueue;
/// use quiver::traits::BoundedQueue;
///
/// # fn main() -> Result<(), quiver::QueueError> {
/// let queue = BoundedListQueue::with_capacity(3)?;
///
/// for i in 0..3 {
///     assert!(queue.mp_enqueue(i).is_ok());
/// }
/// assert!(queue.mp_enqueue(3).is_err());
///
/// assert_eq!(queue.mc_dequeue()?, 0);
/// assert!(queue.mp_enqueue(3).is_ok());
/// # Ok(())
/// # }
/// ```
pub struct BoundedListQueue<T> {
    /// Producer end of the main list.
    head: CachePadded<AtomicPtr<Node<T>>>,
    /// Consumer end of the main list; null while a consumer holds the
    /// tail token.
    tail: CachePadded<AtomicPtr<Node<T>>>,
    /// Producer end of the freelist.
    free_head: CachePadded<AtomicPtr<Node<T>>>,
    /// Consumer end of the freelist; null while a producer holds its
    /// token.
    free_tail: CachePadded<AtomicPtr<Node<T>>>,
    /// The pool. Lists above only borrow node pointers from here.
    pool: Box<[Node<T>]>,
}

// SAFETY: as for `ListQueue`.
unsafe impl<T: Send> Send for BoundedListQueue<T> {}
unsafe impl<T: Send> Sync for BoundedListQueue<T> {}

impl<T> BoundedListQueue<T> {
    /// Create a queue holding up to `capacity` elements.
    ///
    /// # Returns
    /// The queue, or [`QueueError::InvalidCapacity`] when `capacity` is
    /// zero.
    pub fn with_capacity(capacity: usize) -> Result<Self, QueueError> {
        if capacity == 0 {
            return Err(QueueError::InvalidCapacity);
        }

        // capacity usable nodes plus the two list sentinels.
        let total = capacity + 2;
        let mut pool = Vec::with_capacity(total);
        pool.resize_with(total, Node::empty);
        let mut pool = pool.into_boxed_slice();

        let main_sentinel: *mut Node<T> = &mut pool[0];
        let free_sentinel: *mut Node<T> = &mut pool[1];
        for i in 2..total {
            let spare: *mut Node<T> = &mut pool[i];
            pool[i - 1].next.store(spare, Ordering::Relaxed);
        }
        let free_head: *mut Node<T> = &mut pool[total - 1];

        Ok(Self {
            head: CachePadded::new(AtomicPtr::new(main_sentinel)),
            tail: CachePadded::new(AtomicPtr::new(main_sentinel)),
            free_head: CachePadded::new(AtomicPtr::new(free_head)),
            free_tail: CachePadded::new(AtomicPtr::new(free_sentinel)),
            pool,
        })
    }

    /// Push a value, contending with other producers.
    pub fn mp_enqueue(&self, value: T) -> Result<(), (T, QueueError)> {
        let node = self.freelist_pop();
        if node.is_null() {
            return Err((value, QueueError::Full));
        }
        // SAFETY: the node came off the freelist, so it is exclusively
        // ours until published.
        unsafe {
            (*(*node).value.get()).write(value);
            (*node).next.store(ptr::null_mut(), Ordering::Relaxed);
        }
        let prev = self.head.swap(node, Ordering::AcqRel);
        // SAFETY: `prev` stays reachable from the tail until consumed.
        unsafe { (*prev).next.store(node, Ordering::Release) };
        Ok(())
    }

    /// Push a value from the only producer.
    ///
    /// # Safety
    /// No other thread may execute any enqueue on this queue for the
    /// duration of the call.
    pub unsafe fn sp_enqueue(&self, value: T) -> Result<(), (T, QueueError)> {
        let node = self.freelist_pop();
        if node.is_null() {
            return Err((value, QueueError::Full));
        }
        // SAFETY: as in `mp_enqueue`.
        unsafe {
            (*(*node).value.get()).write(value);
            (*node).next.store(ptr::null_mut(), Ordering::Relaxed);
        }
        let head = self.head.load(Ordering::Relaxed);
        // SAFETY: exclusive producer, so `head` cannot move under us.
        unsafe { (*head).next.store(node, Ordering::Release) };
        self.head.store(node, Ordering::Relaxed);
        Ok(())
    }

    /// Pop a value, yield-spinning while another consumer holds the tail
    /// token.
    pub fn mc_dequeue(&self) -> Result<T, QueueError> {
        let mut tail = self.tail.swap(ptr::null_mut(), Ordering::AcqRel);
        while tail.is_null() {
            thread::yield_now();
            tail = self.tail.swap(ptr::null_mut(), Ordering::AcqRel);
        }
        self.dequeue_with_token(tail)
    }

    /// Pop a value, or report [`QueueError::Contended`] if another consumer
    /// holds the tail token.
    pub fn mc_dequeue_uncontended(&self) -> Result<T, QueueError> {
        let tail = self.tail.swap(ptr::null_mut(), Ordering::AcqRel);
        if tail.is_null() {
            return Err(QueueError::Contended);
        }
        self.dequeue_with_token(tail)
    }

    /// Pop a value as the only consumer.
    ///
    /// # Safety
    /// No other thread may execute any dequeue on this queue for the
    /// duration of the call.
    pub unsafe fn sc_dequeue(&self) -> Result<T, QueueError> {
        let tail = self.tail.load(Ordering::Relaxed);
        self.dequeue_with_token(tail)
    }

    fn dequeue_with_token(&self, tail: *mut Node<T>) -> Result<T, QueueError> {
        // SAFETY: token ownership makes `tail` exclusively ours.
        let next = unsafe { (*tail).next.load(Ordering::Acquire) };
        if next.is_null() {
            self.tail.store(tail, Ordering::Release);
            return Err(QueueError::Empty);
        }
        // SAFETY: `next` was published with an initialized value; the
        // token guarantees only we read it.
        let value = unsafe { (*(*next).value.get()).assume_init_read() };
        self.tail.store(next, Ordering::Release);
        self.retire(tail);
        Ok(value)
    }

    /// Return a spent node to the freelist, restoring one unit of
    /// capacity.
    fn retire(&self, node: *mut Node<T>) {
        // SAFETY: the caller owned `node` exclusively.
        unsafe { (*node).next.store(ptr::null_mut(), Ordering::Relaxed) };
        let prev = self.free_head.swap(node, Ordering::AcqRel);
        // SAFETY: as in `mp_enqueue`.
        unsafe { (*prev).next.store(node, Ordering::Release) };
    }

    /// Take a node from the freelist, yield-spinning while another
    /// producer holds the freelist token. Returns null when the pool is
    /// exhausted.
    fn freelist_pop(&self) -> *mut Node<T> {
        let mut tail = self.free_tail.swap(ptr::null_mut(), Ordering::AcqRel);
        while tail.is_null() {
            thread::yield_now();
            tail = self.free_tail.swap(ptr::null_mut(), Ordering::AcqRel);
        }
        // SAFETY: token ownership.
        let next = unsafe { (*tail).next.load(Ordering::Acquire) };
        if next.is_null() {
            self.free_tail.store(tail, Ordering::Release);
            return ptr::null_mut();
        }
        self.free_tail.store(next, Ordering::Release);
        tail
    }
}

impl<T> Drop for BoundedListQueue<T> {
    fn drop(&mut self) {
        // Drop the values still in flight; the pool itself is freed by the
        // boxed slice.
        let mut node = *self.tail.get_mut();
        while !node.is_null() {
            // SAFETY: nodes live in `self.pool`, which outlives this loop.
            let next = unsafe { *(*node).next.get_mut() };
            if next.is_null() {
                break;
            }
            // SAFETY: every node behind the sentinel holds a live value.
            unsafe { (*(*next).value.get()).assume_init_drop() };
            node = next;
        }
    }
}

impl<T: Send> ConsumerQueue<T> for BoundedListQueue<T> {
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

impl<T: Send> BoundedQueue<T> for BoundedListQueue<T> {
    fn mp_enqueue(&self, value: T) -> Result<(), (T, QueueError)> {
        Self::mp_enqueue(self, value)
    }

    unsafe fn sp_enqueue(&self, value: T) -> Result<(), (T, QueueError)> {
        // SAFETY: forwarded contract.
        unsafe { Self::sp_enqueue(self, value) }
    }
}

impl<T: Send> BoundedBuild<T> for BoundedListQueue<T> {
    fn with_capacity(capacity: usize) -> Result<Self, QueueError> {
        Self::with_capacity(capacity)
    }
}
