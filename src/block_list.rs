use crate::{
    QueueError,
    traits::{ConsumerQueue, UnboundedQueue},
};
use crossbeam_utils::CachePadded;
use std::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
    thread,
};

/// Items carried by one node.
const NODE_CAPACITY: usize = 1024;
/// Nodes handed out per storage allocation.
const NODES_PER_BLOCK: usize = 8;

/// A blocked node: up to [`NODE_CAPACITY`] items plus the read/write
/// indices that track how much of it has been filled and drained.
///
/// The indices are plain cells because a node is only ever mutated by the
/// one thread that exclusively holds it: the producer filling it before
/// publication, or the consumer holding the tail token. FIFO order inside
/// the node is what keeps per-producer order intact across a node
/// boundary.
struct Node<T> {
    items: [UnsafeCell<MaybeUninit<T>>; NODE_CAPACITY],
    next: AtomicPtr<Node<T>>,
    read: UnsafeCell<usize>,
    write: UnsafeCell<usize>,
}

impl<T> Node<T> {
    fn empty() -> Self {
        Self {
            // SAFETY: an array of `UnsafeCell<MaybeUninit<T>>` is valid in
            // any byte state.
            items: unsafe { MaybeUninit::uninit().assume_init() },
            next: AtomicPtr::new(ptr::null_mut()),
            read: UnsafeCell::new(0),
            write: UnsafeCell::new(0),
        }
    }
}

/// One allocation of nodes, owned by the queue's storage stack.
struct Block<T> {
    nodes: Box<[Node<T>]>,
    next: *mut Block<T>,
}

/// Unbounded MPMC queue with blocked nodes.
///
/// Same skeleton as [`ListQueue`](crate::list::ListQueue) -- main list,
/// freelist, tail token, storage stack -- but each node carries up to 1024
/// items, so the list manipulation cost is amortized over many operations.
///
/// A node fills up before it is published to the main list. Partially
/// filled nodes wait in a *staging slot* where the next enqueue (from any
/// producer) picks them back up; when a producer finds the slot already
/// occupied it publishes the displaced partial node to the main list
/// rather than queueing behind it. Consumers that find the main list empty
/// promote the staged node onto the main list and retry, so buffered items
/// become visible without out-of-band reads.
///
/// Items only ever leave the main list, in node-publication order and FIFO
/// within each node. A single producer therefore observes strict FIFO for
/// its own items. With concurrent producers there remains one narrow
/// window -- a consumer stalling between detaching a staged node and
/// appending it while that node's producer starts a fresh one -- in which
/// two of a producer's nodes can enter the main list out of order. Callers
/// that need strict per-producer order under heavy multi-producer load
/// should prefer [`ListQueue`](crate::list::ListQueue).
///
/// # Examples
///
/// ```rust
/// use quiver::block_list::BlockQueue;
/// use quiver::traits::UnboundedQueue;
///
/// let queue = BlockQueue::new();
/// queue.mp_enqueue(1);
/// queue.mp_enqueue(2);
/// assert_eq!(queue.mc_dequeue(), Ok(1));
/// assert_eq!(queue.mc_dequeue(), Ok(2));
/// assert!(queue.mc_dequeue().is_err());
/// ```
pub struct BlockQueue<T> {
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
    /// Staging slot for the partially filled node, if any.
    spare: CachePadded<AtomicPtr<Node<T>>>,
    /// Stack of every block ever allocated.
    storage: AtomicPtr<Block<T>>,
}

// SAFETY: as for `ListQueue` -- node handoffs are release/acquire edges and
// item slots are touched only under exclusive node ownership.
unsafe impl<T: Send> Send for BlockQueue<T> {}
unsafe impl<T: Send> Sync for BlockQueue<T> {}

impl<T> Default for BlockQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        let mut nodes = Vec::with_capacity(NODES_PER_BLOCK);
        nodes.resize_with(NODES_PER_BLOCK, Node::empty);
        let mut nodes = nodes.into_boxed_slice();

        let main_sentinel: *mut Node<T> = &mut nodes[0];
        let free_sentinel: *mut Node<T> = &mut nodes[1];
        for i in 2..NODES_PER_BLOCK {
            let spare_node: *mut Node<T> = &mut nodes[i];
            nodes[i - 1].next.store(spare_node, Ordering::Relaxed);
        }
        let free_head: *mut Node<T> = &mut nodes[NODES_PER_BLOCK - 1];

        let block = Box::into_raw(Box::new(Block {
            nodes,
            next: ptr::null_mut(),
        }));

        Self {
            head: CachePadded::new(AtomicPtr::new(main_sentinel)),
            tail: CachePadded::new(AtomicPtr::new(main_sentinel)),
            free_head: CachePadded::new(AtomicPtr::new(free_head)),
            free_tail: CachePadded::new(AtomicPtr::new(free_sentinel)),
            spare: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            storage: AtomicPtr::new(block),
        }
    }

    /// Push a value, contending with other producers.
    pub fn mp_enqueue(&self, value: T) {
        if let Some(full) = self.stage(value) {
            self.publish(full);
        }
    }

    /// Push a value from the only producer.
    ///
    /// Publication still goes through the atomic head exchange: consumers
    /// promoting a staged node append to the main list too, so even an
    /// exclusive producer shares the head with them. The savings of this
    /// role live in the staging slot, which an exclusive producer wins
    /// without interference.
    ///
    /// # Safety
    /// No other thread may execute any enqueue on this queue for the
    /// duration of the call.
    pub unsafe fn sp_enqueue(&self, value: T) {
        if let Some(full) = self.stage(value) {
            self.publish(full);
        }
    }

    /// Pop a value, yield-spinning while another consumer holds the tail
    /// token.
    pub fn mc_dequeue(&self) -> Result<T, QueueError> {
        loop {
            let mut tail = self.tail.swap(ptr::null_mut(), Ordering::AcqRel);
            while tail.is_null() {
                thread::yield_now();
                tail = self.tail.swap(ptr::null_mut(), Ordering::AcqRel);
            }
            if let Some(result) = self.dequeue_with_token(tail) {
                return result;
            }
            // A staged node was promoted; go around and drain it.
        }
    }

    /// Pop a value, or report [`QueueError::Contended`] if another consumer
    /// holds the tail token.
    pub fn mc_dequeue_uncontended(&self) -> Result<T, QueueError> {
        loop {
            let tail = self.tail.swap(ptr::null_mut(), Ordering::AcqRel);
            if tail.is_null() {
                return Err(QueueError::Contended);
            }
            if let Some(result) = self.dequeue_with_token(tail) {
                return result;
            }
        }
    }

    /// Pop a value as the only consumer.
    ///
    /// # Safety
    /// No other thread may execute any dequeue on this queue for the
    /// duration of the call.
    pub unsafe fn sc_dequeue(&self) -> Result<T, QueueError> {
        loop {
            let tail = self.tail.load(Ordering::Relaxed);
            if let Some(result) = self.dequeue_with_token(tail) {
                return result;
            }
        }
    }

    /// Drain one item starting from the node at the consumer end. The
    /// caller owns `node` via the tail token (or the single-consumer
    /// contract). Returns `None` after promoting a staged node, meaning
    /// the caller should retry.
    fn dequeue_with_token(&self, mut node: *mut Node<T>) -> Option<Result<T, QueueError>> {
        loop {
            // SAFETY: token ownership makes `node` exclusively ours; its
            // write index was published before the node became reachable.
            let (read, write) = unsafe { (*(*node).read.get(), *(*node).write.get()) };
            if read < write {
                // SAFETY: slot `read` was initialized by the producer and
                // not yet drained.
                let value = unsafe { (*(*node).items[read].get()).assume_init_read() };
                unsafe { *(*node).read.get() = read + 1 };
                if read + 1 == write {
                    // Fully drained; advance eagerly if a successor is
                    // already linked so the next dequeue starts fresh.
                    let next = unsafe { (*node).next.load(Ordering::Acquire) };
                    if !next.is_null() {
                        self.tail.store(next, Ordering::Release);
                        self.retire(node);
                        return Some(Ok(value));
                    }
                }
                self.tail.store(node, Ordering::Release);
                return Some(Ok(value));
            }

            // Node is drained; step to the successor or give the token
            // back and look at the staging slot.
            let next = unsafe { (*node).next.load(Ordering::Acquire) };
            if next.is_null() {
                self.tail.store(node, Ordering::Release);
                let staged = self.spare.swap(ptr::null_mut(), Ordering::AcqRel);
                if staged.is_null() {
                    return Some(Err(QueueError::Empty));
                }
                // Make the buffered items visible through the main list,
                // then retry from the top.
                // SAFETY: the swap took exclusive ownership of `staged`.
                unsafe { (*staged).next.store(ptr::null_mut(), Ordering::Relaxed) };
                self.publish(staged);
                return None;
            }
            self.retire(node);
            node = next;
        }
    }

    /// Store `value` into a node. Returns the node if it is now full and
    /// must be published by the caller; otherwise the partial node went
    /// back to the staging slot.
    fn stage(&self, value: T) -> Option<*mut Node<T>> {
        let mut node = self.spare.swap(ptr::null_mut(), Ordering::AcqRel);
        if node.is_null() {
            node = self.freelist_pop();
        }
        if node.is_null() {
            node = self.allocate();
        }

        // SAFETY: the node came out of the staging slot, the freelist, or
        // a fresh block; in every case we hold it exclusively.
        let write = unsafe { *(*node).write.get() };
        unsafe {
            (*(*node).items[write].get()).write(value);
            *(*node).write.get() = write + 1;
        }

        if write + 1 == NODE_CAPACITY {
            // SAFETY: still exclusively ours until published.
            unsafe { (*node).next.store(ptr::null_mut(), Ordering::Relaxed) };
            return Some(node);
        }

        let displaced = self.spare.swap(node, Ordering::AcqRel);
        if !displaced.is_null() {
            // Another producer staged a partial node while we held ours.
            // Publish theirs so the slot keeps at most one node and no
            // partial node waits behind another.
            // SAFETY: the swap took exclusive ownership of `displaced`.
            unsafe { (*displaced).next.store(ptr::null_mut(), Ordering::Relaxed) };
            self.publish(displaced);
        }
        None
    }

    /// Append a node to the main list, multi-producer path.
    fn publish(&self, node: *mut Node<T>) {
        let prev = self.head.swap(node, Ordering::AcqRel);
        // SAFETY: `prev` stays reachable from the tail until consumed.
        unsafe { (*prev).next.store(node, Ordering::Release) };
    }

    /// Reset a drained node and return it to the freelist.
    fn retire(&self, node: *mut Node<T>) {
        // SAFETY: the caller owned `node` exclusively.
        unsafe {
            *(*node).read.get() = 0;
            *(*node).write.get() = 0;
            (*node).next.store(ptr::null_mut(), Ordering::Relaxed);
        }
        let prev = self.free_head.swap(node, Ordering::AcqRel);
        // SAFETY: as in `publish`.
        unsafe { (*prev).next.store(node, Ordering::Release) };
    }

    /// Take a node from the freelist, yield-spinning while another
    /// producer holds the freelist token. Returns null when the freelist
    /// is empty.
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

    /// Allocate a fresh block, keep one node for the caller, and splice
    /// the rest into the freelist.
    fn allocate(&self) -> *mut Node<T> {
        let mut nodes = Vec::with_capacity(NODES_PER_BLOCK);
        nodes.resize_with(NODES_PER_BLOCK, Node::empty);
        let mut nodes = nodes.into_boxed_slice();

        let claimed: *mut Node<T> = &mut nodes[0];
        for i in 2..NODES_PER_BLOCK {
            let prev_in_chain: *mut Node<T> = &mut nodes[i - 1];
            nodes[i].next.store(prev_in_chain, Ordering::Relaxed);
        }
        let chain_head: *mut Node<T> = &mut nodes[1];
        let chain_tail: *mut Node<T> = &mut nodes[NODES_PER_BLOCK - 1];

        let prev = self.free_head.swap(chain_head, Ordering::AcqRel);
        // SAFETY: as in `retire`.
        unsafe { (*prev).next.store(chain_tail, Ordering::Release) };

        let block = Box::into_raw(Box::new(Block {
            nodes,
            next: ptr::null_mut(),
        }));
        let mut top = self.storage.load(Ordering::Relaxed);
        loop {
            // SAFETY: `block` is unpublished until the CAS succeeds.
            unsafe { (*block).next = top };
            match self.storage.compare_exchange_weak(
                top,
                block,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => top = current,
            }
        }

        claimed
    }
}

impl<T> Drop for BlockQueue<T> {
    fn drop(&mut self) {
        // Drop the in-flight items: the main-list chain starting at the
        // tail node (which may itself be partially drained), then the
        // staged partial node, if any.
        let mut node = *self.tail.get_mut();
        while !node.is_null() {
            // SAFETY: nodes stay allocated until the blocks are freed.
            unsafe {
                let read = *(*node).read.get();
                let write = *(*node).write.get();
                for i in read..write {
                    (*(*node).items[i].get()).assume_init_drop();
                }
                node = *(*node).next.get_mut();
            }
        }

        let staged = *self.spare.get_mut();
        if !staged.is_null() {
            // SAFETY: staged nodes hold items in `read..write` and belong
            // to no list.
            unsafe {
                let read = *(*staged).read.get();
                let write = *(*staged).write.get();
                for i in read..write {
                    (*(*staged).items[i].get()).assume_init_drop();
                }
            }
        }

        let mut block = *self.storage.get_mut();
        while !block.is_null() {
            // SAFETY: blocks are created by `Box::into_raw` and freed only
            // here.
            let owned = unsafe { Box::from_raw(block) };
            block = owned.next;
        }
    }
}

impl<T: Send> ConsumerQueue<T> for BlockQueue<T> {
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

impl<T: Send> UnboundedQueue<T> for BlockQueue<T> {
    fn mp_enqueue(&self, value: T) {
        Self::mp_enqueue(self, value);
    }

    unsafe fn sp_enqueue(&self, value: T) {
        // SAFETY: forwarded contract.
        unsafe { Self::sp_enqueue(self, value) }
    }
}
