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

/// Nodes handed out per storage allocation.
const NODES_PER_BLOCK: usize = 32;

/// One list node. The payload travels in the node that carries it onto the
/// main list; by the time a node is recycled through the freelist its value
/// slot has been moved out and is plain uninitialized storage.
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

/// One allocation of nodes. Blocks form an intrusive stack owned by the
/// queue; the in-flight lists only ever borrow node pointers from here.
struct Block<T> {
    nodes: Box<[Node<T>]>,
    next: *mut Block<T>,
}

/// Unbounded MPMC queue over a singly-linked list, one item per node.
///
/// Three lists share the node type:
///
/// - the *main list* holds in-flight items between its `tail` (consumer
///   end) and `head` (producer end), always keeping one node as sentinel;
/// - the *freelist* holds retired nodes for reuse, shaped exactly like the
///   main list;
/// - the *storage list* owns every allocation and frees it exactly once on
///   drop, which is what makes node recycling ABA-safe: a node pointer can
///   never dangle mid-life.
///
/// Producers publish by exchanging the main-list head and linking the old
/// head to the new node. Consumers serialize through the *tail token*: a
/// dequeue exchanges `tail` with null, and whoever holds the non-null
/// pointer is the only thread advancing the consumer end. `mc_dequeue`
/// yield-spins for the token; [`mc_dequeue_uncontended`] gives up instead,
/// which is what the sharded layer wants for its first pass.
///
/// Enqueue never fails. When the freelist is dry, nodes are allocated 32 at
/// a time and the spares are spliced into the freelist.
///
/// [`mc_dequeue_uncontended`]: ListQueue::mc_dequeue_uncontended
///
/// # Examples
///
/// ```rust
/// use quiver::list::ListQueue;
/// use quiver::traits::UnboundedQueue;
///
/// let queue = ListQueue::new();
/// for i in 0..3 {
///     queue.mp_enqueue(i);
/// }
/// assert_eq!(queue.mc_dequeue(), Ok(0));
/// assert_eq!(queue.mc_dequeue(), Ok(1));
/// assert_eq!(queue.mc_dequeue(), Ok(2));
/// assert!(queue.mc_dequeue().is_err());
/// ```
pub struct ListQueue<T> {
    /// Producer end of the main list.
    head: CachePadded<AtomicPtr<Node<T>>>,
    /// Consumer end of the main list; null while a consumer holds the
    /// tail token.
    tail: CachePadded<AtomicPtr<Node<T>>>,
    /// Producer end of the freelist (retired nodes are pushed here).
    free_head: CachePadded<AtomicPtr<Node<T>>>,
    /// Consumer end of the freelist; null while a producer holds its token.
    free_tail: CachePadded<AtomicPtr<Node<T>>>,
    /// Stack of every block ever allocated.
    storage: AtomicPtr<Block<T>>,
}

// SAFETY: nodes are handed between threads through release stores of the
// `next` pointers paired with acquire loads, and each value slot is written
// or read only by the thread that exclusively holds the node at the time.
unsafe impl<T: Send> Send for ListQueue<T> {}
unsafe impl<T: Send> Sync for ListQueue<T> {}

impl<T> Default for ListQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ListQueue<T> {
    /// Create an empty queue.
    ///
    /// Allocates the first node block up front: one node becomes the main
    /// list sentinel, one the freelist sentinel, and the rest seed the
    /// freelist.
    pub fn new() -> Self {
        let mut nodes = Vec::with_capacity(NODES_PER_BLOCK);
        nodes.resize_with(NODES_PER_BLOCK, Node::empty);
        let mut nodes = nodes.into_boxed_slice();

        let main_sentinel: *mut Node<T> = &mut nodes[0];
        let free_sentinel: *mut Node<T> = &mut nodes[1];
        // Chain the spare nodes behind the freelist sentinel. This is
        // single-threaded construction, so plain stores suffice.
        for i in 2..NODES_PER_BLOCK {
            let spare: *mut Node<T> = &mut nodes[i];
            nodes[i - 1].next.store(spare, Ordering::Relaxed);
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
            storage: AtomicPtr::new(block),
        }
    }

    /// Push a value, contending with other producers.
    pub fn mp_enqueue(&self, value: T) {
        let node = self.acquire_node(value);
        let prev = self.head.swap(node, Ordering::AcqRel);
        // SAFETY: `prev` was the main-list head, which nothing unlinks
        // until a consumer walks past it; storing `next` publishes the new
        // node together with its value.
        unsafe { (*prev).next.store(node, Ordering::Release) };
    }

    /// Push a value from the only producer.
    ///
    /// # Safety
    /// No other thread may execute any enqueue on this queue for the
    /// duration of the call.
    pub unsafe fn sp_enqueue(&self, value: T) {
        let node = self.acquire_node(value);
        let head = self.head.load(Ordering::Relaxed);
        // SAFETY: exclusive producer, so `head` cannot move under us.
        unsafe { (*head).next.store(node, Ordering::Release) };
        self.head.store(node, Ordering::Relaxed);
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

    /// Advance the consumer end by one node. The caller owns `tail`,
    /// either via the token exchange or the single-consumer contract; in
    /// both cases storing a non-null `tail` releases it.
    fn dequeue_with_token(&self, tail: *mut Node<T>) -> Result<T, QueueError> {
        // SAFETY: token ownership makes `tail` exclusively ours.
        let next = unsafe { (*tail).next.load(Ordering::Acquire) };
        if next.is_null() {
            self.tail.store(tail, Ordering::Release);
            return Err(QueueError::Empty);
        }
        // SAFETY: `next` was published by a producer's release store, so
        // its value is initialized; the token guarantees only we read it.
        let value = unsafe { (*(*next).value.get()).assume_init_read() };
        self.tail.store(next, Ordering::Release);
        self.retire(tail);
        Ok(value)
    }

    /// Get a node holding `value`, recycling from the freelist when
    /// possible and allocating a fresh block otherwise.
    fn acquire_node(&self, value: T) -> *mut Node<T> {
        let mut node = self.freelist_pop();
        if node.is_null() {
            node = self.allocate();
        }
        // SAFETY: the node came off the freelist or a fresh block, so it is
        // exclusively ours until published.
        unsafe {
            (*(*node).value.get()).write(value);
            (*node).next.store(ptr::null_mut(), Ordering::Relaxed);
        }
        node
    }

    /// Return a spent node to the freelist.
    fn retire(&self, node: *mut Node<T>) {
        // SAFETY: the caller owned `node` exclusively; resetting `next`
        // before the exchange keeps the freelist terminated.
        unsafe { (*node).next.store(ptr::null_mut(), Ordering::Relaxed) };
        let prev = self.free_head.swap(node, Ordering::AcqRel);
        // SAFETY: `prev` stays reachable from the freelist tail until a
        // producer walks past it.
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
        // SAFETY: token ownership, as in the main-list dequeue.
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
        // Pre-chain the spares so a single head exchange publishes them
        // all: nodes[1] becomes the new freelist head and the chain runs
        // back to nodes[NODES_PER_BLOCK - 1], which the old head links to.
        for i in 2..NODES_PER_BLOCK {
            let prev_in_chain: *mut Node<T> = &mut nodes[i - 1];
            nodes[i].next.store(prev_in_chain, Ordering::Relaxed);
        }
        let chain_head: *mut Node<T> = &mut nodes[1];
        let chain_tail: *mut Node<T> = &mut nodes[NODES_PER_BLOCK - 1];

        let prev = self.free_head.swap(chain_head, Ordering::AcqRel);
        // SAFETY: as in `retire`.
        unsafe { (*prev).next.store(chain_tail, Ordering::Release) };

        // Record the allocation so drop can free it exactly once.
        let block = Box::into_raw(Box::new(Block {
            nodes,
            next: ptr::null_mut(),
        }));
        let mut top = self.storage.load(Ordering::Relaxed);
        loop {
            // SAFETY: `block` is unpublished until the CAS below succeeds.
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

impl<T> Drop for ListQueue<T> {
    fn drop(&mut self) {
        // Drop the values still in flight. Holding `&mut self` means no
        // operation is mid-air, so the chain from the tail sentinel is
        // fully linked and every node past it holds a live value.
        let mut node = *self.tail.get_mut();
        while !node.is_null() {
            // SAFETY: nodes stay allocated until the blocks are freed
            // below.
            let next = unsafe { *(*node).next.get_mut() };
            if next.is_null() {
                break;
            }
            // SAFETY: every node behind the sentinel was published with an
            // initialized value that no dequeue moved out.
            unsafe { (*(*next).value.get()).assume_init_drop() };
            node = next;
        }

        // Free the storage blocks, and with them every node.
        let mut block = *self.storage.get_mut();
        while !block.is_null() {
            // SAFETY: blocks are created by `Box::into_raw` and freed only
            // here.
            let owned = unsafe { Box::from_raw(block) };
            block = owned.next;
        }
    }
}

impl<T: Send> ConsumerQueue<T> for ListQueue<T> {
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

impl<T: Send> UnboundedQueue<T> for ListQueue<T> {
    fn mp_enqueue(&self, value: T) {
        Self::mp_enqueue(self, value);
    }

    unsafe fn sp_enqueue(&self, value: T) {
        // SAFETY: forwarded contract.
        unsafe { Self::sp_enqueue(self, value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn fifo_round_trip() {
        let queue = ListQueue::new();
        for i in 0..10 {
            queue.mp_enqueue(i);
        }
        for i in 0..10 {
            assert_eq!(queue.mc_dequeue().unwrap(), i);
        }
        assert_eq!(queue.mc_dequeue(), Err(QueueError::Empty));
        assert_eq!(queue.mc_dequeue(), Err(QueueError::Empty));
    }

    #[test]
    fn recycles_past_block_boundaries() {
        // More items than one block of nodes, twice over, so the freelist
        // and the allocator both get exercised.
        let queue = ListQueue::new();
        for round in 0..2 {
            for i in 0..(NODES_PER_BLOCK * 3) {
                queue.mp_enqueue(round * 1000 + i);
            }
            for i in 0..(NODES_PER_BLOCK * 3) {
                assert_eq!(queue.mc_dequeue().unwrap(), round * 1000 + i);
            }
        }
        assert_eq!(queue.mc_dequeue(), Err(QueueError::Empty));
    }

    #[test]
    fn exclusive_roles() {
        let queue = ListQueue::new();
        unsafe {
            queue.sp_enqueue("a");
            queue.sp_enqueue("b");
            assert_eq!(queue.sc_dequeue().unwrap(), "a");
            assert_eq!(queue.sc_dequeue().unwrap(), "b");
            assert_eq!(queue.sc_dequeue(), Err(QueueError::Empty));
        }
    }

    #[test]
    fn uncontended_succeeds_without_peers() {
        let queue = ListQueue::new();
        assert_eq!(queue.mc_dequeue_uncontended(), Err(QueueError::Empty));
        queue.mp_enqueue(1);
        assert_eq!(queue.mc_dequeue_uncontended().unwrap(), 1);
    }

    #[test]
    fn drop_releases_remaining_items() {
        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let queue = ListQueue::new();
        for _ in 0..40 {
            queue.mp_enqueue(Counted(drops.clone()));
        }
        for _ in 0..15 {
            queue.mc_dequeue().unwrap();
        }
        assert_eq!(drops.load(Ordering::Relaxed), 15);

        drop(queue);
        assert_eq!(drops.load(Ordering::Relaxed), 40);
    }

    #[test]
    fn per_producer_order_single_consumer() {
        let queue = Arc::new(ListQueue::new());
        let producers = 2usize;
        let items = 10_000usize;

        let handles: Vec<_> = (0..producers)
            .map(|pid| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..items {
                        queue.mp_enqueue(((pid as u64) << 32) | (i as u64));
                    }
                })
            })
            .collect();

        let mut last_seen = vec![None::<u64>; producers];
        let mut received = 0;
        while received < producers * items {
            if let Ok(value) = queue.mc_dequeue() {
                let pid = (value >> 32) as usize;
                let seq = value & 0xffff_ffff;
                if let Some(prev) = last_seen[pid] {
                    assert!(seq > prev, "producer {pid} reordered: {prev} then {seq}");
                }
                last_seen[pid] = Some(seq);
                received += 1;
            } else {
                thread::yield_now();
            }
        }

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn mpmc_conservation() {
        let queue = Arc::new(ListQueue::new());
        let producers = 2usize;
        let consumers = 2usize;
        let items = 5_000usize;
        let total = producers * items;

        let producer_handles: Vec<_> = (0..producers)
            .map(|pid| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..items {
                        queue.mp_enqueue(((pid as u64) << 32) | (i as u64));
                    }
                })
            })
            .collect();

        let consumed = Arc::new(AtomicUsize::new(0));
        let consumer_handles: Vec<_> = (0..consumers)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let consumed = Arc::clone(&consumed);
                thread::spawn(move || {
                    let mut local = Vec::new();
                    while consumed.load(Ordering::SeqCst) < total {
                        match queue.mc_dequeue() {
                            Ok(value) => {
                                consumed.fetch_add(1, Ordering::SeqCst);
                                local.push(value);
                            }
                            Err(_) => thread::yield_now(),
                        }
                    }
                    local
                })
            })
            .collect();

        for handle in producer_handles {
            handle.join().unwrap();
        }

        let mut counts: HashMap<u64, usize> = HashMap::new();
        for handle in consumer_handles {
            for value in handle.join().unwrap() {
                *counts.entry(value).or_default() += 1;
            }
        }

        assert_eq!(counts.len(), total, "lost items");
        assert!(counts.values().all(|&n| n == 1), "duplicated items");
    }
}
