//! # Quiver: Concurrent FIFO Queues for Message Passing
//!
//! Quiver is a library of multi-producer multi-consumer (MPMC) queues for
//! passing messages between the threads of one process. The cores are
//! lock-free or mostly lock-free; on top of them sits a sharding layer that
//! splits a logical queue across per-producer subqueues to cut contention,
//! and an optional blocking wrapper for callers that would rather park than
//! poll.
//!
//! ## Features
//!
//! - **Lock-free cores**: bounded ring buffer and unbounded linked-list
//!   queues built on atomic operations, with node recycling instead of
//!   per-operation allocation
//! - **Role-tagged operations**: `sp`/`mp` producer and `sc`/`mc` consumer
//!   variants, so exclusive callers can skip the synchronization they do
//!   not need
//! - **Adaptive sharding**: producer affinity plus per-consumer hitlists
//!   that reorder themselves toward recently productive shards
//! - **Deterministic reclamation**: retired nodes return to a freelist and
//!   storage is freed exactly once when a queue is dropped
//!
//! ## Queue Types
//!
//! ### Bounded ring ([`RingQueue`])
//!
//! A power-of-two ring buffer with per-slot sequence stamps (Dmitry
//! Vyukov's bounded MPMC algorithm). Enqueue fails with
//! [`QueueError::Full`] when all slots are occupied.
//!
//! ```rust
//! use quiver::ring::RingQueue;
//! use quiver::traits::BoundedQueue;
//!
//! # fn main() -> Result<(), quiver::QueueError> {
//! let queue = RingQueue::with_capacity(8)?;
//!
//! queue.mp_enqueue(42).ok();
//! assert_eq!(queue.mc_dequeue()?, 42);
//! # Ok(())
//! # }
//! ```
//!
//! ### Unbounded list queues ([`ListQueue`], [`BlockQueue`])
//!
//! Linked-list queues whose nodes are recycled through a freelist, so
//! steady-state operation does not allocate. [`ListQueue`] carries one item
//! per node; [`BlockQueue`] amortizes the list traffic by packing up to
//! 1024 items into each node.
//!
//! ```rust
//! use quiver::list::ListQueue;
//! use quiver::traits::UnboundedQueue;
//!
//! let queue = ListQueue::new();
//!
//! queue.mp_enqueue("hello");
//! assert_eq!(queue.mc_dequeue(), Ok("hello"));
//! ```
//!
//! ### Sharded queue ([`MultiQueue`])
//!
//! A vector of inner queues. Each producer thread is pinned to one shard,
//! preserving its own FIFO order; each consumer thread keeps a hitlist of
//! shard indexes and promotes whichever shard last produced an item to the
//! front of its scan.
//!
//! ```rust
//! use quiver::list::ListQueue;
//! use quiver::multi::MultiQueue;
//! use quiver::traits::{ConsumerQueue, UnboundedQueue};
//!
//! let queue: MultiQueue<u64, ListQueue<u64>> = MultiQueue::new(4);
//!
//! queue.mp_enqueue(7);
//! assert_eq!(queue.mc_dequeue(), Ok(7));
//! ```
//!
//! ### Blocking wrappers ([`BlockingBoundedQueue`], [`BlockingUnboundedQueue`])
//!
//! Condition-variable wrappers over any nonblocking core: `dequeue` parks
//! until an item arrives, `enqueue` on a bounded inner queue parks until a
//! slot frees up.
//!
//! [`RingQueue`]: ring::RingQueue
//! [`ListQueue`]: list::ListQueue
//! [`BlockQueue`]: block_list::BlockQueue
//! [`MultiQueue`]: multi::MultiQueue
//! [`BlockingBoundedQueue`]: blocking::BlockingBoundedQueue
//! [`BlockingUnboundedQueue`]: blocking::BlockingUnboundedQueue
//!
//! ## Role Tags
//!
//! Every queue exposes its operations under four role tags: `mp`/`mc` are
//! always safe, while `sp` (single producer) and `sc` (single consumer) are
//! `unsafe` optimizations whose callers promise that no concurrent peer
//! exists on that side for the duration of the call. Violating the promise
//! is a data race, which is why the compiler is told about it.
//!
//! ## Ordering Guarantees
//!
//! Each core preserves FIFO order per subqueue. A dequeue that returns item
//! `x` synchronizes-with the enqueue of `x`, so everything the producer
//! wrote before enqueueing is visible to the consumer. Once sharded, there
//! is no total order across producers -- only each producer's own items
//! stay in order, courtesy of the producer-to-shard affinity.
//!
//! ## Minimum Supported Rust Version (MSRV)
//!
//! Quiver requires Rust 1.88 or later.
#![deny(
    missing_docs,
    unused_imports,
    unused_variables,
    unreachable_code,
    unused_must_use
)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::cast_possible_wrap,
    clippy::inline_always
)]

/// Blocking wrappers over nonblocking cores.
///
/// This module provides [`BlockingBoundedQueue`] and
/// [`BlockingUnboundedQueue`], which add condition-variable parking around
/// any queue implementing the corresponding capability trait.
///
/// [`BlockingBoundedQueue`]: blocking::BlockingBoundedQueue
/// [`BlockingUnboundedQueue`]: blocking::BlockingUnboundedQueue
pub mod blocking;

/// Role-typed channel handles.
///
/// This module provides [`Sender`]/[`Receiver`] handle pairs over any
/// queue core, including the exclusive [`SoleSender`]/[`SoleReceiver`]
/// variants that re-establish the `sp`/`sc` contracts in the type system
/// so the fast paths need no `unsafe` at the call site.
///
/// [`Sender`]: channel::Sender
/// [`Receiver`]: channel::Receiver
/// [`SoleSender`]: channel::SoleSender
/// [`SoleReceiver`]: channel::SoleReceiver
pub mod channel;

/// Unbounded MPMC queue with blocked nodes.
///
/// This module provides [`BlockQueue`], which stores up to 1024 items per
/// list node to amortize the cost of list manipulation across many
/// operations.
///
/// [`BlockQueue`]: block_list::BlockQueue
pub mod block_list;

/// Bounded MPMC queue backed by a fixed node pool.
///
/// This module provides [`BoundedListQueue`], a linked-list queue whose
/// nodes are allocated once at construction; enqueue fails when the pool is
/// exhausted.
///
/// [`BoundedListQueue`]: bounded_list::BoundedListQueue
pub mod bounded_list;

/// Best-effort composition of a ring in front of a list queue.
///
/// This module provides [`CacheQueue`], which absorbs bursts in a small
/// ring buffer and overflows into an unbounded list queue. It does not
/// preserve ordering between the two stages.
///
/// [`CacheQueue`]: cache::CacheQueue
pub mod cache;

/// Unbounded MPMC queue with one item per node.
///
/// This module provides [`ListQueue`], the foundational linked-list queue:
/// a main list for in-flight items, a freelist for retired nodes, and a
/// storage list that owns every allocation.
///
/// [`ListQueue`]: list::ListQueue
pub mod list;

/// Sharded queue composition.
///
/// This module provides [`MultiQueue`], which spreads a logical queue over
/// several padded subqueues using thread-local producer affinity and
/// per-consumer hitlists.
///
/// [`MultiQueue`]: multi::MultiQueue
pub mod multi;

/// Bounded MPMC ring buffer.
///
/// This module provides [`RingQueue`], an implementation of Dmitry
/// Vyukov's bounded queue with per-slot sequence stamps.
///
/// [`RingQueue`]: ring::RingQueue
pub mod ring;

/// Thread-local object store.
///
/// This module provides [`ThreadLocalStore`], per-(thread, instance) state
/// with deterministic reclamation on both thread exit and owner drop. The
/// sharding layer uses it for producer affinity and consumer hitlists.
///
/// [`ThreadLocalStore`]: tls::ThreadLocalStore
pub mod tls;

/// Capability traits shared by all queue types.
///
/// This module defines the role-tagged operation sets: [`ConsumerQueue`]
/// (the dequeue surface common to every queue), [`BoundedQueue`] and
/// [`UnboundedQueue`] (the two enqueue disciplines), and [`BoundedBuild`]
/// for capacity-parameterized construction.
///
/// [`ConsumerQueue`]: traits::ConsumerQueue
/// [`BoundedQueue`]: traits::BoundedQueue
/// [`UnboundedQueue`]: traits::UnboundedQueue
/// [`BoundedBuild`]: traits::BoundedBuild
pub mod traits;

use thiserror::Error;

/// Errors that can occur during queue operations.
///
/// Role misuse (calling an `sp`/`sc` operation with a concurrent peer) is
/// not an error value; those operations are `unsafe` and the exclusivity
/// promise is part of their safety contract.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue has no free slot or node for another element.
    ///
    /// Only bounded queues report this. The caller decides the policy:
    /// retry, back off, drop the item, or promote to a blocking wrapper.
    #[error("queue is full")]
    Full,

    /// The queue contains no elements.
    ///
    /// Returned by every nonblocking dequeue. Blocking wrappers park
    /// instead of surfacing it.
    #[error("queue is empty")]
    Empty,

    /// An uncontended dequeue refused to wait for another consumer.
    ///
    /// Returned only by `mc_dequeue_uncontended` when a peer holds the
    /// tail token (list queues) or won the slot race (ring). The sharded
    /// layer reads this as "try another shard".
    #[error("queue is contended by another consumer")]
    Contended,

    /// A bounded ring was constructed with an unusable capacity.
    ///
    /// Ring capacities must be nonzero powers of two. Surfaces at
    /// construction, never mid-operation.
    #[error("capacity must be a nonzero power of two")]
    InvalidCapacity,
}
