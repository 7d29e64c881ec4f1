use parking_lot::Mutex;
use std::{
    any::Any,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

/// Type-erased return callback stored next to a slot value, so a thread's
/// exit can return values whose concrete type it no longer knows.
type ReturnFn = Arc<dyn Fn(Box<dyn Any + Send>) + Send + Sync>;

/// One slot in a thread's table. `owner_id == 0` means unused.
struct Slot {
    owner_id: usize,
    value: Option<Box<dyn Any + Send>>,
    on_return: Option<ReturnFn>,
}

impl Slot {
    const fn unused() -> Self {
        Self {
            owner_id: 0,
            value: None,
            on_return: None,
        }
    }
}

/// A thread's slot table. The mutex is short-held and almost always
/// uncontended (only the owning thread and reclaiming destructors touch
/// it), but it is what makes cross-thread reclamation sound.
struct ThreadTable {
    slots: Mutex<Vec<Slot>>,
}

/// Process-wide bookkeeping: which owner holds which slot index, which
/// indexes are free for reuse, and which per-thread tables are alive.
struct Registry {
    /// Slot index -> owner id; 0 marks a free index.
    owners: Vec<usize>,
    /// Released indexes awaiting reuse.
    available: Vec<usize>,
    /// Every live per-thread table.
    tables: Vec<Arc<ThreadTable>>,
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
    owners: Vec::new(),
    available: Vec::new(),
    tables: Vec::new(),
});

/// Owner ids start at 1 so that 0 can mean "unused" in the slots.
static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static TABLE: TableGuard = TableGuard::register();
}

/// Keeps the calling thread's table registered for its lifetime. The drop
/// glue is the thread-exit half of the reclamation protocol.
struct TableGuard {
    table: Arc<ThreadTable>,
}

impl TableGuard {
    fn register() -> Self {
        let table = Arc::new(ThreadTable {
            slots: Mutex::new(Vec::new()),
        });
        REGISTRY.lock().tables.push(Arc::clone(&table));
        Self { table }
    }
}

impl Drop for TableGuard {
    fn drop(&mut self) {
        // Collect the matching return callbacks under the locks, then
        // invoke them unlocked so a callback may itself use the registry.
        let mut returns: Vec<(ReturnFn, Box<dyn Any + Send>)> = Vec::new();
        {
            let mut registry = REGISTRY.lock();
            let mut slots = self.table.slots.lock();
            for (index, slot) in slots.iter_mut().enumerate() {
                // Only return a value whose owner is still alive; a dead
                // owner already ran its own reclamation.
                if slot.owner_id != 0
                    && registry.owners.get(index).copied() == Some(slot.owner_id)
                {
                    if let (Some(ret), Some(value)) = (slot.on_return.take(), slot.value.take()) {
                        returns.push((ret, value));
                    }
                }
                slot.owner_id = 0;
            }
            drop(slots);
            registry
                .tables
                .retain(|table| !Arc::ptr_eq(table, &self.table));
        }
        for (ret, value) in returns {
            ret(value);
        }
    }
}

/// Per-(thread, instance) storage with deterministic reclamation.
///
/// Each `ThreadLocalStore` owns one value per thread that touches it,
/// initialized lazily by the `init` closure. The value is reclaimed in both
/// directions:
///
/// - when a thread exits, the optional return callback runs for every
///   store that still holds state in that thread;
/// - when the store is dropped, the callback runs for every thread that
///   still holds its state.
///
/// Either way the callback runs at most once per (thread, store) pair.
///
/// Stores are identified by a process-unique id, never by address, so a
/// store constructed at a recycled allocation cannot inherit a dead
/// store's state: the slot's recorded owner id will not match and the
/// value is re-initialized.
///
/// Slot indexes come from a process-wide pool and are recycled when stores
/// are dropped, keeping each thread's table as small as the number of
/// concurrently live stores.
///
/// The sharded queue uses two of these: one holding each producer thread's
/// shard assignment (with a return callback that recycles the index), one
/// holding each consumer thread's hitlist.
///
/// # Reentrancy
///
/// The closure given to [`with`](Self::with) runs while the calling
/// thread's table is locked, and return callbacks run while the registry
/// is locked. Neither may create, drop, or access a `ThreadLocalStore`.
///
/// # Examples
///
/// ```rust
/// use quiver::tls::ThreadLocalStore;
///
/// let counter: ThreadLocalStore<u64> = ThreadLocalStore::new(|| 0);
/// counter.with(|n| *n += 1);
/// counter.with(|n| *n += 1);
/// assert_eq!(counter.with(|n| *n), 2);
///
/// // A fresh thread sees a fresh value.
/// std::thread::spawn(move || {
///     assert_eq!(counter.with(|n| *n), 0);
/// })
/// .join()
/// .unwrap();
/// ```
pub struct ThreadLocalStore<T> {
    id: usize,
    index: usize,
    init: Arc<dyn Fn() -> T + Send + Sync>,
    on_return: Option<Arc<dyn Fn(T) + Send + Sync>>,
}

impl<T: Send + 'static> ThreadLocalStore<T> {
    /// Create a store whose per-thread values start as `init()`.
    pub fn new(init: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self::build(Arc::new(init), None)
    }

    /// Create a store with a return callback, invoked once per thread with
    /// the thread's value when either the thread exits or the store is
    /// dropped.
    pub fn with_return(
        init: impl Fn() -> T + Send + Sync + 'static,
        on_return: impl Fn(T) + Send + Sync + 'static,
    ) -> Self {
        Self::build(Arc::new(init), Some(Arc::new(on_return)))
    }

    fn build(
        init: Arc<dyn Fn() -> T + Send + Sync>,
        on_return: Option<Arc<dyn Fn(T) + Send + Sync>>,
    ) -> Self {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let index = {
            let mut registry = REGISTRY.lock();
            if let Some(index) = registry.available.pop() {
                registry.owners[index] = id;
                index
            } else {
                registry.owners.push(id);
                registry.owners.len() - 1
            }
        };
        Self {
            id,
            index,
            init,
            on_return,
        }
    }

    /// Run `f` on the calling thread's value, initializing it first if
    /// this thread has not touched this store before (or touched it only
    /// through a previous owner of the slot index).
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        TABLE.with(|guard| {
            let mut slots = guard.table.slots.lock();
            if slots.len() <= self.index {
                slots.resize_with(self.index + 1, Slot::unused);
            }
            let slot = &mut slots[self.index];
            if slot.owner_id != self.id {
                // First touch from this thread, or the index was recycled
                // from a dead store. The dead store already reclaimed its
                // value, so plain re-initialization is correct.
                slot.value = Some(Box::new((self.init)()));
                slot.owner_id = self.id;
                slot.on_return = self.erased_return();
            }
            match slot.value.as_mut().and_then(|value| value.downcast_mut::<T>()) {
                Some(value) => f(value),
                None => unreachable!("slot owner matched but value type did not"),
            }
        })
    }

    /// Copy the calling thread's value out.
    pub fn get(&self) -> T
    where
        T: Copy,
    {
        self.with(|value| *value)
    }

    /// Move the calling thread's value out, leaving `T::default()`.
    ///
    /// Paired with [`put`](Self::put), this lets a caller operate on the
    /// value without holding the thread's table lock.
    pub fn take(&self) -> T
    where
        T: Default,
    {
        self.with(std::mem::take)
    }

    /// Store a value back, replacing whatever the slot currently holds.
    pub fn put(&self, value: T) {
        self.with(move |slot| *slot = value);
    }

    /// Manually run the return callback for the calling thread and mark
    /// its slot unused, so the next [`with`](Self::with) re-initializes.
    ///
    /// # Returns
    /// `true` if the callback was invoked; `false` if this thread held no
    /// value for this store or no callback was configured.
    pub fn relinquish(&self) -> bool {
        let reclaimed = TABLE.with(|guard| {
            let mut slots = guard.table.slots.lock();
            let Some(slot) = slots.get_mut(self.index) else {
                return None;
            };
            if slot.owner_id != self.id {
                return None;
            }
            slot.owner_id = 0;
            match (slot.on_return.take(), slot.value.take()) {
                (Some(ret), Some(value)) => Some((ret, value)),
                _ => None,
            }
        });
        match reclaimed {
            Some((ret, value)) => {
                ret(value);
                true
            }
            None => false,
        }
    }

    fn erased_return(&self) -> Option<ReturnFn> {
        self.on_return.clone().map(|ret| {
            Arc::new(move |boxed: Box<dyn Any + Send>| {
                if let Ok(value) = boxed.downcast::<T>() {
                    ret(*value);
                }
            }) as ReturnFn
        })
    }
}

impl<T> Drop for ThreadLocalStore<T> {
    fn drop(&mut self) {
        let mut returns: Vec<(ReturnFn, Box<dyn Any + Send>)> = Vec::new();
        {
            let mut registry = REGISTRY.lock();
            for table in &registry.tables {
                let mut slots = table.slots.lock();
                if let Some(slot) = slots.get_mut(self.index) {
                    if slot.owner_id == self.id {
                        slot.owner_id = 0;
                        if let (Some(ret), Some(value)) =
                            (slot.on_return.take(), slot.value.take())
                        {
                            returns.push((ret, value));
                        }
                    }
                }
            }
            // Hand the index back for reuse, and let the pools collapse
            // once every index is free.
            registry.owners[self.index] = 0;
            registry.available.push(self.index);
            if registry.available.len() == registry.owners.len() {
                registry.available.clear();
                registry.owners.clear();
            }
        }
        for (ret, value) in returns {
            ret(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as Counter;
    use std::thread;

    #[test]
    fn initializes_lazily_and_mutates_in_place() {
        let inits = Arc::new(Counter::new(0));
        let store = {
            let inits = Arc::clone(&inits);
            ThreadLocalStore::new(move || {
                inits.fetch_add(1, Ordering::SeqCst);
                10u64
            })
        };

        assert_eq!(inits.load(Ordering::SeqCst), 0);
        store.with(|n| *n += 5);
        store.with(|n| *n += 5);
        assert_eq!(store.with(|n| *n), 20);
        assert_eq!(inits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn values_are_per_thread() {
        let store = Arc::new(ThreadLocalStore::new(|| 0u64));
        store.with(|n| *n = 42);

        let handle = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let fresh = store.with(|n| *n);
                store.with(|n| *n = 7);
                fresh
            })
        };
        assert_eq!(handle.join().unwrap(), 0);
        assert_eq!(store.with(|n| *n), 42);
    }

    #[test]
    fn thread_exit_runs_return_callback_once() {
        let returned = Arc::new(Mutex::new(Vec::<u64>::new()));
        let store = {
            let returned = Arc::clone(&returned);
            Arc::new(ThreadLocalStore::with_return(
                || 0u64,
                move |value| returned.lock().push(value),
            ))
        };

        {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store.with(|n| *n = 99);
            })
            .join()
            .unwrap();
        }
        assert_eq!(returned.lock().as_slice(), &[99]);

        // The exited thread's value is gone; dropping the store must not
        // return it a second time.
        drop(Arc::try_unwrap(store).ok());
        assert_eq!(returned.lock().as_slice(), &[99]);
    }

    #[test]
    fn owner_drop_runs_return_callback_once() {
        let returned = Arc::new(Mutex::new(Vec::<u64>::new()));
        let store = {
            let returned = Arc::clone(&returned);
            ThreadLocalStore::with_return(|| 5u64, move |value| returned.lock().push(value))
        };

        store.with(|n| *n = 17);
        assert!(returned.lock().is_empty());

        drop(store);
        assert_eq!(returned.lock().as_slice(), &[17]);
    }

    #[test]
    fn both_reclamation_paths_fire_exactly_once_each() {
        let returned = Arc::new(Mutex::new(Vec::<u64>::new()));
        let store = {
            let returned = Arc::clone(&returned);
            Arc::new(ThreadLocalStore::with_return(
                || 0u64,
                move |value| returned.lock().push(value),
            ))
        };

        {
            let store = Arc::clone(&store);
            thread::spawn(move || store.with(|n| *n = 1))
                .join()
                .unwrap();
        }
        store.with(|n| *n = 2);

        drop(Arc::try_unwrap(store).ok());
        let mut values = returned.lock().clone();
        values.sort_unstable();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn relinquish_reclaims_then_reinitializes() {
        let returned = Arc::new(Mutex::new(Vec::<u64>::new()));
        let store = {
            let returned = Arc::clone(&returned);
            ThreadLocalStore::with_return(|| 100u64, move |value| returned.lock().push(value))
        };

        store.with(|n| *n = 11);
        assert!(store.relinquish());
        assert_eq!(returned.lock().as_slice(), &[11]);

        // A second relinquish has nothing to return.
        assert!(!store.relinquish());

        // The next access re-runs the initializer.
        assert_eq!(store.with(|n| *n), 100);

        drop(store);
        assert_eq!(returned.lock().as_slice(), &[11, 100]);
    }

    #[test]
    fn recycled_slot_does_not_leak_previous_owner_state() {
        let first = ThreadLocalStore::new(|| 1u64);
        first.with(|n| *n = 999);
        drop(first);

        // Whatever index this store gets (possibly the recycled one), it
        // must see its own initializer, not the stale value.
        let second = ThreadLocalStore::new(|| 2u64);
        assert_eq!(second.with(|n| *n), 2);
    }

    #[test]
    fn take_and_put_round_trip() {
        let store = ThreadLocalStore::new(|| vec![1, 2, 3]);
        let mut list = store.take();
        assert_eq!(list, vec![1, 2, 3]);
        list.push(4);
        store.put(list);
        assert_eq!(store.with(|list| list.len()), 4);
    }

    #[test]
    fn many_threads_many_stores() {
        let returned = Arc::new(Counter::new(0));
        let stores: Vec<_> = (0..4)
            .map(|i| {
                let returned = Arc::clone(&returned);
                Arc::new(ThreadLocalStore::with_return(
                    move || i as u64,
                    move |_| {
                        returned.fetch_add(1, Ordering::SeqCst);
                    },
                ))
            })
            .collect();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stores = stores.clone();
                thread::spawn(move || {
                    for store in &stores {
                        store.with(|n| *n += 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // 8 threads exited holding state in 4 stores each.
        assert_eq!(returned.load(Ordering::SeqCst), 32);
    }
}
