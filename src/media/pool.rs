//! Recycling buffer pool
//!
//! Objects handed out by [`BufferPool::acquire`] return to the pool's free list
//! when the last holder drops them. The pool only keeps a weak reference from
//! each handed-out object back to itself, so dropping the pool never leaks and
//! objects returned after [`BufferPool::dispose`] are simply freed.

use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

/// Hook invoked when an object is returned to its pool.
pub trait Poolable: Send + 'static {
    fn recycle(&mut self) {}
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

struct PoolState<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    disposed: bool,
}

struct PoolShared<T> {
    name: &'static str,
    state: Mutex<PoolState<T>>,
}

impl<T: Poolable> PoolShared<T> {
    fn give_back(&self, slot: usize, generation: u32, mut value: T) {
        let mut state = self.state.lock();
        if state.disposed {
            return;
        }
        let Some(entry) = state.slots.get_mut(slot) else {
            return;
        };
        if entry.generation != generation || entry.value.is_some() {
            return;
        }
        value.recycle();
        entry.value = Some(value);
        state.free.push(slot);
    }
}

/// A pool of reusable objects (textures, sample buffers).
pub struct BufferPool<T: Poolable> {
    shared: Arc<PoolShared<T>>,
}

impl<T: Poolable> Clone for BufferPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Poolable> BufferPool<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                name,
                state: Mutex::new(PoolState {
                    slots: Vec::new(),
                    free: Vec::new(),
                    disposed: false,
                }),
            }),
        }
    }

    /// Pop a free object, or build a new one with `create`.
    ///
    /// Reused objects keep their previous contents; callers re-initialize them.
    pub fn acquire(&self, create: impl FnOnce() -> T) -> Pooled<T> {
        let reused = {
            let mut state = self.shared.state.lock();
            state.disposed = false;
            match state.free.pop() {
                Some(index) => {
                    let slot = &mut state.slots[index];
                    slot.generation = slot.generation.wrapping_add(1);
                    slot.value.take().map(|value| (index, slot.generation, value))
                }
                None => None,
            }
        };

        let (slot, generation, value) = match reused {
            Some(entry) => entry,
            None => {
                let value = create();
                let mut state = self.shared.state.lock();
                state.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                (state.slots.len() - 1, 0, value)
            }
        };

        Pooled {
            value: Some(value),
            slot,
            generation,
            pool: Arc::downgrade(&self.shared),
        }
    }

    /// Whether the free list is empty (the next acquire allocates).
    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().free.is_empty()
    }

    pub fn free_count(&self) -> usize {
        self.shared.state.lock().free.len()
    }

    /// Number of objects allocated over the pool's lifetime.
    pub fn capacity(&self) -> usize {
        self.shared.state.lock().slots.len()
    }

    /// Drop every free object and invalidate outstanding ones.
    ///
    /// Outstanding objects are freed instead of recycled when their holders drop them.
    pub fn dispose(&self) {
        let mut state = self.shared.state.lock();
        state.disposed = true;
        state.free.clear();
        for slot in state.slots.iter_mut() {
            slot.generation = slot.generation.wrapping_add(1);
            slot.value = None;
        }
        tracing::debug!("Disposed {} pool", self.shared.name);
    }
}

/// An object on loan from a [`BufferPool`].
pub struct Pooled<T: Poolable> {
    value: Option<T>,
    slot: usize,
    generation: u32,
    pool: Weak<PoolShared<T>>,
}

impl<T: Poolable> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `Drop` takes the value out.
        self.value.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Poolable> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Poolable> Drop for Pooled<T> {
    fn drop(&mut self) {
        let Some(value) = self.value.take() else {
            return;
        };
        if let Some(pool) = self.pool.upgrade() {
            pool.give_back(self.slot, self.generation, value);
        }
    }
}

impl<T: Poolable + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("slot", &self.slot)
            .field("value", &self.value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Buf {
        data: Vec<u8>,
        recycled: usize,
    }

    impl Poolable for Buf {
        fn recycle(&mut self) {
            self.recycled += 1;
        }
    }

    #[test]
    fn test_dropped_object_is_reused() {
        let pool = BufferPool::<Buf>::new("test");
        let mut first = pool.acquire(Buf::default);
        first.data.push(7);
        drop(first);

        assert_eq!(pool.free_count(), 1);
        let second = pool.acquire(|| panic!("should reuse the free object"));
        assert_eq!(second.data, vec![7]);
        assert_eq!(second.recycled, 1);
        assert_eq!(pool.capacity(), 1);
    }

    #[test]
    fn test_outstanding_objects_allocate_new_slots() {
        let pool = BufferPool::<Buf>::new("test");
        let a = pool.acquire(Buf::default);
        let b = pool.acquire(Buf::default);
        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), 2);
        drop(a);
        drop(b);
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn test_dispose_frees_late_returns() {
        let pool = BufferPool::<Buf>::new("test");
        let outstanding = pool.acquire(Buf::default);
        drop(pool.acquire(Buf::default));
        pool.dispose();
        assert_eq!(pool.free_count(), 0);

        drop(outstanding);
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn test_object_outlives_pool() {
        let pool = BufferPool::<Buf>::new("test");
        let held = pool.acquire(Buf::default);
        drop(pool);
        assert!(held.data.is_empty());
        drop(held);
    }
}
