//! This module contains the implementation of the unbounded `Store` type.
//!
//! The store is a segmented array: bucket `b` holds `FIRST_BUCKET_LEN << b` slots, and buckets are
//! allocated ahead of use. Buckets are never moved nor resized, so a reference handed out by the
//! store stays valid until the store is cleared or dropped, both of which require `&mut self`.

use crate::sync::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr;

use cache_padded::CachePadded;
use log::trace;

/// Number of bits needed to index the first bucket.
pub const FIRST_BUCKET_BITS: u32 = 5;

const FIRST_BUCKET_LEN: usize = 1 << FIRST_BUCKET_BITS;
const BUCKETS: usize = (usize::BITS - FIRST_BUCKET_BITS) as usize;
const MAX_INDEX: usize = usize::MAX - FIRST_BUCKET_LEN;

/// A slot holds at most one value, written once per session.
struct Slot<T> {
    ready: AtomicBool,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn empty() -> Self {
        Slot {
            ready: AtomicBool::new(false),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Position of an index inside the bucket array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Location {
    bucket: usize,
    offset: usize,
}

impl Location {
    #[inline]
    fn of(index: usize) -> Self {
        debug_assert!(index <= MAX_INDEX);

        let pos = index + FIRST_BUCKET_LEN;
        let msb = (usize::BITS - 1 - pos.leading_zeros()) as usize;

        Location {
            bucket: msb - FIRST_BUCKET_BITS as usize,
            offset: pos - (1 << msb),
        }
    }
}

#[inline]
fn bucket_len(bucket: usize) -> usize {
    FIRST_BUCKET_LEN << bucket
}

/// Offset in `bucket` whose pusher allocates the following bucket.
#[inline]
fn prefetch_offset(bucket: usize) -> usize {
    let len = bucket_len(bucket);
    len - len / 8
}

/// This Store holds an append-only, unbounded, concurrent sequence of items.
///
/// Pushes are lock-free: an index is reserved with a single atomic increment, the value is
/// written in its own slot, then published. A new bucket is allocated once per doubling of the
/// store, by the pusher reaching seven eighths of the current bucket.
///
/// Items pushed by a thread appear in the same order as that thread pushed them. Items pushed
/// concurrently by different threads appear in the order their indices were reserved.
///
/// Readers never block and never observe a partially written item: an index that has been
/// reserved but not yet written is skipped by `iter` and reported as `None` by `get`.
///
/// # Examples
/// ```
/// use eventlog::store::Store;
///
/// let store: Store<u64> = Store::new();
/// store.push(1);
/// store.push(2);
///
/// assert_eq!(store.get(0), Some(&1));
/// assert_eq!(store.get(1), Some(&2));
/// assert_eq!(store.get(2), None);
///
/// assert_eq!(store.len(), 2);
/// ```
pub struct Store<T> {
    reserved: CachePadded<AtomicUsize>,
    committed: CachePadded<AtomicUsize>,
    buckets: [AtomicPtr<Slot<T>>; BUCKETS],
}

impl<T> Store<T> {
    /// Create a new empty Store. No memory is allocated until the first push.
    pub fn new() -> Self {
        Self {
            reserved: CachePadded::new(AtomicUsize::new(0)),
            committed: CachePadded::new(AtomicUsize::new(0)),
            buckets: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
        }
    }

    /// Get the number of items completely pushed on the store.
    ///
    /// # Examples
    /// ```
    /// use eventlog::store::Store;
    ///
    /// let store: Store<u64> = Store::new();
    /// store.push(1);
    /// store.push(2);
    ///
    /// assert_eq!(store.len(), 2);
    /// ```
    #[inline]
    pub fn len(&self) -> usize {
        self.committed.load(Ordering::Acquire)
    }

    /// Is the store empty ?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get an item from the store.
    ///
    /// # Returns
    /// A reference to the item at the given index, or `None` if nothing has been published there
    /// yet.
    pub fn get(&self, index: usize) -> Option<&T> {
        if index > MAX_INDEX {
            return None;
        }

        let loc = Location::of(index);
        let bucket = self.buckets[loc.bucket].load(Ordering::Acquire);

        if bucket.is_null() {
            return None;
        }

        // SAFETY: `offset` is always lower than the length of the bucket it belongs to.
        let slot = unsafe { &*bucket.add(loc.offset) };

        if !slot.ready.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: The slot is ready, so its value has been written and will not be written
        // again until the store is cleared, which requires exclusive access.
        Some(unsafe { (*slot.value.get()).assume_init_ref() })
    }

    /// Append an item to the store.
    ///
    /// # Returns
    /// The index at which the item can be read back.
    ///
    /// # Panics
    /// If the store already holds `usize::MAX - 32` items.
    ///
    /// # Examples
    /// ```
    /// use eventlog::store::Store;
    ///
    /// let store: Store<u64> = Store::new();
    /// assert_eq!(store.push(1), 0);
    /// assert_eq!(store.push(2), 1);
    /// ```
    pub fn push(&self, value: T) -> usize {
        // INVARIANT: Tokens are unique, and monotonically increasing.
        // INVARIANT: A reader acquiring a later token sees this thread's earlier slots ready.
        let token = self.reserved.fetch_add(1, Ordering::AcqRel);

        assert!(token <= MAX_INDEX, "Store capacity exceeded.");

        let loc = Location::of(token);
        let bucket = self.bucket_or_alloc(loc.bucket);

        // SAFETY: `offset` is always lower than the length of the bucket it belongs to.
        let slot = unsafe { &*bucket.add(loc.offset) };

        // SAFETY: We are the only writer of this slot, and no reader will look at the value
        // before `ready` is set.
        unsafe { (*slot.value.get()).write(value) };

        slot.ready.store(true, Ordering::Release);
        self.committed.fetch_add(1, Ordering::Release);

        // Exactly one token lands on the prefetch offset of a bucket, so the next bucket is
        // allocated by a single thread, ahead of the pushers that will need it.
        if loc.offset == prefetch_offset(loc.bucket) && loc.bucket + 1 < BUCKETS {
            self.bucket_or_alloc(loc.bucket + 1);
        }

        token
    }

    /// Create an iterator over the store.
    ///
    /// The iterator covers every index reserved when it was created, in storage order.
    /// Items pushed afterwards are not visited.
    ///
    /// # Examples
    /// ```
    /// use eventlog::store::Store;
    ///
    /// let store: Store<u64> = Store::new();
    /// store.push(1);
    /// store.push(2);
    ///
    /// assert_eq!(store.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    /// ```
    pub fn iter(&self) -> StoreIterator<'_, T> {
        StoreIterator {
            idx: 0,
            end: self.reserved.load(Ordering::Acquire).min(MAX_INDEX + 1),
            store: self,
        }
    }

    /// Drop every item of the store. Allocated buckets are kept for the next pushes.
    pub fn clear(&mut self) {
        let end = self.reserved.load(Ordering::Relaxed).min(MAX_INDEX + 1);

        trace!("> store: clearing {} slots", end);

        for index in 0..end {
            let loc = Location::of(index);
            let bucket = self.buckets[loc.bucket].load(Ordering::Relaxed);

            if bucket.is_null() {
                continue;
            }

            // SAFETY: `offset` is always lower than the length of the bucket it belongs to.
            let slot = unsafe { &*bucket.add(loc.offset) };

            if slot.ready.swap(false, Ordering::Relaxed) {
                // SAFETY: The slot was ready, so it is initialized, and we hold `&mut self`.
                unsafe { (*slot.value.get()).assume_init_drop() };
            }
        }

        self.reserved.store(0, Ordering::Relaxed);
        self.committed.store(0, Ordering::Relaxed);
    }

    /// Load a bucket, allocating it if nobody did yet.
    ///
    /// Pushers racing on a bucket that is still missing each build one, and all but the first
    /// to publish free theirs. Buckets after the first are normally allocated ahead of time by
    /// the prefetching pusher, so this only happens when producers outrun it.
    fn bucket_or_alloc(&self, bucket: usize) -> *mut Slot<T> {
        let current = self.buckets[bucket].load(Ordering::Acquire);

        if !current.is_null() {
            return current;
        }

        let len = bucket_len(bucket);
        let fresh: Box<[Slot<T>]> = (0..len).map(|_| Slot::empty()).collect();
        let fresh = Box::into_raw(fresh) as *mut Slot<T>;

        match self.buckets[bucket].compare_exchange(
            ptr::null_mut(),
            fresh,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                trace!("> store: bucket {} allocated ({} slots)", bucket, len);
                fresh
            }
            Err(winner) => {
                // SAFETY: `fresh` was never shared with anyone.
                unsafe { free_bucket(fresh, bucket) };
                winner
            }
        }
    }
}

/// Release the memory of a bucket. Values must have been dropped already.
unsafe fn free_bucket<T>(ptr: *mut Slot<T>, bucket: usize) {
    drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
        ptr,
        bucket_len(bucket),
    )));
}

impl<T> Drop for Store<T> {
    fn drop(&mut self) {
        self.clear();

        for (bucket, ptr) in self.buckets.iter().enumerate() {
            let ptr = ptr.load(Ordering::Relaxed);

            if !ptr.is_null() {
                // SAFETY: Every value has been dropped by `clear`, and we own the bucket.
                unsafe { free_bucket(ptr, bucket) };
            }
        }
    }
}

impl<T> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

unsafe impl<T: Sync + Send> Send for Store<T> {}
unsafe impl<T: Sync + Send> Sync for Store<T> {}

/// Iterator over the items in a Store.
pub struct StoreIterator<'a, T> {
    idx: usize,
    end: usize,
    store: &'a Store<T>,
}

impl<'a, T> Iterator for StoreIterator<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        while self.idx < self.end {
            let idx = self.idx;
            self.idx += 1;

            // Reserved but unpublished slots are skipped.
            if let Some(item) = self.store.get(idx) {
                return Some(item);
            }
        }

        None
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::sync::Arc;

    use log::debug;

    use crate::sync::thread;

    use super::*;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Counts how many times it has been dropped.
    #[derive(Debug)]
    struct Tracked(Arc<StdAtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    fn store_basics() {
        init();

        let store = Store::new();

        store.push(1);
        store.push(2);
        store.push(3);

        assert_eq!(store.len(), 3);
        assert_eq!(store.get(0), Some(&1));
        assert_eq!(store.get(1), Some(&2));
        assert_eq!(store.get(2), Some(&3));
        assert_eq!(store.get(3), None);
        assert_eq!(store.get(usize::MAX), None);
    }

    fn store_iter() {
        init();

        let store = Store::new();

        store.push(1);
        store.push(2);
        store.push(3);

        let mut iter = store.iter();

        assert_eq!(iter.next(), Some(&1));
        assert_eq!(iter.next(), Some(&2));
        assert_eq!(iter.next(), Some(&3));
        assert_eq!(iter.next(), None);
    }

    fn store_multi_thread_append() {
        init();

        let per_thread = if cfg!(loom) { 2 } else { 1_000 };
        let store = Arc::new(Store::new());

        let handles: Vec<_> = (0..2)
            .map(|id| {
                let s = store.clone();

                thread::spawn(move || {
                    for i in 0..per_thread {
                        s.push((id, i));
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.len(), 2 * per_thread);

        // Each thread's items come out in the order they were pushed.
        for id in 0..2 {
            let seen: Vec<_> = store
                .iter()
                .filter(|(t, _)| *t == id)
                .map(|(_, i)| *i)
                .collect();

            debug!("thread {}: {} items", id, seen.len());
            assert_eq!(seen, (0..per_thread).collect::<Vec<_>>());
        }
    }

    fn store_concurrent_read() {
        init();

        let store = Arc::new(Store::new());
        let s = store.clone();

        let writer = thread::spawn(move || {
            for i in 0..3 {
                s.push(i);
            }
        });

        // Whatever a reader sees is a prefix of the writer's order.
        let seen: Vec<_> = store.iter().copied().collect();
        assert_eq!(seen, (0..seen.len()).collect::<Vec<_>>());

        writer.join().unwrap();

        assert_eq!(store.iter().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_location() {
        assert_eq!(Location::of(0), Location { bucket: 0, offset: 0 });
        assert_eq!(Location::of(31), Location { bucket: 0, offset: 31 });
        assert_eq!(Location::of(32), Location { bucket: 1, offset: 0 });
        assert_eq!(Location::of(95), Location { bucket: 1, offset: 63 });
        assert_eq!(Location::of(96), Location { bucket: 2, offset: 0 });
        assert_eq!(
            Location::of(MAX_INDEX),
            Location {
                bucket: BUCKETS - 1,
                offset: bucket_len(BUCKETS - 1) - 1
            }
        );
    }

    #[cfg(not(loom))]
    mod test {
        use super::*;

        #[test]
        fn test_store_basics() {
            store_basics()
        }

        #[test]
        fn test_store_iter() {
            store_iter()
        }

        #[test]
        fn test_store_multi_thread_append() {
            store_multi_thread_append()
        }

        #[test]
        fn test_store_concurrent_read() {
            store_concurrent_read()
        }

        #[test]
        fn test_store_immutable_entries() {
            init();

            let store = Store::new();

            store.push(0);
            store.push(42);

            let before = store.get(1).unwrap() as *const i32;

            // Enough to allocate several more buckets.
            for i in 0..1_000 {
                store.push(i);
            }

            assert_eq!(store.get(1), Some(&42));
            assert_eq!(store.get(1).unwrap() as *const i32, before);
            assert_eq!(store.len(), 1_002);
        }

        #[test]
        fn test_store_clear() {
            init();

            let drops = Arc::new(StdAtomicUsize::new(0));
            let mut store = Store::new();

            for _ in 0..100 {
                store.push(Tracked(drops.clone()));
            }

            store.clear();

            assert_eq!(drops.load(std::sync::atomic::Ordering::SeqCst), 100);
            assert!(store.is_empty());
            assert_eq!(store.iter().count(), 0);
            assert!(store.get(0).is_none());

            // The store can be reused after a clear.
            assert_eq!(store.push(Tracked(drops.clone())), 0);
            assert_eq!(store.len(), 1);
            assert_eq!(store.iter().count(), 1);
        }

        #[test]
        fn test_store_drop_releases_once() {
            init();

            let drops = Arc::new(StdAtomicUsize::new(0));
            let mut store = Store::new();

            for _ in 0..40 {
                store.push(Tracked(drops.clone()));
            }

            store.clear();

            for _ in 0..10 {
                store.push(Tracked(drops.clone()));
            }

            drop(store);

            assert_eq!(drops.load(std::sync::atomic::Ordering::SeqCst), 50);
        }

        #[test]
        fn test_store_next_bucket_allocated_ahead() {
            init();

            let store = Store::new();
            let prefetch = prefetch_offset(0);

            for i in 0..prefetch {
                store.push(i);
            }

            assert!(!store.buckets[0].load(Ordering::Relaxed).is_null());
            assert!(store.buckets[1].load(Ordering::Relaxed).is_null());

            store.push(prefetch);
            let next = store.buckets[1].load(Ordering::Relaxed);

            assert!(!next.is_null());

            // Pushing into the next bucket reuses the allocation made ahead of time.
            for i in prefetch + 1..FIRST_BUCKET_LEN + 1 {
                store.push(i);
            }

            assert_eq!(store.buckets[1].load(Ordering::Relaxed), next);
            assert_eq!(store.get(FIRST_BUCKET_LEN), Some(&FIRST_BUCKET_LEN));
            assert!(store.buckets[2].load(Ordering::Relaxed).is_null());
        }

        #[test]
        fn test_store_debug() {
            let store = Store::new();

            store.push("a");
            store.push("b");

            assert_eq!(format!("{:?}", store), r#"["a", "b"]"#);
        }
    }

    #[cfg(loom)]
    mod test {
        use super::*;

        use loom;

        #[test]
        fn test_store_basics() {
            loom::model(store_basics)
        }

        #[test]
        fn test_store_iter() {
            loom::model(store_iter)
        }

        #[test]
        fn test_store_multi_thread_append() {
            loom::model(store_multi_thread_append)
        }

        #[test]
        fn test_store_concurrent_read() {
            loom::model(store_concurrent_read)
        }
    }
}
