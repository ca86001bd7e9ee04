use crate::error::CollectorError;
use crate::handle::{Deleter, Handle, HandleRef, Identity};
use crate::state::SharedState;
use crate::sync::{Arc, Mutex, Ordering};
use std::vec::Vec;

/// Collision list of one bucket.
type Bucket = Vec<HandleRef>;

/// Address-keyed table of tracked handles.
///
/// The table is a power-of-two array of buckets indexed by
/// `identity & bucket_mask`. A given identity maps to exactly one bucket, so
/// buckets are independent: every lock below is taken by at most one caller
/// touching that bucket, and the sweep workers never share a bucket.
///
/// 以地址为键的被跟踪句柄表。
/// 该表是一个大小为 2 的幂的桶数组，通过 `identity & bucket_mask` 索引。
/// 一个标识只映射到一个桶，因此各个桶相互独立。
pub(crate) struct ShardTable {
    buckets: Box<[Mutex<Bucket>]>,
    mask: usize,
}

impl ShardTable {
    pub(crate) fn with_buckets(bucket_count: usize) -> Result<Self, CollectorError> {
        debug_assert!(bucket_count.is_power_of_two());

        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(bucket_count)
            .map_err(|source| CollectorError::TableAllocation {
                buckets: bucket_count,
                source,
            })?;
        buckets.extend((0..bucket_count).map(|_| Mutex::new(Bucket::new())));

        Ok(Self {
            buckets: buckets.into_boxed_slice(),
            mask: bucket_count - 1,
        })
    }

    #[inline]
    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    pub(crate) fn index_of(&self, identity: Identity) -> usize {
        identity.addr() & self.mask
    }

    /// Remove every pending handle from bucket `index` and return them.
    ///
    /// `on_locked` runs once the bucket is held and before it is inspected;
    /// the sweep uses it to clear the bucket's dirty bit. Deleters are not run
    /// here: the caller reclaims the returned handles after the lock is gone,
    /// so a deleter that releases further handles never waits on this bucket.
    ///
    /// 从桶 `index` 中移除所有待回收的句柄并返回它们。
    /// 析构函数不在此处运行：调用者在锁释放后回收返回的句柄。
    pub(crate) fn drain_pending(&self, index: usize, on_locked: impl FnOnce()) -> Vec<HandleRef> {
        let mut bucket = self.buckets[index].lock();
        on_locked();

        let mut doomed = Vec::new();
        let mut i = 0;
        while i < bucket.len() {
            if bucket[i].is_pending_to_kill() {
                doomed.push(bucket.swap_remove(i));
            } else {
                i += 1;
            }
        }
        doomed
    }

    /// Put handles taken by [`drain_pending`](Self::drain_pending) back into
    /// bucket `index`.
    pub(crate) fn restore(&self, index: usize, handles: Vec<HandleRef>) {
        self.buckets[index].lock().extend(handles);
    }
}

impl std::fmt::Debug for ShardTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardTable")
            .field("buckets", &self.buckets.len())
            .finish_non_exhaustive()
    }
}

#[inline]
fn find(bucket: &Bucket, identity: Identity) -> Option<&HandleRef> {
    bucket.iter().find(|handle| handle.identity() == identity)
}

impl SharedState {
    /// Track one more reference to `identity`.
    ///
    /// An existing handle (including one already at zero, which cancels its
    /// pending reclamation) gets its count bumped; otherwise a new handle with
    /// count one is inserted. `deleter` is only used for a new handle.
    ///
    /// 为 `identity` 增加一个引用。
    /// 已存在的句柄（包括计数已为零的句柄，这会取消其待回收状态）计数加一；
    /// 否则插入一个计数为一的新句柄。`deleter` 仅用于新句柄。
    pub(crate) fn register(&self, identity: Identity, deleter: Option<Deleter>) -> HandleRef {
        debug_assert!(!identity.is_null(), "registering the null identity");

        let index = self.table.index_of(identity);
        let mut bucket = self.table.buckets[index].lock();
        if let Some(handle) = find(&bucket, identity) {
            handle.acquire();
            return Arc::clone(handle);
        }

        let handle = Arc::new(Handle::new(identity, deleter));
        bucket.push(Arc::clone(&handle));
        self.total_tracked.fetch_add(1, Ordering::Relaxed);
        handle
    }

    /// Insert a new handle without looking for an existing one.
    ///
    /// The caller guarantees `identity` is not tracked yet, typically because
    /// the object was just allocated. Only debug builds verify it.
    pub(crate) fn register_fresh(&self, identity: Identity, deleter: Option<Deleter>) -> HandleRef {
        debug_assert!(!identity.is_null(), "registering the null identity");

        let index = self.table.index_of(identity);
        let handle = Arc::new(Handle::new(identity, deleter));
        {
            let mut bucket = self.table.buckets[index].lock();
            debug_assert!(
                find(&bucket, identity).is_none(),
                "fresh registration of an already tracked identity {identity:?}"
            );
            bucket.push(Arc::clone(&handle));
        }
        self.total_tracked.fetch_add(1, Ordering::Relaxed);
        handle
    }

    /// Drop one reference to `identity`.
    ///
    /// Returns `None` when the identity is not tracked or already at zero.
    /// A count reaching zero marks the bucket dirty.
    pub(crate) fn unregister(&self, identity: Identity) -> Option<HandleRef> {
        debug_assert!(!identity.is_null(), "unregistering the null identity");

        let index = self.table.index_of(identity);
        let handle = {
            let bucket = self.table.buckets[index].lock();
            Arc::clone(find(&bucket, identity)?)
        };

        let reached_zero = handle.release()?;
        if reached_zero {
            self.mark_dirty(index);
        }
        Some(handle)
    }

    /// Same as [`unregister`](Self::unregister) for a caller that already
    /// holds the handle, skipping the bucket lookup.
    pub(crate) fn unregister_by_handle(&self, handle: &Handle) {
        let identity = handle.identity();
        if identity.is_null() {
            return;
        }
        debug_assert!(
            self.lookup(identity)
                .is_some_and(|tracked| std::ptr::eq(&*tracked, handle)),
            "releasing through a handle this collector does not track: {identity:?}"
        );
        if handle.release() == Some(true) {
            self.mark_dirty(self.table.index_of(identity));
        }
    }

    pub(crate) fn lookup(&self, identity: Identity) -> Option<HandleRef> {
        if identity.is_null() {
            return None;
        }
        let bucket = self.table.buckets[self.table.index_of(identity)].lock();
        find(&bucket, identity).cloned()
    }

    fn mark_dirty(&self, index: usize) {
        if !self.dirty.mark_dirty(index) {
            return;
        }
        tracing::trace!(bucket = index, "bucket marked dirty");

        if let Some(threshold) = self.auto_sweep_threshold {
            if self.dirty.dirty_count() > threshold {
                self.sweep();
            }
        }
    }
}
