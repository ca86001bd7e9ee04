use crate::domain::Collector;
use crate::handle::{drop_boxed, HandleRef, Identity};
use crate::state::{SharedState, UNSYNCED_EPOCH};
use crate::sync::Ordering;
use crate::weak::Weak;
use std::cell::{Cell, Ref, RefCell};
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;

/// Per-handle memo of the registry record and the epoch it was read in.
///
/// A cached record is trusted without a registry lookup while the collector
/// epoch is unchanged and the record still carries the target identity. The
/// identity check is needed on top of the epoch because a swept record is
/// detached and its address may be handed to a new object.
///
/// 每个句柄对注册表记录及其读取时纪元的缓存。
/// 只要回收器纪元未变且记录仍携带目标标识，缓存的记录无需查找注册表即可信任。
pub(crate) struct HandleCache {
    handle: RefCell<Option<HandleRef>>,
    epoch: Cell<usize>,
}

impl HandleCache {
    #[inline]
    pub(crate) fn new(handle: Option<HandleRef>, epoch: usize) -> Self {
        Self {
            handle: RefCell::new(handle),
            epoch: Cell::new(epoch),
        }
    }

    #[inline]
    pub(crate) fn empty() -> Self {
        Self::new(None, UNSYNCED_EPOCH)
    }

    #[inline]
    pub(crate) fn epoch(&self) -> usize {
        self.epoch.get()
    }

    /// A copy sharing the same record and epoch stamp.
    #[inline]
    pub(crate) fn snapshot(&self) -> Self {
        Self::new(self.handle.borrow().clone(), self.epoch.get())
    }

    #[inline]
    pub(crate) fn store(&self, handle: Option<HandleRef>, epoch: usize) {
        *self.handle.borrow_mut() = handle;
        self.epoch.set(epoch);
    }

    #[inline]
    pub(crate) fn clear(&self) {
        self.store(None, UNSYNCED_EPOCH);
    }

    /// The cached record, whatever its freshness.
    #[inline]
    pub(crate) fn cached(&self) -> Option<Ref<'_, HandleRef>> {
        Ref::filter_map(self.handle.borrow(), Option::as_ref).ok()
    }

    /// The cached record if it can be trusted without a lookup.
    #[inline]
    pub(crate) fn fresh(&self, shared: &SharedState, identity: Identity) -> Option<Ref<'_, HandleRef>> {
        if self.epoch.get() != shared.epoch.load(Ordering::Acquire) {
            return None;
        }
        Ref::filter_map(self.handle.borrow(), |handle| {
            handle.as_ref().filter(|handle| handle.identity() == identity)
        })
        .ok()
    }

    /// The fresh record, looking `identity` up again when the cache is stale.
    ///
    /// 返回新鲜的记录；缓存过期时重新查找 `identity`。
    pub(crate) fn sync(&self, shared: &SharedState, identity: Identity) -> Option<Ref<'_, HandleRef>> {
        if let Some(handle) = self.fresh(shared, identity) {
            return Some(handle);
        }
        let epoch = shared.epoch.load(Ordering::Acquire);
        self.store(shared.lookup(identity), epoch);
        self.cached()
    }
}

/// An owning, reference-counted handle to an object tracked by a [`Collector`].
///
/// Each `Owning<T>` holds exactly one share of its object's count: it adds it
/// when created or cloned and gives it back when dropped, reset or reassigned.
/// When the last share goes, the object is not freed right away; it waits for
/// the next [`Collector::sweep`], and [`Weak`] handles observe it as invalid
/// from that moment on.
///
/// The registry record is cached together with the collector epoch, so
/// repeated validity checks and releases skip the bucket lookup as long as no
/// sweep happened in between.
///
/// **Typical Usage**:
/// ```
/// use refcount_gc::{Collector, Owning};
///
/// let collector = Collector::builder().bucket_bits(8).build().unwrap();
///
/// let first = Owning::new(&collector, vec![1, 2, 3]);
/// let second = first.clone();
/// assert_eq!(first.use_count(), 2);
/// assert_eq!(second.len(), 3);
///
/// drop(first);
/// drop(second);
/// assert_eq!(collector.sweep().reclaimed, 1);
/// ```
///
/// 指向 [`Collector`] 所跟踪对象的拥有型引用计数句柄。
/// 每个 `Owning<T>` 恰好持有其对象计数中的一份：创建或克隆时增加，
/// drop、reset 或重新赋值时归还。最后一份归还后对象不会立即释放，
/// 而是等待下一次 [`Collector::sweep`]；从那一刻起 [`Weak`] 句柄将其视为无效。
pub struct Owning<T> {
    pub(crate) object: Option<NonNull<T>>,
    pub(crate) cache: HandleCache,
    pub(crate) collector: Collector,
    _marker: PhantomData<T>,
}

// SAFETY: clones of an `Owning<T>` share the object across threads like
// `Arc<T>`, and the sweep may drop it on a worker thread.
unsafe impl<T: Send + Sync> Send for Owning<T> {}

impl<T: Send + 'static> Owning<T> {
    /// Box `value` and track it in `collector`.
    ///
    /// The allocation is known to be new, so registration skips the lookup.
    ///
    /// 将 `value` 装箱并在 `collector` 中跟踪它。
    /// 该分配必定是新的，因此注册时跳过查找。
    pub fn new(collector: &Collector, value: T) -> Self {
        const {
            assert!(
                std::mem::size_of::<T>() != 0,
                "zero-sized values have no distinct address to track"
            )
        };

        let ptr = Box::into_raw(Box::new(value));
        let identity = Identity::from_ptr(ptr);
        let epoch = collector.current_epoch();
        let handle = collector
            .shared
            .register_fresh(identity, Some(drop_boxed::<T>));

        Self {
            object: NonNull::new(ptr),
            cache: HandleCache::new(Some(handle), epoch),
            collector: collector.clone(),
            _marker: PhantomData,
        }
    }

    /// Take a share of an object allocated with `Box`.
    ///
    /// With `is_new` the registration skips the existence check. A null `ptr`
    /// gives an empty handle.
    ///
    /// # Safety
    /// `ptr` must come from `Box::<T>::into_raw` and must only ever be tracked
    /// by `collector`. With `is_new`, it must not be tracked yet. Once the last
    /// share is released, the sweep drops the box.
    pub unsafe fn from_raw(collector: &Collector, ptr: *mut T, is_new: bool) -> Self {
        let Some(object) = NonNull::new(ptr) else {
            return Self::empty(collector);
        };

        let identity = Identity::from_ptr(ptr);
        let epoch = collector.current_epoch();
        let handle = if is_new {
            collector.shared.register_fresh(identity, Some(drop_boxed::<T>))
        } else {
            collector.shared.register(identity, Some(drop_boxed::<T>))
        };

        Self {
            object: Some(object),
            cache: HandleCache::new(Some(handle), epoch),
            collector: collector.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Owning<T> {
    /// A handle that points to nothing.
    pub fn empty(collector: &Collector) -> Self {
        Self::from_parts(None, HandleCache::empty(), collector.clone())
    }

    /// Assemble a handle whose share was already taken by the caller.
    #[inline]
    pub(crate) fn from_parts(object: Option<NonNull<T>>, cache: HandleCache, collector: Collector) -> Self {
        Self {
            object,
            cache,
            collector,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.object.is_none()
    }

    /// Identity of the target, or [`Identity::NULL`] for an empty handle.
    #[inline]
    pub fn identity(&self) -> Identity {
        self.object
            .map_or(Identity::NULL, |object| Identity::from_ptr(object.as_ptr()))
    }

    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.object
            .map_or(std::ptr::null(), |object| object.as_ptr() as *const T)
    }

    /// Borrow the target, or `None` for an empty handle.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: this handle holds a share of the count, so the sweep cannot
        // reclaim the object while it exists.
        self.object.map(|object| unsafe { &*object.as_ptr() })
    }

    /// Borrow the target only if it still resolves to a tracked object.
    ///
    /// Differs from [`get`](Self::get) when this handle's share was released
    /// behind its back through the raw API and the object was swept.
    ///
    /// 仅当目标仍能解析为被跟踪对象时才借用它。
    pub fn get_checked(&self) -> Option<&T> {
        if !self.is_valid() {
            return None;
        }
        self.get()
    }

    #[inline]
    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    /// The target identity still resolves to a tracked object.
    ///
    /// Answers from the cache when no sweep happened since the last check;
    /// otherwise looks the identity up again and refreshes the cache.
    /// A share held by this handle means a found object is never pending.
    ///
    /// 目标标识仍能解析为被跟踪的对象。
    /// 自上次检查以来没有发生清扫时直接由缓存回答；否则重新查找标识并刷新缓存。
    pub fn is_valid(&self) -> bool {
        if self.object.is_none() {
            return false;
        }
        self.cache
            .sync(&self.collector.shared, self.identity())
            .is_some()
    }

    /// The registry record of the target, if tracked.
    pub fn handle(&self) -> Option<HandleRef> {
        if self.object.is_none() {
            return None;
        }
        self.cache
            .sync(&self.collector.shared, self.identity())
            .map(|handle| HandleRef::clone(&handle))
    }

    /// Current reference count of the target, `0` for an empty handle.
    pub fn use_count(&self) -> u32 {
        if self.object.is_none() {
            return 0;
        }
        self.cache
            .sync(&self.collector.shared, self.identity())
            .map_or(0, |handle| handle.count())
    }

    /// A [`Weak`] handle observing the same object.
    #[inline]
    pub fn downgrade(&self) -> Weak<T> {
        Weak::from(self)
    }

    /// Give the share back and leave the handle empty.
    ///
    /// 归还持有的份额并使句柄变为空。
    pub fn reset(&mut self) {
        let Some(object) = self.object.take() else {
            return;
        };
        let identity = Identity::from_ptr(object.as_ptr());
        let shared = &self.collector.shared;

        if let Some(handle) = self.cache.fresh(shared, identity) {
            shared.unregister_by_handle(&handle);
        } else {
            shared.unregister(identity);
        }
        self.cache.clear();
    }

    /// Move the share out, leaving this handle empty. The count is untouched.
    pub fn take(&mut self) -> Owning<T> {
        Owning::from_parts(
            self.object.take(),
            std::mem::replace(&mut self.cache, HandleCache::empty()),
            self.collector.clone(),
        )
    }

    /// Point this handle at the target of `other`, releasing the current one.
    /// Nothing happens if both already point to the same object.
    pub fn set(&mut self, other: &Owning<T>) {
        if self.object == other.object {
            return;
        }
        *self = other.clone();
    }

    /// Both handles point to the same object.
    #[inline]
    pub fn ptr_eq(&self, other: &Owning<T>) -> bool {
        self.object == other.object
    }
}

impl<T> Clone for Owning<T> {
    /// Take one more share of the same object.
    ///
    /// A fresh cached record is incremented in place; otherwise the identity
    /// goes through the registry again.
    fn clone(&self) -> Self {
        let Some(object) = self.object else {
            return Self::empty(&self.collector);
        };
        let identity = Identity::from_ptr(object.as_ptr());
        let shared = &self.collector.shared;

        let cache = match self.cache.fresh(shared, identity) {
            Some(handle) => {
                handle.acquire();
                HandleCache::new(Some(HandleRef::clone(&handle)), self.cache.epoch())
            }
            None => {
                let epoch = shared.epoch.load(Ordering::Acquire);
                HandleCache::new(Some(shared.register(identity, Some(drop_boxed::<T>))), epoch)
            }
        };

        Self::from_parts(Some(object), cache, self.collector.clone())
    }
}

impl<T> Drop for Owning<T> {
    #[inline]
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T> Deref for Owning<T> {
    type Target = T;

    /// # Panics
    /// Panics if the handle is empty.
    #[inline]
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced an empty Owning handle"),
        }
    }
}

impl<T> PartialEq for Owning<T> {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl<T> Eq for Owning<T> {}

impl<T> PartialEq<Weak<T>> for Owning<T> {
    fn eq(&self, other: &Weak<T>) -> bool {
        self.identity() == other.identity()
    }
}

impl<T> PartialOrd for Owning<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Owning<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.identity().cmp(&other.identity())
    }
}

impl<T> Hash for Owning<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl<T> fmt::Debug for Owning<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Owning").field(&self.identity()).finish()
    }
}
