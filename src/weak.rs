use crate::domain::Collector;
use crate::handle::{HandleRef, Identity};
use crate::ptr::{HandleCache, Owning};
use crate::sync::Ordering;
use std::cell::Ref;
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ptr::NonNull;

/// A non-owning handle observing an object owned by [`Owning`] handles.
///
/// A `Weak<T>` never touches the reference count. It turns invalid the moment
/// the count reaches zero, before any sweep has actually freed the object, so
/// no code path ever treats a zero-count object as alive.
///
/// It can only be obtained from an `Owning<T>` (or another `Weak<T>`); there is
/// no way to build one from a raw pointer.
///
/// **Typical Usage**:
/// ```
/// use refcount_gc::{Collector, Owning};
///
/// let collector = Collector::builder().bucket_bits(8).build().unwrap();
/// let mut owner = Owning::new(&collector, 7u64);
/// let observer = owner.downgrade();
///
/// assert_eq!(observer.upgrade().as_deref(), Some(&7));
///
/// owner.reset();
/// assert!(!observer.is_valid());
/// assert!(observer.upgrade().is_none());
/// ```
///
/// 观察由 [`Owning`] 句柄拥有的对象的非拥有型句柄。
/// `Weak<T>` 从不修改引用计数。计数归零的那一刻它就变为无效，
/// 早于任何清扫实际释放该对象，因此任何代码路径都不会把计数为零的对象视为存活。
/// 它只能从 `Owning<T>`（或另一个 `Weak<T>`）获得，无法从原始指针构建。
pub struct Weak<T> {
    object: Option<NonNull<T>>,
    cache: HandleCache,
    collector: Collector,
    _marker: PhantomData<*const T>,
}

// SAFETY: a `Weak<T>` only hands out `T` through `upgrade`, which requires the
// same bounds as sending an `Owning<T>`.
unsafe impl<T: Send + Sync> Send for Weak<T> {}

impl<T> From<&Owning<T>> for Weak<T> {
    /// Borrow the owner's cached record and epoch; the count is untouched.
    fn from(owner: &Owning<T>) -> Self {
        Self {
            object: owner.object,
            cache: owner.cache.snapshot(),
            collector: owner.collector.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Weak<T> {
    /// Identity of the observed object, or [`Identity::NULL`] for an empty handle.
    #[inline]
    pub fn identity(&self) -> Identity {
        self.object
            .map_or(Identity::NULL, |object| Identity::from_ptr(object.as_ptr()))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.object.is_none()
    }

    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.object
            .map_or(std::ptr::null(), |object| object.as_ptr() as *const T)
    }

    #[inline]
    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    /// The observed record, refreshing the epoch stamp when the cache is stale.
    ///
    /// A weak handle follows one record for its whole life. Once that record
    /// has been swept the address may already belong to another object, so
    /// the handle stays invalid instead of looking the address up again.
    fn observe(&self) -> Option<Ref<'_, HandleRef>> {
        if self.object.is_none() {
            return None;
        }
        let identity = self.identity();
        let shared = &self.collector.shared;
        if let Some(handle) = self.cache.fresh(shared, identity) {
            return Some(handle);
        }

        let epoch = shared.epoch.load(Ordering::Acquire);
        let cached = self.cache.cached().map(|handle| HandleRef::clone(&handle));
        let record = match cached {
            Some(handle) if handle.identity() == identity => handle,
            Some(_) => return None,
            None => shared.lookup(identity)?,
        };
        self.cache.store(Some(record), epoch);
        self.cache.cached()
    }

    /// The observed object is tracked and still has at least one owner.
    ///
    /// 被观察的对象仍被跟踪，且至少还有一个拥有者。
    pub fn is_valid(&self) -> bool {
        self.observe()
            .is_some_and(|handle| !handle.is_pending_to_kill())
    }

    /// Current reference count of the observed object, `0` once it is gone.
    pub fn use_count(&self) -> u32 {
        self.observe().map_or(0, |handle| handle.count())
    }

    /// Take a share of the observed object if it still has an owner.
    ///
    /// The count is only ever raised from a non-zero value, so an object
    /// waiting for the sweep is never brought back through a weak handle.
    ///
    /// 如果被观察对象仍有拥有者，则获取其一份引用。
    /// 计数只会从非零值增加，因此等待清扫的对象永远不会通过弱句柄复活。
    pub fn upgrade(&self) -> Option<Owning<T>> {
        let handle = HandleRef::clone(&*self.observe()?);
        if !handle.try_acquire() {
            return None;
        }

        Some(Owning::from_parts(
            self.object,
            HandleCache::new(Some(handle), self.cache.epoch()),
            self.collector.clone(),
        ))
    }

    /// Borrow the observed object.
    ///
    /// # Safety
    /// No sweep of this collector may reclaim the object while the reference
    /// is alive, i.e. some `Owning<T>` must keep it for that long.
    pub unsafe fn get(&self) -> Option<&T> {
        if !self.is_valid() {
            return None;
        }
        self.object.map(|object| unsafe { &*object.as_ptr() })
    }

    /// Observe the target of `owner` instead. The count is untouched.
    pub fn set(&mut self, owner: &Owning<T>) {
        if self.object == owner.object {
            return;
        }
        *self = Weak::from(owner);
    }

    /// Stop observing anything.
    pub fn reset(&mut self) {
        self.object = None;
        self.cache.clear();
    }
}

impl<T> Clone for Weak<T> {
    fn clone(&self) -> Self {
        Self {
            object: self.object,
            cache: self.cache.snapshot(),
            collector: self.collector.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for Weak<T> {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl<T> Eq for Weak<T> {}

impl<T> PartialEq<Owning<T>> for Weak<T> {
    fn eq(&self, other: &Owning<T>) -> bool {
        self.identity() == other.identity()
    }
}

impl<T> PartialOrd for Weak<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Weak<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.identity().cmp(&other.identity())
    }
}

impl<T> Hash for Weak<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl<T> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Weak").field(&self.identity()).finish()
    }
}
