use crate::sync::{Arc, AtomicU32, AtomicUsize, Ordering};
use std::cmp::Ordering as CmpOrdering;
use std::fmt;

/// Stable identity of a tracked object: its address as a machine word.
///
/// The identity must not change for as long as the object is tracked, and the
/// null identity (`0`) is never a valid registration.
///
/// 被跟踪对象的稳定标识：其地址的机器字表示。
/// 在对象被跟踪期间，标识不能改变；空标识（`0`）永远不是有效的注册。
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Identity(usize);

impl Identity {
    /// The null identity. Liveness queries report `false` for it.
    pub const NULL: Identity = Identity(0);

    #[inline]
    pub const fn new(addr: usize) -> Self {
        Identity(addr)
    }

    /// Identity of the object behind `ptr`. Metadata of fat pointers is discarded.
    #[inline]
    pub fn from_ptr<T: ?Sized>(ptr: *const T) -> Self {
        Identity(ptr as *const () as usize)
    }

    #[inline]
    pub const fn addr(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({:#x})", self.0)
    }
}

impl From<usize> for Identity {
    #[inline]
    fn from(addr: usize) -> Self {
        Identity(addr)
    }
}

/// Type-erased destructor stored alongside a handle and invoked when the
/// sweep reclaims it.
///
/// 与句柄一起存储的类型擦除析构函数，在清扫回收该句柄时调用。
pub type Deleter = unsafe fn(Identity);

/// Deleter for objects allocated through `Box<T>`.
/// Converts the identity back to `Box<T>` and drops it.
///
/// 通过 `Box<T>` 分配的对象的析构函数。
/// 将标识转换回 `Box<T>` 并将其 drop。
#[inline(always)]
pub(crate) unsafe fn drop_boxed<T>(identity: Identity) {
    let ptr = identity.addr() as *mut T;
    unsafe {
        drop(Box::from_raw(ptr));
    }
}

/// Shared reference to a tracked [`Handle`].
///
/// Holding a `HandleRef` keeps the record alive in memory but never keeps the
/// object registered: once swept, the handle reports `is_valid() == false`.
pub type HandleRef = Arc<Handle>;

/// The record the collector keeps per tracked object.
///
/// A handle stores the object's identity, its reference count and an optional
/// deleter. Equality and ordering only look at the identity.
///
/// 回收器为每个被跟踪对象保存的记录。
/// 句柄存储对象的标识、引用计数和可选的析构函数。
/// 相等性和排序只比较标识。
pub struct Handle {
    /// Cleared to zero when the sweep reclaims the handle.
    /// 清扫回收该句柄时被清零。
    identity: AtomicUsize,
    count: AtomicU32,
    deleter: Option<Deleter>,
}

impl Handle {
    /// A new handle holding one reference.
    #[inline]
    pub(crate) fn new(identity: Identity, deleter: Option<Deleter>) -> Self {
        Self {
            identity: AtomicUsize::new(identity.addr()),
            count: AtomicU32::new(1),
            deleter,
        }
    }

    #[inline]
    pub fn identity(&self) -> Identity {
        Identity(self.identity.load(Ordering::Acquire))
    }

    /// Current reference count.
    #[inline]
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    /// The handle still represents an object, i.e. it has not been swept.
    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.identity().is_null()
    }

    /// The handle represents an object that no longer has any reference and
    /// waits for the next sweep.
    ///
    /// 句柄代表的对象已没有任何引用，正在等待下一次清扫。
    #[inline]
    pub fn is_pending_to_kill(&self) -> bool {
        self.count() == 0 && self.is_valid()
    }

    #[inline]
    pub fn is_unique(&self) -> bool {
        self.count() == 1
    }

    /// Add one reference, from any count.
    ///
    /// Going from zero back to one is a resurrection and is only allowed while
    /// the owning bucket is locked, so a concurrent sweep cannot reclaim the
    /// handle under our feet.
    #[inline]
    pub(crate) fn acquire(&self) {
        let previous = self.count.fetch_add(1, Ordering::Relaxed);
        debug_assert!(previous < u32::MAX, "reference count overflow");
    }

    /// Add one reference only if the object still has at least one.
    #[inline]
    pub(crate) fn try_acquire(&self) -> bool {
        self.count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |count| {
                (count > 0).then(|| count + 1)
            })
            .is_ok()
    }

    /// Drop one reference.
    ///
    /// Returns `None` when the count was already zero (no-op), otherwise
    /// whether this call brought the count to zero.
    ///
    /// 释放一个引用。
    /// 计数已经为零时返回 `None`（无操作），否则返回本次调用是否使计数归零。
    #[inline]
    pub(crate) fn release(&self) -> Option<bool> {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .ok()
            .map(|previous| previous == 1)
    }

    /// Detach the handle from its object and run the deleter.
    ///
    /// # Safety
    /// The handle must have been removed from its bucket while its count was
    /// zero, and the deleter must be sound for the stored identity.
    pub(crate) unsafe fn reclaim(&self) {
        let addr = self.identity.swap(0, Ordering::AcqRel);
        if addr == 0 {
            return;
        }
        if let Some(deleter) = self.deleter {
            unsafe {
                deleter(Identity(addr));
            }
        }
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Handle {}

impl PartialOrd for Handle {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Handle {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.identity().cmp(&other.identity())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("identity", &self.identity())
            .field("count", &self.count())
            .field("has_deleter", &self.deleter.is_some())
            .finish()
    }
}
