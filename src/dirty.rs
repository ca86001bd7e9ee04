use crate::error::CollectorError;
use crate::sync::{AtomicU64, Mutex, Ordering};
use std::vec::Vec;

const WORD_BITS: usize = u64::BITS as usize;

/// Records which buckets hold at least one zero-count handle.
///
/// A bitmask gives O(1) idempotent membership tests and the worklist gives the
/// sweep the exact set of buckets to visit, so a table with millions of
/// buckets is never scanned in full.
///
/// 记录哪些桶中至少有一个计数为零的句柄。
/// 位掩码提供 O(1) 的幂等成员测试，工作列表为清扫提供需要访问的精确桶集合，
/// 因此拥有数百万个桶的表永远不会被整体扫描。
pub(crate) struct DirtyShards {
    mask: Box<[AtomicU64]>,
    worklist: Mutex<Vec<usize>>,
}

impl DirtyShards {
    pub(crate) fn with_buckets(bucket_count: usize) -> Result<Self, CollectorError> {
        let words = bucket_count.div_ceil(WORD_BITS);
        let mut mask = Vec::new();
        mask.try_reserve_exact(words)
            .map_err(|source| CollectorError::TableAllocation {
                buckets: bucket_count,
                source,
            })?;
        mask.extend((0..words).map(|_| AtomicU64::new(0)));

        Ok(Self {
            mask: mask.into_boxed_slice(),
            worklist: Mutex::new(Vec::new()),
        })
    }

    #[inline]
    fn locate(index: usize) -> (usize, u64) {
        (index / WORD_BITS, 1u64 << (index % WORD_BITS))
    }

    /// Mark `index` dirty.
    ///
    /// Returns `true` only on the clean-to-dirty transition, which is also the
    /// only time the index is appended to the worklist.
    ///
    /// 将 `index` 标记为脏。
    /// 仅在从干净到脏的转换时返回 `true`，这也是索引被追加到工作列表的唯一时机。
    pub(crate) fn mark_dirty(&self, index: usize) -> bool {
        let (word, bit) = Self::locate(index);
        let previous = self.mask[word].fetch_or(bit, Ordering::AcqRel);
        if previous & bit != 0 {
            return false;
        }
        self.worklist.lock().push(index);
        true
    }

    #[inline]
    pub(crate) fn is_dirty(&self, index: usize) -> bool {
        let (word, bit) = Self::locate(index);
        self.mask[word].load(Ordering::Acquire) & bit != 0
    }

    /// Clear the bit of one bucket. The sweep calls this while it holds the
    /// bucket, before looking at its handles.
    #[inline]
    pub(crate) fn clear(&self, index: usize) {
        let (word, bit) = Self::locate(index);
        self.mask[word].fetch_and(!bit, Ordering::AcqRel);
    }

    /// Detach the current worklist.
    ///
    /// Buckets that go dirty after this call land in a fresh worklist and are
    /// picked up by the next sweep.
    pub(crate) fn take_worklist(&self) -> Vec<usize> {
        std::mem::take(&mut *self.worklist.lock())
    }

    /// Reset the bitmask and empty the worklist.
    pub(crate) fn clear_all(&self) {
        let mut worklist = self.worklist.lock();
        for word in self.mask.iter() {
            word.store(0, Ordering::Release);
        }
        worklist.clear();
    }

    /// Number of buckets waiting for a sweep.
    #[inline]
    pub(crate) fn dirty_count(&self) -> usize {
        self.worklist.lock().len()
    }
}

impl std::fmt::Debug for DirtyShards {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirtyShards")
            .field("buckets", &(self.mask.len() * WORD_BITS))
            .field("dirty", &self.dirty_count())
            .finish()
    }
}
