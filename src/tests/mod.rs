use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

mod lifecycle_tests;

/// Value that counts how many times it has been dropped.
/// 记录自身被 drop 次数的值。
pub(crate) struct DropCounter {
    drops: Arc<AtomicUsize>,
    pub(crate) id: usize,
}

impl DropCounter {
    pub(crate) fn new(drops: &Arc<AtomicUsize>, id: usize) -> Self {
        Self {
            drops: Arc::clone(drops),
            id,
        }
    }
}

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Collector with a small table so tests stay cheap.
pub(crate) fn small_collector() -> crate::Collector {
    crate::Collector::builder().bucket_bits(8).build().unwrap()
}
