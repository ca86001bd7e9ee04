/// 生命周期测试模块
/// 测试 Owning 与 Weak 句柄的所有权、失效、升级和级联释放
use super::{DropCounter, small_collector};
use crate::{Collector, Identity, Owning, Weak};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 测试1: 新建的拥有型句柄持有一份计数
#[test]
fn test_owning_new_holds_one_share() {
    let collector = small_collector();
    let owner = Owning::new(&collector, 42u64);

    assert!(!owner.is_empty());
    assert!(owner.is_valid());
    assert_eq!(owner.use_count(), 1);
    assert_eq!(*owner, 42);
    assert_eq!(owner.get(), Some(&42));
    assert_eq!(collector.total_tracked_count(), 1);
    assert!(collector.is_tracked_and_alive(owner.identity()));
    assert!(owner.handle().unwrap().is_unique());
}

/// 测试2: 克隆增加计数，全部 drop 后清扫回收对象
#[test]
fn test_clone_and_drop_reclaims_once() {
    let collector = small_collector();
    let drops = Arc::new(AtomicUsize::new(0));

    let first = Owning::new(&collector, DropCounter::new(&drops, 1));
    let second = first.clone();
    assert_eq!(first.use_count(), 2);
    assert!(first.ptr_eq(&second));
    assert_eq!(second.id, 1);

    drop(first);
    assert_eq!(second.use_count(), 1);
    drop(second);

    // 计数归零但对象直到清扫才被释放
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    assert_eq!(collector.total_tracked_count(), 1);

    let stats = collector.sweep();
    assert_eq!(stats.reclaimed, 1);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert_eq!(collector.total_tracked_count(), 0);
}

/// 测试3: 最后一个拥有者离开后弱句柄立即失效，早于清扫
#[test]
fn test_weak_invalid_before_sweep() {
    let collector = small_collector();
    let drops = Arc::new(AtomicUsize::new(0));

    let owner = Owning::new(&collector, DropCounter::new(&drops, 7));
    let weak = owner.downgrade();
    assert!(weak.is_valid());
    assert_eq!(weak.use_count(), 1);

    drop(owner);
    assert!(!weak.is_valid());
    assert_eq!(weak.use_count(), 0);
    assert!(weak.upgrade().is_none());
    // 对象还未被释放
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    collector.sweep();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert!(!weak.is_valid());
    assert!(weak.upgrade().is_none());
    assert_eq!(weak.use_count(), 0);
}

/// 测试4: 对象存活时弱句柄可以升级
#[test]
fn test_weak_upgrade_while_alive() {
    let collector = small_collector();
    let owner = Owning::new(&collector, String::from("node"));
    let weak = owner.downgrade();

    let upgraded = weak.upgrade().unwrap();
    assert_eq!(upgraded.as_str(), "node");
    assert_eq!(owner.use_count(), 2);
    assert!(upgraded.ptr_eq(&owner));

    drop(owner);
    // 升级得到的句柄仍让对象存活
    assert!(weak.is_valid());
    drop(upgraded);
    assert!(!weak.is_valid());
}

/// 测试5: 清扫推进纪元后句柄仍然有效
#[test]
fn test_handles_survive_unrelated_sweeps() {
    let collector = small_collector();
    let keep = Owning::new(&collector, 1u32);
    let weak = keep.downgrade();

    for round in 0..3u32 {
        drop(Owning::new(&collector, round));
        collector.sweep();
        assert!(keep.is_valid());
        assert!(weak.is_valid());
        assert_eq!(keep.use_count(), 1);
    }
    assert_eq!(collector.current_epoch(), 3);

    // 缓存过期时克隆经由注册表
    drop(Owning::new(&collector, 9u32));
    collector.sweep();
    let copy = keep.clone();
    assert_eq!(copy.use_count(), 2);
    assert!(Arc::ptr_eq(&copy.handle().unwrap(), &keep.handle().unwrap()));
}

/// 测试6: take 转移份额而不改变计数
#[test]
fn test_take_moves_share() {
    let collector = small_collector();
    let mut source = Owning::new(&collector, 5i64);
    let identity = source.identity();

    let moved = source.take();
    assert!(source.is_empty());
    assert_eq!(source.identity(), Identity::NULL);
    assert_eq!(moved.identity(), identity);
    assert_eq!(moved.use_count(), 1);

    drop(source);
    assert!(moved.is_valid());
}

/// 测试7: set 释放旧目标并获取新目标的一份
#[test]
fn test_set_switches_target() {
    let collector = small_collector();
    let drops = Arc::new(AtomicUsize::new(0));

    let mut target = Owning::new(&collector, DropCounter::new(&drops, 1));
    let other = Owning::new(&collector, DropCounter::new(&drops, 2));
    let old = target.downgrade();

    target.set(&other);
    assert_eq!(target.id, 2);
    assert_eq!(other.use_count(), 2);
    assert!(!old.is_valid());

    // 指向同一对象时 set 是无操作
    target.set(&other);
    assert_eq!(other.use_count(), 2);

    assert_eq!(collector.sweep().reclaimed, 1);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

/// 测试8: 空句柄的查询
#[test]
fn test_empty_owning() {
    let collector = small_collector();
    let mut empty: Owning<u8> = Owning::empty(&collector);

    assert!(empty.is_empty());
    assert!(!empty.is_valid());
    assert_eq!(empty.use_count(), 0);
    assert_eq!(empty.identity(), Identity::NULL);
    assert!(empty.as_ptr().is_null());
    assert!(empty.get().is_none());
    assert!(empty.handle().is_none());

    empty.reset();
    let copy = empty.clone();
    assert!(copy.is_empty());
    assert!(!empty.downgrade().is_valid());
    assert_eq!(collector.total_tracked_count(), 0);
}

/// 测试9: 解引用空句柄会 panic
#[test]
#[should_panic(expected = "empty Owning")]
fn test_deref_empty_panics() {
    let collector = small_collector();
    let empty: Owning<u8> = Owning::empty(&collector);
    let _value: u8 = *empty;
}

/// 测试10: reset 归还份额，重复 reset 无操作
#[test]
fn test_reset_twice() {
    let collector = small_collector();
    let mut owner = Owning::new(&collector, 3u16);
    let keep = owner.clone();

    owner.reset();
    assert!(owner.is_empty());
    assert_eq!(keep.use_count(), 1);

    owner.reset();
    assert_eq!(keep.use_count(), 1);
}

/// 测试11: 相等、排序和哈希都按标识比较
#[test]
fn test_identity_comparisons() {
    let collector = small_collector();
    let a = Owning::new(&collector, 1u32);
    let b = Owning::new(&collector, 1u32);
    let a_copy = a.clone();
    let a_weak = a.downgrade();

    assert_eq!(a, a_copy);
    assert_ne!(a, b);
    assert!(a == a_weak);
    assert!(a_weak == a);
    assert!(a_weak != b);
    assert_eq!(a.cmp(&b), a.identity().cmp(&b.identity()));
    assert_eq!(a_weak.cmp(&b.downgrade()), a.identity().cmp(&b.identity()));

    let set: HashSet<Owning<u32>> = [a.clone(), a_copy.clone(), b.clone()].into_iter().collect();
    assert_eq!(set.len(), 2);
    let weak_set: HashSet<Weak<u32>> = [a_weak.clone(), b.downgrade()].into_iter().collect();
    assert_eq!(weak_set.len(), 2);
}

/// 测试12: 从 Box 原始指针接管
#[test]
fn test_from_raw() {
    let collector = small_collector();
    let drops = Arc::new(AtomicUsize::new(0));
    let ptr = Box::into_raw(Box::new(DropCounter::new(&drops, 9)));

    let first = unsafe { Owning::from_raw(&collector, ptr, true) };
    let second = unsafe { Owning::from_raw(&collector, ptr, false) };
    assert_eq!(first.use_count(), 2);
    assert_eq!(first.as_ptr(), ptr as *const DropCounter);
    assert_eq!(collector.total_tracked_count(), 1);

    let null = unsafe { Owning::<DropCounter>::from_raw(&collector, std::ptr::null_mut(), true) };
    assert!(null.is_empty());

    drop(first);
    drop(second);
    collector.sweep();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

/// 测试13: 弱句柄的 get、set 和 reset
#[test]
fn test_weak_get_set_reset() {
    let collector = small_collector();
    let a = Owning::new(&collector, 10u32);
    let b = Owning::new(&collector, 20u32);
    let mut weak = a.downgrade();

    assert_eq!(unsafe { weak.get() }, Some(&10));
    weak.set(&b);
    assert_eq!(weak, b);
    assert_eq!(unsafe { weak.get() }, Some(&20));

    weak.reset();
    assert!(weak.is_empty());
    assert!(!weak.is_valid());
    assert!(unsafe { weak.get() }.is_none());
    assert!(weak.upgrade().is_none());
    // 弱句柄从不改变计数
    assert_eq!(a.use_count(), 1);
    assert_eq!(b.use_count(), 1);
}

/// 测试14: 已清扫的弱句柄保持无效
#[test]
fn test_weak_stays_invalid_after_sweep() {
    let collector = small_collector();
    let owner = Owning::new(&collector, [0u8; 32]);
    let weak = owner.downgrade();
    let copy = weak.clone();

    drop(owner);
    collector.sweep();

    // 该地址可能已被新对象占用
    let _reuse: Vec<_> = (0..8).map(|_| Owning::new(&collector, [1u8; 32])).collect();
    assert!(!weak.is_valid());
    assert!(!copy.is_valid());
    assert!(weak.upgrade().is_none());
}

struct Node {
    child: Option<Owning<DropCounter>>,
    _marker: DropCounter,
}

/// 测试15: 析构函数中的级联释放由下一次清扫回收
#[test]
fn test_cascading_release() {
    let collector = small_collector();
    let drops = Arc::new(AtomicUsize::new(0));

    let child = Owning::new(&collector, DropCounter::new(&drops, 2));
    let child_weak = child.downgrade();
    let parent = Owning::new(
        &collector,
        Node {
            child: Some(child),
            _marker: DropCounter::new(&drops, 1),
        },
    );
    assert_eq!(parent.child.as_ref().map(|child| child.id), Some(2));

    drop(parent);
    let stats = collector.sweep();
    assert_eq!(stats.reclaimed, 1);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert!(!child_weak.is_valid());
    assert_eq!(collector.dirty_bucket_count(), 1);

    let stats = collector.sweep();
    assert_eq!(stats.reclaimed, 1);
    assert_eq!(drops.load(Ordering::SeqCst), 2);
    assert_eq!(collector.total_tracked_count(), 0);
}

/// 测试16: 回收器被 drop 时回收仍待处理的对象
#[test]
fn test_final_sweep_on_collector_drop() {
    let drops = Arc::new(AtomicUsize::new(0));
    {
        let collector = small_collector();
        let keep = Owning::new(&collector, DropCounter::new(&drops, 1));
        drop(Owning::new(&collector, DropCounter::new(&drops, 2)));
        drop(keep);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
    }
    assert_eq!(drops.load(Ordering::SeqCst), 2);
}

/// 测试17: 拥有型句柄让回收器保持存活
#[test]
fn test_owning_keeps_collector_alive() {
    let drops = Arc::new(AtomicUsize::new(0));
    let owner = {
        let collector: Collector = small_collector();
        Owning::new(&collector, DropCounter::new(&drops, 1))
    };
    assert!(owner.is_valid());
    assert_eq!(owner.collector().total_tracked_count(), 1);

    drop(owner);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

/// 测试18: 份额被原始接口夺走并清扫后 get_checked 返回 None
#[test]
fn test_get_checked_after_raw_release() {
    let collector = small_collector();
    let drops = Arc::new(AtomicUsize::new(0));
    let owner = Owning::new(&collector, DropCounter::new(&drops, 4));
    assert_eq!(owner.get_checked().map(|value| value.id), Some(4));

    unsafe { collector.unregister(owner.identity()) };
    collector.sweep();
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    assert!(!owner.is_valid());
    assert!(owner.get_checked().is_none());
    // 释放已不存在的记录是无操作
    drop(owner);
    assert_eq!(collector.total_tracked_count(), 0);
    assert_eq!(collector.dirty_bucket_count(), 0);

    let empty: Owning<u8> = Owning::empty(&collector);
    assert!(empty.get_checked().is_none());
}
