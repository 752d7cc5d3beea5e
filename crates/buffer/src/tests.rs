use std::sync::Arc;

use common::PageId;
use common::prelude::{BufferPoolConfig, ConfigValue, ConfigView};
use storage::{DiskManager, PAGE_SIZE};
use tempfile::tempdir;

use crate::{BufferPool, BufferPoolSharded, Pager};

fn config(pool_size: usize) -> BufferPoolConfig {
    let mut map = std::collections::HashMap::new();
    map.insert(
        "buffer_pool.pool_size".to_string(),
        ConfigValue::Int(pool_size as i64),
    );
    BufferPoolConfig::from_view(&ConfigView::new(map))
}

fn config_prefetch(pool_size: usize, enable_prefetch: bool) -> BufferPoolConfig {
    let mut map = std::collections::HashMap::new();
    map.insert(
        "buffer_pool.pool_size".to_string(),
        ConfigValue::Int(pool_size as i64),
    );
    map.insert(
        "buffer_pool.enable_prefetch".to_string(),
        ConfigValue::Bool(enable_prefetch),
    );
    BufferPoolConfig::from_view(&ConfigView::new(map))
}

fn pool(pool_size: usize) -> (tempfile::TempDir, BufferPool) {
    let dir = tempdir().unwrap();
    let disk = Arc::new(DiskManager::open(dir.path().join("test.db")).unwrap());
    (dir, BufferPool::new(disk, &config(pool_size)))
}

#[test]
fn scenario_basic_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");
    let disk = Arc::new(DiskManager::open(&path).unwrap());
    let bp = BufferPool::new(disk.clone(), &config(4));

    let (id, page) = bp.new_page().unwrap();
    assert_eq!(id, PageId(0));
    page.lock().write_data(0, &[0xAB; PAGE_SIZE]).unwrap();
    bp.unpin_page(id, true);
    bp.flush_all_pages();
    drop(bp);
    drop(disk);

    let disk2 = DiskManager::open(&path).unwrap();
    let mut out = [0u8; PAGE_SIZE];
    assert!(disk2.read_page(PageId(0), &mut out));
    assert!(out.iter().all(|&b| b == 0xAB));
}

#[test]
fn scenario_lru_eviction() {
    let (_dir, bp) = pool(3);
    let (p0, _) = bp.new_page().unwrap();
    bp.unpin_page(p0, false);
    let (p1, _) = bp.new_page().unwrap();
    bp.unpin_page(p1, false);
    let (p2, _) = bp.new_page().unwrap();
    bp.unpin_page(p2, false);
    // cache: [p2, p1, p0] MRU->LRU

    bp.fetch_page(p0).unwrap();
    bp.unpin_page(p0, false);
    // cache: [p0, p2, p1] MRU->LRU; p1 is now the LRU victim

    let (p4, _) = bp.new_page().unwrap();
    bp.unpin_page(p4, false);

    assert!(!bp.is_page_in_buffer(p1));
    assert!(bp.is_page_in_buffer(p0));
    assert!(bp.is_page_in_buffer(p2));
    assert!(bp.is_page_in_buffer(p4));
}

#[test]
fn scenario_pinned_page_not_evicted() {
    let (_dir, bp) = pool(2);
    let (p0, _) = bp.new_page().unwrap();
    let (p1, _) = bp.new_page().unwrap();
    assert!(bp.new_page().is_none(), "pool is full and both pins held");

    bp.unpin_page(p0, false);
    let (p2, _) = bp.new_page().unwrap();

    assert!(!bp.is_page_in_buffer(p0));
    assert!(bp.is_page_in_buffer(p1));
    assert!(bp.is_page_in_buffer(p2));
}

#[test]
fn scenario_dirty_eviction_writes_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");
    let disk = Arc::new(DiskManager::open(&path).unwrap());
    let bp = BufferPool::new(disk.clone(), &config(1));

    let page0 = bp.fetch_page(PageId(0)).unwrap();
    page0.lock().data[0] = 0x5A;
    drop(page0);
    bp.unpin_page(PageId(0), true);

    // forces eviction of page 0
    bp.fetch_page(PageId(1)).unwrap();
    drop(bp);
    drop(disk);

    let disk2 = DiskManager::open(&path).unwrap();
    let mut out = [0u8; PAGE_SIZE];
    assert!(disk2.read_page(PageId(0), &mut out));
    assert_eq!(out[0], 0x5A);
}

#[test]
fn scenario_delete_pinned_page_fails() {
    let (_dir, bp) = pool(4);
    let page = bp.fetch_page(PageId(0)).unwrap();
    assert!(!bp.delete_page(PageId(0)));
    drop(page);
    bp.unpin_page(PageId(0), false);
    assert!(bp.delete_page(PageId(0)));
}

#[test]
fn p1_page_identity() {
    let (_dir, bp) = pool(4);
    let page = bp.fetch_page(PageId(7)).unwrap();
    assert_eq!(page.lock().id, PageId(7));
}

#[test]
fn p3_pin_safety() {
    let (_dir, bp) = pool(1);
    let _pinned = bp.fetch_page(PageId(0)).unwrap();
    // still pinned: a second page can't evict it
    assert!(bp.fetch_page(PageId(1)).is_none());
    bp.unpin_page(PageId(0), false);
    assert!(bp.fetch_page(PageId(1)).is_some());
}

#[test]
fn p5_lru_order_after_access_pattern() {
    let (_dir, bp) = pool(3);
    for i in 0..3 {
        let (id, _) = bp.new_page().unwrap();
        bp.unpin_page(id, false);
        assert_eq!(id, PageId(i));
    }
    // access a, b, c, a -> MRU order becomes [a, c, b]
    bp.fetch_page(PageId(0)).unwrap();
    bp.unpin_page(PageId(0), false);
    bp.fetch_page(PageId(1)).unwrap();
    bp.unpin_page(PageId(1), false);
    bp.fetch_page(PageId(2)).unwrap();
    bp.unpin_page(PageId(2), false);
    bp.fetch_page(PageId(0)).unwrap();
    bp.unpin_page(PageId(0), false);

    // the next eviction should claim page 1 (now the tail)
    let (_new_id, _) = bp.new_page().unwrap();
    assert!(!bp.is_page_in_buffer(PageId(1)));
    assert!(bp.is_page_in_buffer(PageId(0)));
    assert!(bp.is_page_in_buffer(PageId(2)));
}

#[test]
fn p6_used_pages_never_exceeds_capacity() {
    let (_dir, bp) = pool(2);
    for i in 0..10 {
        let (id, _) = bp.new_page().unwrap();
        bp.unpin_page(id, i % 2 == 0);
        assert!(bp.used_pages() <= 2);
    }
}

#[test]
fn simulated_flush_failure_leaves_page_dirty() {
    let (_dir, bp) = pool(1);
    let page0 = bp.fetch_page(PageId(0)).unwrap();
    page0.lock().data[0] = 9;
    drop(page0);
    bp.unpin_page(PageId(0), true);

    bp.set_simulate_flush_failure(true);
    assert!(!bp.flush_page(PageId(0)));
}

#[test]
fn metrics_track_hits_and_misses() {
    let (_dir, bp) = pool(4);
    bp.fetch_page(PageId(0)).unwrap();
    bp.unpin_page(PageId(0), false);
    bp.fetch_page(PageId(0)).unwrap();
    bp.unpin_page(PageId(0), false);

    let metrics = bp.metrics();
    assert_eq!(metrics.total_requests, 2);
    assert_eq!(metrics.cache_hits, 1);
    assert!(metrics.hit_rate() > 0.0);
}

#[test]
fn resize_shrinks_by_evicting_unpinned_pages() {
    let (_dir, bp) = pool(4);
    for i in 0..4 {
        let (id, _) = bp.new_page().unwrap();
        bp.unpin_page(id, i % 2 == 1);
    }
    assert_eq!(bp.used_pages(), 4);
    bp.resize(2);
    assert!(bp.used_pages() <= 2);
}

#[test]
fn prefetch_is_gated_by_enable_prefetch() {
    let dir = tempdir().unwrap();
    let disk = Arc::new(DiskManager::open(dir.path().join("test.db")).unwrap());
    let bp = BufferPool::new(disk.clone(), &config_prefetch(4, true));
    let (id, _) = bp.new_page().unwrap();
    bp.unpin_page(id, true);
    bp.flush_all_pages();
    assert!(bp.prefetch_page(id));
    assert!(bp.batch_prefetch_pages(&[id]));

    let disabled = BufferPool::new(disk, &config_prefetch(4, false));
    assert!(!disabled.prefetch_page(id));
    assert!(!disabled.batch_prefetch_pages(&[id]));
}

#[test]
fn sharded_prefetch_is_gated_by_enable_prefetch() {
    let dir = tempdir().unwrap();
    let disk = Arc::new(DiskManager::open(dir.path().join("test.db")).unwrap());
    let bp = BufferPoolSharded::new(disk.clone(), &config_prefetch(4, true), 2);
    let (id, _) = bp.new_page().unwrap();
    bp.unpin_page(id, true);
    bp.flush_all_pages();
    assert!(bp.prefetch_page(id));

    let disabled = BufferPoolSharded::new(disk, &config_prefetch(4, false), 2);
    assert!(!disabled.prefetch_page(id));
}

#[test]
fn p10_sharded_equivalence_single_threaded() {
    let dir_a = tempdir().unwrap();
    let dir_b = tempdir().unwrap();
    let disk_a = Arc::new(DiskManager::open(dir_a.path().join("a.db")).unwrap());
    let disk_b = Arc::new(DiskManager::open(dir_b.path().join("b.db")).unwrap());
    let plain = BufferPool::new(disk_a.clone(), &config(8));
    let sharded = BufferPoolSharded::new(disk_b.clone(), &config(8), 4);

    for i in 0..8 {
        let (id_a, page_a) = plain.new_page().unwrap();
        let (id_b, page_b) = sharded.new_page().unwrap();
        assert_eq!(id_a, id_b);
        page_a.lock().write_data(0, &[i as u8; 4]).unwrap();
        page_b.lock().write_data(0, &[i as u8; 4]).unwrap();
        plain.unpin_page(id_a, true);
        sharded.unpin_page(id_b, true);
    }
    plain.flush_all_pages();
    sharded.flush_all_pages();

    for i in 0..8 {
        let mut out_a = [0u8; PAGE_SIZE];
        let mut out_b = [0u8; PAGE_SIZE];
        assert!(disk_a.read_page(PageId(i), &mut out_a));
        assert!(disk_b.read_page(PageId(i), &mut out_b));
        assert_eq!(out_a, out_b);
    }
}
