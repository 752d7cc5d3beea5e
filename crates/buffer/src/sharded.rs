use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use common::{PageId, prelude::BufferPoolConfig};
use lru::LruCache;
use parking_lot::Mutex;
use storage::{DiskManager, PAGE_SIZE, Page};

use crate::cache::{CachedPage, find_victim};
use crate::{AtomicMetrics, BufferPoolMetrics, Pager, WalDurability};

struct Shard {
    table: Mutex<LruCache<PageId, CachedPage>>,
}

/// `N = 2^k` independently-locked partitions of the same page cache.
///
/// A page always lives in shard `id & (N-1)`, so there is no cross-shard
/// coordination and no global LRU order — only per-shard exact LRU. This
/// trades the monolithic pool's single global ordering for lock-free
/// inter-shard concurrency; per [`Pager::metrics`] the counters are summed
/// across shards with plain atomics (no shard-wide latch to protect them).
pub struct BufferPoolSharded {
    shards: Vec<Shard>,
    mask: usize,
    disk: Arc<DiskManager>,
    wal: Option<Arc<dyn WalDurability>>,
    metrics: AtomicMetrics,
    simulate_flush_failure: AtomicBool,
    enable_prefetch: bool,
}

impl BufferPoolSharded {
    /// `shard_count` is rounded up to the next power of two.
    pub fn new(disk: Arc<DiskManager>, config: &BufferPoolConfig, shard_count: usize) -> Self {
        let shard_count = shard_count.max(1).next_power_of_two();
        let per_shard_capacity =
            NonZeroUsize::new((config.pool_size / shard_count).max(1)).unwrap();
        let shards = (0..shard_count)
            .map(|_| Shard {
                table: Mutex::new(LruCache::new(per_shard_capacity)),
            })
            .collect();
        Self {
            shards,
            mask: shard_count - 1,
            disk,
            wal: None,
            metrics: AtomicMetrics::default(),
            simulate_flush_failure: AtomicBool::new(false),
            enable_prefetch: config.enable_prefetch,
        }
    }

    pub fn with_wal_durability(mut self, wal: Arc<dyn WalDurability>) -> Self {
        self.wal = Some(wal);
        self
    }

    pub fn set_simulate_flush_failure(&self, simulate: bool) {
        self.simulate_flush_failure.store(simulate, Ordering::Relaxed);
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard_for(&self, id: PageId) -> &Shard {
        &self.shards[id.0 as usize & self.mask]
    }

    fn write_back(&self, id: PageId, page: &Arc<Mutex<Page>>) -> bool {
        if self.simulate_flush_failure.load(Ordering::Relaxed) {
            return false;
        }
        if let Some(wal) = &self.wal
            && !wal.force_flush()
        {
            log::warn!("write_back: WAL force_flush failed before writing page {id}");
            return false;
        }
        let mut buf = [0u8; PAGE_SIZE];
        {
            let guard = page.lock();
            buf.copy_from_slice(&guard.data);
        }
        self.disk.write_page(id, &buf)
    }

    fn make_room(&self, shard: &mut LruCache<PageId, CachedPage>) -> bool {
        if shard.len() < shard.cap().get() {
            return true;
        }
        let Some(victim) = find_victim(shard) else {
            return false;
        };
        let cached = shard.peek(&victim).expect("victim came from this shard");
        if cached.dirty {
            let page_arc = cached.page.clone();
            // No cross-shard latch to release here; the writeback still
            // happens outside the shard's own lock via a plain function
            // call, since `write_back` touches the disk manager and WAL,
            // neither of which this shard's mutex protects.
            self.write_back(victim, &page_arc);
        }
        shard.pop(&victim);
        self.metrics.record_eviction();
        true
    }
}

impl Pager for BufferPoolSharded {
    fn fetch_page(&self, id: PageId) -> Option<Arc<Mutex<Page>>> {
        if !id.is_valid() {
            return None;
        }
        let shard_mutex = &self.shard_for(id).table;

        {
            let mut shard = shard_mutex.lock();
            if let Some(cached) = shard.get_mut(&id) {
                cached.pin_count += 1;
                self.metrics.record_request(true);
                return Some(cached.page.clone());
            }
        }

        let mut buf = [0u8; PAGE_SIZE];
        if !self.disk.read_page(id, &mut buf) {
            self.metrics.record_request(false);
            return None;
        }

        let mut shard = shard_mutex.lock();
        if let Some(cached) = shard.get_mut(&id) {
            cached.pin_count += 1;
            self.metrics.record_request(true);
            return Some(cached.page.clone());
        }
        if !self.make_room(&mut shard) {
            self.metrics.record_request(false);
            return None;
        }
        let page = Page {
            id,
            data: buf.to_vec(),
        };
        let cached = CachedPage::fresh(page, false);
        let handle = cached.page.clone();
        shard.push(id, cached);
        self.metrics.record_request(false);
        Some(handle)
    }

    fn new_page(&self) -> Option<(PageId, Arc<Mutex<Page>>)> {
        let id = self.disk.allocate_page();
        let mut shard = self.shard_for(id).table.lock();
        if !self.make_room(&mut shard) {
            drop(shard);
            self.disk.deallocate_page(id);
            return None;
        }
        let page = Page::with_id(id);
        let cached = CachedPage::fresh(page, true);
        let handle = cached.page.clone();
        shard.push(id, cached);
        Some((id, handle))
    }

    fn unpin_page(&self, id: PageId, dirty: bool) -> bool {
        let mut shard = self.shard_for(id).table.lock();
        match shard.peek_mut(&id) {
            Some(cached) => {
                cached.pin_count = cached.pin_count.saturating_sub(1);
                cached.dirty |= dirty;
                true
            }
            None => false,
        }
    }

    fn flush_page(&self, id: PageId) -> bool {
        let shard_mutex = &self.shard_for(id).table;
        let mut shard = shard_mutex.lock();
        let Some(cached) = shard.peek(&id) else {
            return false;
        };
        if !cached.dirty {
            return true;
        }
        let page_arc = cached.page.clone();
        drop(shard);

        let ok = self.write_back(id, &page_arc);

        let mut shard = shard_mutex.lock();
        if ok && let Some(cached) = shard.peek_mut(&id) {
            cached.dirty = false;
        }
        ok
    }

    fn flush_all_pages(&self) {
        for shard in &self.shards {
            let dirty_ids: Vec<PageId> = {
                let guard = shard.table.lock();
                guard
                    .iter()
                    .filter(|(_, cached)| cached.dirty)
                    .map(|(id, _)| *id)
                    .collect()
            };
            for id in dirty_ids {
                if !self.flush_page(id) {
                    log::warn!("flush_all_pages: failed to flush page {id}, left dirty");
                }
            }
        }
    }

    fn delete_page(&self, id: PageId) -> bool {
        let shard_mutex = &self.shard_for(id).table;
        let mut shard = shard_mutex.lock();
        let Some(cached) = shard.peek(&id) else {
            return false;
        };
        if cached.pin_count != 0 {
            return false;
        }
        if cached.dirty {
            let page_arc = cached.page.clone();
            drop(shard);
            self.write_back(id, &page_arc);
            shard = shard_mutex.lock();
        }
        shard.pop(&id);
        drop(shard);
        self.disk.deallocate_page(id)
    }

    fn resize(&self, new_capacity: usize) {
        let per_shard = (new_capacity / self.shards.len()).max(1);
        for shard in &self.shards {
            let mut guard = shard.table.lock();
            while guard.len() > per_shard {
                let Some(victim) = find_victim(&guard) else {
                    log::warn!(
                        "resize: shard cannot shrink to {per_shard}, all remaining pages pinned"
                    );
                    break;
                };
                let cached = guard.peek(&victim).unwrap();
                if cached.dirty {
                    let page_arc = cached.page.clone();
                    drop(guard);
                    self.write_back(victim, &page_arc);
                    guard = shard.table.lock();
                }
                guard.pop(&victim);
                self.metrics.record_eviction();
            }
            guard.resize(NonZeroUsize::new(per_shard).unwrap());
        }
    }

    fn prefetch_page(&self, id: PageId) -> bool {
        if !self.enable_prefetch {
            return false;
        }
        self.disk.prefetch_page(id)
    }

    fn batch_prefetch_pages(&self, ids: &[PageId]) -> bool {
        if !self.enable_prefetch {
            return false;
        }
        self.disk.batch_prefetch_pages(ids)
    }

    fn is_page_in_buffer(&self, id: PageId) -> bool {
        if !id.is_valid() {
            return false;
        }
        self.shard_for(id).table.lock().contains(&id)
    }

    fn used_pages(&self) -> usize {
        self.shards.iter().map(|s| s.table.lock().len()).sum()
    }

    fn metrics(&self) -> BufferPoolMetrics {
        self.metrics.snapshot()
    }
}
