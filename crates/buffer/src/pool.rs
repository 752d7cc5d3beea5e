use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::{PageId, prelude::BufferPoolConfig};
use lru::LruCache;
use parking_lot::Mutex;
use storage::{DiskManager, PAGE_SIZE, Page};

use crate::cache::{CachedPage, find_victim};
use crate::{AtomicMetrics, BufferPoolMetrics, Pager, WalDurability};

struct Inner {
    table: LruCache<PageId, CachedPage>,
}

/// Exact-LRU page cache over a single `DiskManager`, guarded by one latch.
///
/// The latch is acquired with a timeout on every path that can touch disk;
/// see the module-level notes in the crate root for the release-I/O-reacquire
/// discipline every miss path follows.
pub struct BufferPool {
    inner: Mutex<Inner>,
    disk: Arc<DiskManager>,
    wal: Option<Arc<dyn WalDurability>>,
    metrics: AtomicMetrics,
    read_timeout: Duration,
    write_timeout: Duration,
    default_timeout: Duration,
    simulate_flush_failure: AtomicBool,
    enable_prefetch: bool,
}

impl BufferPool {
    pub fn new(disk: Arc<DiskManager>, config: &BufferPoolConfig) -> Self {
        let capacity = NonZeroUsize::new(config.pool_size.max(1)).unwrap();
        Self {
            inner: Mutex::new(Inner {
                table: LruCache::new(capacity),
            }),
            disk,
            wal: None,
            metrics: AtomicMetrics::default(),
            read_timeout: config.read_lock_timeout,
            write_timeout: config.write_lock_timeout,
            default_timeout: config.default_lock_timeout,
            simulate_flush_failure: AtomicBool::new(false),
            enable_prefetch: config.enable_prefetch,
        }
    }

    /// Wire a durability handle so dirty writeback consults WAL flush state
    /// first (the one hard cross-component contract between the two).
    pub fn with_wal_durability(mut self, wal: Arc<dyn WalDurability>) -> Self {
        self.wal = Some(wal);
        self
    }

    pub fn set_simulate_flush_failure(&self, simulate: bool) {
        self.simulate_flush_failure.store(simulate, Ordering::Relaxed);
    }

    fn lock_with(&self, timeout: Duration) -> Option<parking_lot::MutexGuard<'_, Inner>> {
        match self.inner.try_lock_for(timeout) {
            Some(g) => Some(g),
            None => {
                log::warn!("buffer pool latch timed out after {timeout:?}");
                None
            }
        }
    }

    /// Write a cached page's current bytes to disk, honoring the WAL rule
    /// and the `simulate_flush_failure` test hook. Never panics; failures
    /// are reported via the bool return and logged by the caller.
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

    /// Find room for a new entry, evicting the LRU-tail unpinned victim if
    /// the table is already at capacity. Returns `true` if there is now
    /// room (possibly because there already was), `false` on exhaustion.
    ///
    /// Follows the release-I/O-reacquire pattern: if the victim is dirty,
    /// the latch is dropped for the writeback and the victim's continued
    /// eligibility is re-checked before it's actually removed.
    fn make_room(&self, guard: &mut parking_lot::MutexGuard<'_, Inner>) -> bool {
        if guard.table.len() < guard.table.cap().get() {
            return true;
        }
        let Some(victim) = find_victim(&guard.table) else {
            return false;
        };
        let cached = guard.table.peek(&victim).expect("victim came from this table");
        if !cached.dirty {
            guard.table.pop(&victim);
            self.metrics.record_eviction();
            return true;
        }

        let page_arc = cached.page.clone();
        parking_lot::MutexGuard::unlocked(guard, || {
            self.write_back(victim, &page_arc);
        });

        // Revalidate: the victim may have been re-pinned or re-dirtied by
        // another thread while the latch was released.
        match guard.table.peek(&victim) {
            Some(still) if still.pin_count == 0 => {
                guard.table.pop(&victim);
                self.metrics.record_eviction();
                true
            }
            Some(_) => false,
            None => true,
        }
    }
}

impl Pager for BufferPool {
    fn fetch_page(&self, id: PageId) -> Option<Arc<Mutex<Page>>> {
        if !id.is_valid() {
            return None;
        }

        {
            let mut guard = self.lock_with(self.read_timeout)?;
            if let Some(cached) = guard.table.get_mut(&id) {
                cached.pin_count += 1;
                self.metrics.record_request(true);
                return Some(cached.page.clone());
            }
        }

        let mut guard = self.lock_with(self.write_timeout)?;
        if let Some(cached) = guard.table.get_mut(&id) {
            cached.pin_count += 1;
            self.metrics.record_request(true);
            return Some(cached.page.clone());
        }
        if !self.make_room(&mut guard) {
            self.metrics.record_request(false);
            return None;
        }
        drop(guard);

        let mut buf = [0u8; PAGE_SIZE];
        if !self.disk.read_page(id, &mut buf) {
            self.metrics.record_request(false);
            return None;
        }

        let mut guard = self.lock_with(self.write_timeout)?;
        if let Some(cached) = guard.table.get_mut(&id) {
            // Someone else loaded it while we were reading from disk.
            cached.pin_count += 1;
            self.metrics.record_request(true);
            return Some(cached.page.clone());
        }
        if !self.make_room(&mut guard) {
            self.metrics.record_request(false);
            return None;
        }
        let page = Page {
            id,
            data: buf.to_vec(),
        };
        let cached = CachedPage::fresh(page, false);
        let handle = cached.page.clone();
        guard.table.push(id, cached);
        self.metrics.record_request(false);
        Some(handle)
    }

    fn new_page(&self) -> Option<(PageId, Arc<Mutex<Page>>)> {
        let id = self.disk.allocate_page();

        let mut guard = self.lock_with(self.write_timeout)?;
        if !self.make_room(&mut guard) {
            self.disk.deallocate_page(id);
            return None;
        }
        let page = Page::with_id(id);
        let cached = CachedPage::fresh(page, true);
        let handle = cached.page.clone();
        guard.table.push(id, cached);
        Some((id, handle))
    }

    fn unpin_page(&self, id: PageId, dirty: bool) -> bool {
        let Some(mut guard) = self.lock_with(self.default_timeout) else {
            return false;
        };
        match guard.table.peek_mut(&id) {
            Some(cached) => {
                cached.pin_count = cached.pin_count.saturating_sub(1);
                cached.dirty |= dirty;
                true
            }
            None => false,
        }
    }

    fn flush_page(&self, id: PageId) -> bool {
        let mut guard = match self.lock_with(self.write_timeout) {
            Some(g) => g,
            None => return false,
        };
        let Some(cached) = guard.table.peek(&id) else {
            return false;
        };
        if !cached.dirty {
            return true;
        }
        let page_arc = cached.page.clone();
        drop(guard);

        let ok = self.write_back(id, &page_arc);

        let mut guard = match self.lock_with(self.write_timeout) {
            Some(g) => g,
            None => return false,
        };
        if ok && let Some(cached) = guard.table.peek_mut(&id) {
            cached.dirty = false;
        }
        ok
    }

    fn flush_all_pages(&self) {
        let dirty_ids: Vec<PageId> = {
            let Some(guard) = self.lock_with(self.write_timeout) else {
                log::warn!("flush_all_pages: could not acquire latch to enumerate dirty pages");
                return;
            };
            guard
                .table
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

    fn delete_page(&self, id: PageId) -> bool {
        let mut guard = match self.lock_with(self.default_timeout) {
            Some(g) => g,
            None => return false,
        };
        let Some(cached) = guard.table.peek(&id) else {
            return false;
        };
        if cached.pin_count != 0 {
            return false;
        }
        if cached.dirty {
            let page_arc = cached.page.clone();
            drop(guard);
            self.write_back(id, &page_arc);
            guard = match self.lock_with(self.default_timeout) {
                Some(g) => g,
                None => return false,
            };
        }
        guard.table.pop(&id);
        drop(guard);
        self.disk.deallocate_page(id)
    }

    fn resize(&self, new_capacity: usize) {
        let new_capacity = new_capacity.max(1);
        let Some(mut guard) = self.lock_with(self.write_timeout) else {
            log::warn!("resize: could not acquire latch");
            return;
        };
        while guard.table.len() > new_capacity {
            let Some(victim) = find_victim(&guard.table) else {
                log::warn!("resize: cannot shrink to {new_capacity}, all remaining pages pinned");
                break;
            };
            let cached = guard.table.peek(&victim).unwrap();
            if cached.dirty {
                let page_arc = cached.page.clone();
                parking_lot::MutexGuard::unlocked(&mut guard, || {
                    self.write_back(victim, &page_arc);
                });
            }
            guard.table.pop(&victim);
            self.metrics.record_eviction();
        }
        guard.table.resize(NonZeroUsize::new(new_capacity).unwrap());
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
        match self.lock_with(self.read_timeout) {
            Some(guard) => guard.table.contains(&id),
            None => false,
        }
    }

    fn used_pages(&self) -> usize {
        match self.lock_with(self.read_timeout) {
            Some(guard) => guard.table.len(),
            None => 0,
        }
    }

    fn metrics(&self) -> BufferPoolMetrics {
        self.metrics.snapshot()
    }
}
