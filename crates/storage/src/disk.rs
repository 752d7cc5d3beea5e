//! Block-device abstraction over a single page-addressable file (component C1).

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use common::{DbError, DbResult, PageId};
use parking_lot::ReentrantMutex;

use crate::page::PAGE_SIZE;

/// Snapshot of disk I/O activity, exposed for monitoring/debugging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IoStats {
    pub total_reads: u64,
    pub total_writes: u64,
    pub total_bytes_read: u64,
    pub total_bytes_written: u64,
    pub total_syncs: u64,
    pub total_allocations: u64,
    pub total_deallocations: u64,
}

#[derive(Default)]
struct IoStatsInner {
    total_reads: AtomicU64,
    total_writes: AtomicU64,
    total_bytes_read: AtomicU64,
    total_bytes_written: AtomicU64,
    total_syncs: AtomicU64,
    total_allocations: AtomicU64,
    total_deallocations: AtomicU64,
}

impl IoStatsInner {
    fn snapshot(&self) -> IoStats {
        IoStats {
            total_reads: self.total_reads.load(Ordering::Relaxed),
            total_writes: self.total_writes.load(Ordering::Relaxed),
            total_bytes_read: self.total_bytes_read.load(Ordering::Relaxed),
            total_bytes_written: self.total_bytes_written.load(Ordering::Relaxed),
            total_syncs: self.total_syncs.load(Ordering::Relaxed),
            total_allocations: self.total_allocations.load(Ordering::Relaxed),
            total_deallocations: self.total_deallocations.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.total_reads.store(0, Ordering::Relaxed);
        self.total_writes.store(0, Ordering::Relaxed);
        self.total_bytes_read.store(0, Ordering::Relaxed);
        self.total_bytes_written.store(0, Ordering::Relaxed);
        self.total_syncs.store(0, Ordering::Relaxed);
        self.total_allocations.store(0, Ordering::Relaxed);
        self.total_deallocations.store(0, Ordering::Relaxed);
    }
}

struct State {
    file: File,
    /// Separate descriptor used by `batch_read_pages` so a multi-page batch
    /// read never contends with a concurrent single-page seek/read.
    batch_file: File,
    file_size_pages: u64,
    next_page_id: i32,
    /// LIFO free-list; deallocation is in-memory only (see `deallocate_page`).
    free_pages: Vec<i32>,
}

#[derive(Default)]
struct Faults {
    read: AtomicBool,
    write: AtomicBool,
    seek: AtomicBool,
    flush: AtomicBool,
}

/// Owns one read/write file and serializes all I/O on a single recursive
/// mutex (`dm.io_mutex` in the lock inventory). Recursive acquisition is
/// legitimate because `write_page`'s first-time-extension path may call back
/// into allocation bookkeeping while the lock is already held.
pub struct DiskManager {
    path: PathBuf,
    state: ReentrantMutex<RefCell<State>>,
    stats: IoStatsInner,
    faults: Faults,
}

impl DiskManager {
    /// Open (or create) the backing file. Failure here is fatal: the caller
    /// has no page store to operate on.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| DbError::Disk(format!("failed to create data directory: {e}")))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| DbError::Disk(format!("failed to open db file: {e}")))?;
        let batch_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| DbError::Disk(format!("failed to open second db descriptor: {e}")))?;

        let file_size = file
            .metadata()
            .map_err(|e| DbError::Disk(format!("failed to stat db file: {e}")))?
            .len();
        let file_size_pages = file_size / PAGE_SIZE as u64;

        Ok(Self {
            path: path.to_path_buf(),
            state: ReentrantMutex::new(RefCell::new(State {
                file,
                batch_file,
                file_size_pages,
                next_page_id: file_size_pages as i32,
                free_pages: Vec::new(),
            })),
            stats: IoStatsInner::default(),
            faults: Faults::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pop from the free-list if non-empty; otherwise hand out the next
    /// monotonic id. Freed ids from a prior process run do not survive
    /// restart (the free-list is in-memory only, see `deallocate_page`).
    pub fn allocate_page(&self) -> PageId {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let id = match state.free_pages.pop() {
            Some(id) => id,
            None => {
                let id = state.next_page_id;
                state.next_page_id += 1;
                id
            }
        };
        self.stats.total_allocations.fetch_add(1, Ordering::Relaxed);
        PageId(id)
    }

    /// Push `id` onto the free-list. No disk operation is required since
    /// deallocation is purely a bookkeeping event.
    pub fn deallocate_page(&self, id: PageId) -> bool {
        if !id.is_valid() {
            return false;
        }
        let guard = self.state.lock();
        guard.borrow_mut().free_pages.push(id.0);
        self.stats
            .total_deallocations
            .fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Read `PAGE_SIZE` bytes for `id` into `buf`. A short read near EOF
    /// (a partially written tail) is zero-filled rather than treated as an
    /// error.
    pub fn read_page(&self, id: PageId, buf: &mut [u8; PAGE_SIZE]) -> bool {
        if !id.is_valid() {
            log::warn!("read_page: invalid page id {id}");
            return false;
        }
        if self.faults.read.load(Ordering::Relaxed) {
            return false;
        }

        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let offset = id.0 as u64 * PAGE_SIZE as u64;
        if offset >= state.file_size_pages * PAGE_SIZE as u64 {
            return false;
        }

        if self.faults.seek.load(Ordering::Relaxed) {
            return false;
        }
        if state.file.seek(SeekFrom::Start(offset)).is_err() {
            log::error!("read_page: seek failed for page {id}");
            return false;
        }

        buf.fill(0);
        let n = match state.file.read(&mut buf[..]) {
            Ok(n) => n,
            Err(e) => {
                log::error!("read_page: read failed for page {id}: {e}");
                return false;
            }
        };
        self.stats.total_reads.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_bytes_read
            .fetch_add(n as u64, Ordering::Relaxed);
        // short reads near EOF leave the remainder zeroed, matching buf.fill(0) above
        true
    }

    /// Write `PAGE_SIZE` bytes for `id`, growing the file if necessary, and
    /// flush OS buffers.
    pub fn write_page(&self, id: PageId, bytes: &[u8; PAGE_SIZE]) -> bool {
        if !id.is_valid() {
            log::warn!("write_page: invalid page id {id}");
            return false;
        }
        if self.faults.write.load(Ordering::Relaxed) {
            return false;
        }

        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let offset = id.0 as u64 * PAGE_SIZE as u64;

        if self.faults.seek.load(Ordering::Relaxed) {
            return false;
        }
        if state.file.seek(SeekFrom::Start(offset)).is_err() {
            log::error!("write_page: seek failed for page {id}");
            return false;
        }
        if state.file.write_all(&bytes[..]).is_err() {
            log::error!("write_page: write failed for page {id}");
            return false;
        }
        if self.faults.flush.load(Ordering::Relaxed) {
            return false;
        }
        if state.file.flush().is_err() {
            log::error!("write_page: flush failed for page {id}");
            return false;
        }

        let needed_pages = id.0 as u64 + 1;
        if needed_pages > state.file_size_pages {
            state.file_size_pages = needed_pages;
        }

        self.stats.total_writes.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_bytes_written
            .fetch_add(PAGE_SIZE as u64, Ordering::Relaxed);
        true
    }

    /// Read several pages, seek-minimized by sorting on page id first, using
    /// a descriptor separate from the one `read_page`/`write_page` use.
    /// Ids beyond the current file size produce zero-filled buffers rather
    /// than failing the whole batch. Returns the count successfully read.
    pub fn batch_read_pages(&self, ids: &[PageId], bufs: &mut [&mut [u8; PAGE_SIZE]]) -> usize {
        assert_eq!(ids.len(), bufs.len());
        if self.faults.read.load(Ordering::Relaxed) {
            return 0;
        }

        let mut order: Vec<usize> = (0..ids.len()).collect();
        order.sort_by_key(|&i| ids[i].0);

        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let file_size_pages = state.file_size_pages;
        let mut read_count = 0;

        for i in order {
            let id = ids[i];
            bufs[i].fill(0);
            if !id.is_valid() || id.0 as u64 >= file_size_pages {
                continue;
            }
            let offset = id.0 as u64 * PAGE_SIZE as u64;
            if state.batch_file.seek(SeekFrom::Start(offset)).is_err() {
                log::error!("batch_read_pages: seek failed for page {id}");
                continue;
            }
            match state.batch_file.read(&mut bufs[i][..]) {
                Ok(n) => {
                    self.stats.total_reads.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .total_bytes_read
                        .fetch_add(n as u64, Ordering::Relaxed);
                    read_count += 1;
                }
                Err(e) => log::error!("batch_read_pages: read failed for page {id}: {e}"),
            }
        }

        read_count
    }

    /// Advisory prefetch hint; never blocks I/O. A no-op outside unix.
    pub fn prefetch_page(&self, id: PageId) -> bool {
        self.batch_prefetch_pages(&[id])
    }

    /// Advisory prefetch for several pages; contiguous ranges are merged
    /// into a single `posix_fadvise` call.
    pub fn batch_prefetch_pages(&self, ids: &[PageId]) -> bool {
        if ids.iter().any(|id| !id.is_valid()) {
            return false;
        }
        let mut sorted: Vec<i32> = ids.iter().map(|id| id.0).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let guard = self.state.lock();
        let state = guard.borrow();
        let mut i = 0;
        while i < sorted.len() {
            let mut j = i;
            while j + 1 < sorted.len() && sorted[j + 1] == sorted[j] + 1 {
                j += 1;
            }
            let start = sorted[i] as u64 * PAGE_SIZE as u64;
            let len = (j - i + 1) as u64 * PAGE_SIZE as u64;
            advise_will_need(&state.file, start, len);
            i = j + 1;
        }
        true
    }

    /// Force OS-level durability of the file.
    pub fn sync(&self) -> bool {
        if self.faults.flush.load(Ordering::Relaxed) {
            return false;
        }
        let guard = self.state.lock();
        let state = guard.borrow();
        match state.file.sync_all() {
            Ok(()) => {
                self.stats.total_syncs.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                log::error!("sync: sync_all failed: {e}");
                false
            }
        }
    }

    pub fn get_file_size(&self) -> u64 {
        self.state.lock().borrow().file_size_pages
    }

    pub fn io_stats(&self) -> IoStats {
        self.stats.snapshot()
    }

    pub fn reset_io_stats(&self) {
        self.stats.reset();
    }

    pub fn set_simulate_read_failure(&self, simulate: bool) {
        self.faults.read.store(simulate, Ordering::Relaxed);
    }

    pub fn set_simulate_write_failure(&self, simulate: bool) {
        self.faults.write.store(simulate, Ordering::Relaxed);
    }

    pub fn set_simulate_seek_failure(&self, simulate: bool) {
        self.faults.seek.store(simulate, Ordering::Relaxed);
    }

    pub fn set_simulate_flush_failure(&self, simulate: bool) {
        self.faults.flush.store(simulate, Ordering::Relaxed);
    }
}

#[cfg(unix)]
fn advise_will_need(file: &File, offset: u64, len: u64) {
    use std::os::unix::io::AsRawFd;
    // Best effort: a failed hint never surfaces as an error.
    unsafe {
        libc::posix_fadvise(
            file.as_raw_fd(),
            offset as libc::off_t,
            len as libc::off_t,
            libc::POSIX_FADV_WILLNEED,
        );
    }
}

#[cfg(not(unix))]
fn advise_will_need(_file: &File, _offset: u64, _len: u64) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager() -> (tempfile::TempDir, DiskManager) {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("test.db")).unwrap();
        (dir, dm)
    }

    #[test]
    fn allocate_ids_are_sequential() {
        let (_dir, dm) = manager();
        assert_eq!(dm.allocate_page(), PageId(0));
        assert_eq!(dm.allocate_page(), PageId(1));
        assert_eq!(dm.allocate_page(), PageId(2));
    }

    #[test]
    fn deallocate_then_allocate_reuses_id_lifo() {
        let (_dir, dm) = manager();
        let a = dm.allocate_page();
        let b = dm.allocate_page();
        dm.deallocate_page(a);
        dm.deallocate_page(b);
        // LIFO: b was freed last, so it comes back first.
        assert_eq!(dm.allocate_page(), b);
        assert_eq!(dm.allocate_page(), a);
    }

    #[test]
    fn deallocate_negative_id_rejected() {
        let (_dir, dm) = manager();
        assert!(!dm.deallocate_page(PageId(-7)));
    }

    #[test]
    fn round_trip_basic() {
        let (_dir, dm) = manager();
        let id = dm.allocate_page();
        let buf = [0xABu8; PAGE_SIZE];
        assert!(dm.write_page(id, &buf));

        let mut out = [0u8; PAGE_SIZE];
        assert!(dm.read_page(id, &mut out));
        assert_eq!(out, buf);
    }

    #[test]
    fn read_past_eof_fails() {
        let (_dir, dm) = manager();
        let mut out = [0u8; PAGE_SIZE];
        assert!(!dm.read_page(PageId(4), &mut out));
    }

    #[test]
    fn read_negative_id_fails() {
        let (_dir, dm) = manager();
        let mut out = [0u8; PAGE_SIZE];
        assert!(!dm.read_page(PageId(-1), &mut out));
    }

    #[test]
    fn write_grows_file_size() {
        let (_dir, dm) = manager();
        assert_eq!(dm.get_file_size(), 0);
        dm.write_page(PageId(2), &[7u8; PAGE_SIZE]);
        assert_eq!(dm.get_file_size(), 3);
    }

    #[test]
    fn batch_read_sorts_and_zero_fills_missing() {
        let (_dir, dm) = manager();
        dm.write_page(PageId(0), &[1u8; PAGE_SIZE]);
        dm.write_page(PageId(2), &[2u8; PAGE_SIZE]);

        let mut b0 = [0u8; PAGE_SIZE];
        let mut b1 = [0u8; PAGE_SIZE];
        let mut b2 = [0u8; PAGE_SIZE];
        let ids = [PageId(2), PageId(1), PageId(0)];
        let count = dm.batch_read_pages(&ids, &mut [&mut b2, &mut b1, &mut b0]);

        assert_eq!(count, 2);
        assert_eq!(b0, [1u8; PAGE_SIZE]);
        assert_eq!(b1, [0u8; PAGE_SIZE]);
        assert_eq!(b2, [2u8; PAGE_SIZE]);
    }

    #[test]
    fn simulated_write_failure_reports_false() {
        let (_dir, dm) = manager();
        dm.set_simulate_write_failure(true);
        assert!(!dm.write_page(PageId(0), &[1u8; PAGE_SIZE]));
    }

    #[test]
    fn simulated_read_failure_reports_false() {
        let (_dir, dm) = manager();
        dm.write_page(PageId(0), &[1u8; PAGE_SIZE]);
        dm.set_simulate_read_failure(true);
        let mut out = [0u8; PAGE_SIZE];
        assert!(!dm.read_page(PageId(0), &mut out));
    }

    #[test]
    fn reopen_reads_persisted_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persist.db");
        {
            let dm = DiskManager::open(&path).unwrap();
            let id = dm.allocate_page();
            dm.write_page(id, &[0x5Au8; PAGE_SIZE]);
        }
        let dm2 = DiskManager::open(&path).unwrap();
        let mut out = [0u8; PAGE_SIZE];
        assert!(dm2.read_page(PageId(0), &mut out));
        assert_eq!(out[0], 0x5A);
    }

    #[test]
    fn io_stats_track_operations() {
        let (_dir, dm) = manager();
        let id = dm.allocate_page();
        dm.write_page(id, &[1u8; PAGE_SIZE]);
        let mut out = [0u8; PAGE_SIZE];
        dm.read_page(id, &mut out);
        let stats = dm.io_stats();
        assert_eq!(stats.total_writes, 1);
        assert_eq!(stats.total_reads, 1);
        assert_eq!(stats.total_allocations, 1);

        dm.reset_io_stats();
        assert_eq!(dm.io_stats(), IoStats::default());
    }
}
