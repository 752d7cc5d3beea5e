//! `WalManager`: append, group-commit flush, checkpoint, and recovery
//! (component C5).

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::prelude::WalConfig;
use common::{DbError, DbResult, Lsn, TxnId};
use types::Value;

use crate::codec::{self, ReadOutcome};
use crate::codec_checkpoint::{read_checkpoint, write_checkpoint};
use crate::materialize::materialize;
use crate::record::{CheckpointState, LogRecord};

/// Snapshot of WAL activity counters, exposed for monitoring.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WalMetrics {
    pub total_records_logged: u64,
    pub total_flushes: u64,
    pub total_force_flushes: u64,
    pub total_flush_failures: u64,
}

#[derive(Default)]
struct MetricsInner {
    total_records_logged: AtomicU64,
    total_flushes: AtomicU64,
    total_force_flushes: AtomicU64,
    total_flush_failures: AtomicU64,
}

impl MetricsInner {
    fn snapshot(&self) -> WalMetrics {
        WalMetrics {
            total_records_logged: self.total_records_logged.load(Ordering::Relaxed),
            total_flushes: self.total_flushes.load(Ordering::Relaxed),
            total_force_flushes: self.total_force_flushes.load(Ordering::Relaxed),
            total_flush_failures: self.total_flush_failures.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of `recover_from_log`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryReport {
    pub page_states: HashMap<String, Value>,
    pub recovered_up_to_lsn: Lsn,
    /// Transactions that were in progress at crash time; each got a
    /// synthesized `Compensate` record appended to the log.
    pub compensated_transactions: Vec<TxnId>,
}

struct BufferState {
    next_lsn: Lsn,
    last_flushed_lsn: Lsn,
    buffer: Vec<LogRecord>,
}

struct Shared {
    log_path: PathBuf,
    config: WalConfig,
    state: Mutex<BufferState>,
    wake: Condvar,
    flushed: Condvar,
    stop: AtomicBool,
    simulate_flush_failure: AtomicBool,
    metrics: MetricsInner,
}

impl Shared {
    fn now_millis() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    /// Append `batch` to the log file and fsync. On I/O failure the batch is
    /// *not* considered flushed; the caller is expected to retry it.
    fn write_and_fsync(&self, batch: &[LogRecord]) -> bool {
        if self.simulate_flush_failure.load(Ordering::Relaxed) {
            return false;
        }
        let file = OpenOptions::new().append(true).create(true).open(&self.log_path);
        let mut file = match file {
            Ok(f) => f,
            Err(e) => {
                log::error!("wal: failed to open log for flush: {e}");
                return false;
            }
        };
        for rec in batch {
            if let Err(e) = codec::write_record(&mut file, rec) {
                log::error!("wal: failed to write record {}: {e}", rec.lsn);
                return false;
            }
        }
        if let Err(e) = file.sync_all() {
            log::error!("wal: fsync failed: {e}");
            return false;
        }
        true
    }
}

/// Append-only, LSN-ordered write-ahead log with batched group commit.
pub struct WalManager {
    shared: Arc<Shared>,
    checkpoint_path: PathBuf,
    checkpoint_history: Mutex<Vec<CheckpointState>>,
    flush_thread: Option<JoinHandle<()>>,
}

impl WalManager {
    pub fn open(log_path: impl Into<PathBuf>, checkpoint_path: impl Into<PathBuf>, config: WalConfig) -> DbResult<Self> {
        let log_path = log_path.into();
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| DbError::WalIo(format!("failed to create wal directory: {e}")))?;
        }
        // Touch the file so a fresh database starts with an empty, existing log.
        OpenOptions::new()
            .append(true)
            .create(true)
            .open(&log_path)
            .map_err(|e| DbError::WalIo(format!("failed to open wal file: {e}")))?;

        let force_sync = config.force_sync;
        let flush_interval = config.flush_interval;

        let shared = Arc::new(Shared {
            log_path,
            config,
            state: Mutex::new(BufferState {
                next_lsn: 1,
                last_flushed_lsn: 0,
                buffer: Vec::new(),
            }),
            wake: Condvar::new(),
            flushed: Condvar::new(),
            stop: AtomicBool::new(false),
            simulate_flush_failure: AtomicBool::new(false),
            metrics: MetricsInner::default(),
        });

        let flush_thread = if force_sync {
            None
        } else {
            let shared = shared.clone();
            Some(std::thread::spawn(move || flush_loop(shared, flush_interval)))
        };

        Ok(Self {
            shared,
            checkpoint_path: checkpoint_path.into(),
            checkpoint_history: Mutex::new(Vec::new()),
            flush_thread,
        })
    }

    pub fn set_simulate_flush_failure(&self, simulate: bool) {
        self.shared
            .simulate_flush_failure
            .store(simulate, Ordering::Relaxed);
    }

    pub fn metrics(&self) -> WalMetrics {
        self.shared.metrics.snapshot()
    }

    /// Assign an LSN, append to the in-memory buffer, and signal the flush
    /// thread (or flush inline under `wal.force_sync`).
    pub fn log(&self, mut record: LogRecord) -> Lsn {
        let mut guard = self.shared.state.lock().unwrap();
        let lsn = guard.next_lsn;
        guard.next_lsn += 1;
        record.lsn = lsn;
        record.timestamp = Shared::now_millis();
        guard.buffer.push(record);
        self.shared.metrics.total_records_logged.fetch_add(1, Ordering::Relaxed);

        if self.shared.config.force_sync {
            let batch = std::mem::take(&mut guard.buffer);
            drop(guard);
            self.flush_batch(batch, lsn);
        } else {
            drop(guard);
            self.shared.wake.notify_one();
        }
        lsn
    }

    /// Atomically reserve a contiguous LSN range for `records`, preserving
    /// caller order. Returns the last assigned LSN.
    pub fn log_batch(&self, records: Vec<LogRecord>) -> Option<Lsn> {
        if records.is_empty() {
            return None;
        }
        let mut guard = self.shared.state.lock().unwrap();
        let mut last_lsn = guard.next_lsn;
        let now = Shared::now_millis();
        let count = records.len() as u64;
        for mut rec in records {
            rec.lsn = guard.next_lsn;
            rec.timestamp = now;
            last_lsn = rec.lsn;
            guard.next_lsn += 1;
            guard.buffer.push(rec);
        }
        self.shared
            .metrics
            .total_records_logged
            .fetch_add(count, Ordering::Relaxed);

        if self.shared.config.force_sync {
            let batch = std::mem::take(&mut guard.buffer);
            drop(guard);
            self.flush_batch(batch, last_lsn);
        } else {
            drop(guard);
            self.shared.wake.notify_one();
        }
        Some(last_lsn)
    }

    /// Drain the buffer to disk and fsync, blocking until everything logged
    /// so far is durable.
    ///
    /// If the buffer is already empty but `last_flushed_lsn` hasn't caught
    /// up to `target`, a flush for those records is in flight elsewhere
    /// (the background thread, or a racing `force_flush`); wait on
    /// `flushed` for it to land instead of trusting the empty take as
    /// "nothing to do".
    pub fn force_flush(&self) -> bool {
        let mut guard = self.shared.state.lock().unwrap();
        loop {
            let target = guard.next_lsn.saturating_sub(1);
            if guard.last_flushed_lsn >= target {
                return true;
            }
            if guard.buffer.is_empty() {
                guard = self.shared.flushed.wait(guard).unwrap();
                continue;
            }
            let batch = std::mem::take(&mut guard.buffer);
            drop(guard);
            self.shared.metrics.total_force_flushes.fetch_add(1, Ordering::Relaxed);
            return self.flush_batch(batch, target);
        }
    }

    /// Write `batch` out, update `last_flushed_lsn` to at least `up_to` on
    /// success, and notify any `force_flush` waiters. On failure the batch
    /// is pushed back to the front of the buffer for the next attempt.
    fn flush_batch(&self, batch: Vec<LogRecord>, up_to: Lsn) -> bool {
        if batch.is_empty() {
            return true;
        }
        let ok = self.shared.write_and_fsync(&batch);
        let mut guard = self.shared.state.lock().unwrap();
        if ok {
            guard.last_flushed_lsn = guard.last_flushed_lsn.max(up_to);
            self.shared.metrics.total_flushes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.shared.metrics.total_flush_failures.fetch_add(1, Ordering::Relaxed);
            let mut restored = batch;
            restored.extend(std::mem::take(&mut guard.buffer));
            guard.buffer = restored;
        }
        drop(guard);
        self.shared.flushed.notify_all();
        ok
    }

    fn open_log_reader(&self) -> DbResult<BufReader<File>> {
        let file = File::open(&self.shared.log_path)
            .map_err(|e| DbError::WalIo(format!("failed to open wal for read: {e}")))?;
        Ok(BufReader::new(file))
    }

    /// Read records with `from <= lsn <= to` directly from disk, never from
    /// the in-memory buffer.
    pub fn read_log_range(&self, from: Lsn, to: Lsn) -> DbResult<Vec<LogRecord>> {
        let reader = self.open_log_reader()?;
        let all = codec::read_all(reader)?;
        Ok(all
            .into_iter()
            .filter(|r| r.lsn >= from && r.lsn <= to)
            .collect())
    }

    /// Check every record in the log file is well-formed. Returns `false`
    /// (and logs) if a torn/corrupt frame is found before EOF.
    pub fn verify_log_integrity(&self) -> DbResult<bool> {
        let mut reader = self.open_log_reader()?;
        loop {
            match codec::read_record(&mut reader)? {
                ReadOutcome::Record(_) => continue,
                ReadOutcome::Eof => return Ok(true),
                ReadOutcome::Corrupt => {
                    log::warn!("wal: corrupt or torn record found during integrity check");
                    return Ok(false);
                }
            }
        }
    }

    fn latest_checkpoint(&self) -> DbResult<Option<CheckpointState>> {
        match File::open(&self.checkpoint_path) {
            Ok(f) => read_checkpoint(BufReader::new(f)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DbError::WalIo(format!("failed to open checkpoint file: {e}"))),
        }
    }

    /// Snapshot materialized values up to the current durable point, persist
    /// it as the (sole) checkpoint file, and append it to in-memory history.
    pub fn create_checkpoint(&self, sync: bool) -> DbResult<Lsn> {
        if sync {
            self.force_flush();
        }
        let last_flushed = self.shared.state.lock().unwrap().last_flushed_lsn;
        let baseline = self
            .latest_checkpoint()?
            .map(|c| (c.lsn, c.page_states))
            .unwrap_or((0, HashMap::new()));
        let records = self.read_log_range(baseline.0 + 1, last_flushed)?;
        let result = materialize(baseline.1, &records);

        let state = CheckpointState {
            lsn: last_flushed,
            timestamp: Shared::now_millis(),
            page_states: result.page_states,
        };

        let file = File::create(&self.checkpoint_path)
            .map_err(|e| DbError::WalIo(format!("failed to create checkpoint file: {e}")))?;
        let mut writer = std::io::BufWriter::new(file);
        write_checkpoint(&mut writer, &state)?;
        writer
            .flush()
            .map_err(|e| DbError::WalIo(format!("failed to flush checkpoint file: {e}")))?;

        self.checkpoint_history.lock().unwrap().push(state.clone());
        Ok(state.lsn)
    }

    pub fn checkpoint_history(&self) -> Vec<CheckpointState> {
        self.checkpoint_history.lock().unwrap().clone()
    }

    /// Deterministic redo over an explicit LSN range, with no checkpoint
    /// baseline; used by tooling and tests.
    pub fn replay_log(&self, from: Lsn, to: Lsn) -> DbResult<HashMap<String, Value>> {
        let records = self.read_log_range(from, to)?;
        Ok(materialize(HashMap::new(), &records).page_states)
    }

    /// Locate the latest checkpoint, redo every committed record after it,
    /// and synthesize a `Compensate` record for any transaction left
    /// in-progress at crash time.
    pub fn recover_from_log(&self) -> DbResult<RecoveryReport> {
        let baseline = self
            .latest_checkpoint()?
            .map(|c| (c.lsn, c.page_states))
            .unwrap_or((0, HashMap::new()));

        let tail_lsn = self.shared.state.lock().unwrap().next_lsn.saturating_sub(1);
        let records = self.read_log_range(baseline.0 + 1, tail_lsn)?;
        let result = materialize(baseline.1, &records);

        let mut compensated = Vec::new();
        for txn_id in &result.in_progress {
            self.log(LogRecord::compensate(*txn_id, Shared::now_millis()));
            compensated.push(*txn_id);
        }
        self.force_flush();

        let recovered_up_to_lsn = records.last().map(|r| r.lsn).unwrap_or(baseline.0);
        Ok(RecoveryReport {
            page_states: result.page_states,
            recovered_up_to_lsn,
            compensated_transactions: compensated,
        })
    }

    /// Transactions with a `Begin` but no `Commit`/`Abort` anywhere in the
    /// durable log.
    pub fn in_progress_transactions(&self) -> DbResult<Vec<TxnId>> {
        let tail_lsn = self.shared.state.lock().unwrap().next_lsn.saturating_sub(1);
        let records = self.read_log_range(1, tail_lsn)?;
        Ok(materialize(HashMap::new(), &records).in_progress)
    }

    /// Rewrite the log keeping only records with `lsn >= keep_lsn`; the
    /// latest checkpoint file is untouched.
    pub fn compact_log(&self, keep_lsn: Lsn) -> DbResult<()> {
        self.force_flush();
        let tail_lsn = self.shared.state.lock().unwrap().next_lsn.saturating_sub(1);
        let keep = self.read_log_range(keep_lsn, tail_lsn)?;

        let tmp_path = self.shared.log_path.with_extension("compact.tmp");
        {
            let file = File::create(&tmp_path)
                .map_err(|e| DbError::WalIo(format!("failed to create compacted wal: {e}")))?;
            let mut writer = std::io::BufWriter::new(file);
            for rec in &keep {
                codec::write_record(&mut writer, rec)?;
            }
            writer
                .flush()
                .map_err(|e| DbError::WalIo(format!("failed to flush compacted wal: {e}")))?;
        }
        std::fs::rename(&tmp_path, &self.shared.log_path)
            .map_err(|e| DbError::WalIo(format!("failed to install compacted wal: {e}")))?;
        Ok(())
    }
}

impl buffer::WalDurability for WalManager {
    fn force_flush(&self) -> bool {
        WalManager::force_flush(self)
    }
}

impl Drop for WalManager {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        self.shared.wake.notify_all();
        if let Some(handle) = self.flush_thread.take() {
            let _ = handle.join();
        }
        self.force_flush();
    }
}

fn flush_loop(shared: Arc<Shared>, flush_interval: Duration) {
    loop {
        let mut guard = shared.state.lock().unwrap();
        if guard.buffer.is_empty() {
            if shared.stop.load(Ordering::Relaxed) {
                return;
            }
            let (g, _timeout) = shared.wake.wait_timeout(guard, flush_interval).unwrap();
            guard = g;
            if guard.buffer.is_empty() {
                if shared.stop.load(Ordering::Relaxed) {
                    return;
                }
                continue;
            }
        }

        let batch = std::mem::take(&mut guard.buffer);
        let up_to = batch.last().map(|r| r.lsn).unwrap_or(guard.last_flushed_lsn);
        drop(guard);

        let ok = shared.write_and_fsync(&batch);
        let mut guard = shared.state.lock().unwrap();
        if ok {
            guard.last_flushed_lsn = guard.last_flushed_lsn.max(up_to);
            shared.metrics.total_flushes.fetch_add(1, Ordering::Relaxed);
        } else {
            shared.metrics.total_flush_failures.fetch_add(1, Ordering::Relaxed);
            let mut restored = batch;
            restored.extend(std::mem::take(&mut guard.buffer));
            guard.buffer = restored;
        }
        drop(guard);
        shared.flushed.notify_all();
    }
}
