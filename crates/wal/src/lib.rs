//! Append-only, LSN-ordered write-ahead log with group commit, checkpoints,
//! and crash recovery (component C5).
//!
//! Every record is length-prefixed and CRC32-framed on disk (`codec`). A
//! background thread drains the in-memory buffer on a timer or signal
//! (`manager::flush_loop`); under `wal.force_sync` every [`WalManager::log`]
//! call flushes inline instead. Recovery and checkpointing share one
//! two-pass redo (`materialize`): find which transactions committed, then
//! apply only their writes, in LSN order.

mod codec;
mod codec_checkpoint;
mod manager;
mod materialize;
mod record;
mod value_codec;


pub use manager::{RecoveryReport, WalManager, WalMetrics};
pub use record::{CheckpointState, LogRecord, LogRecordKind};
