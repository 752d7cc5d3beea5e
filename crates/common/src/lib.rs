
pub mod config;

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Logical identifier for a page in the storage layer.
///
/// Dense and non-negative; `-1` is the sentinel "invalid" id (`PageId::INVALID`).
/// Examples:
/// - `let freelist_page = PageId(0);`
/// - `let user_page = PageId(42);`
/// - `let none = PageId::INVALID;`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub i32);

impl PageId {
    pub const INVALID: PageId = PageId(-1);

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction identifier referenced by WAL records.
pub type TxnId = u64;

/// Log sequence number: monotonic identifier of a WAL record.
pub type Lsn = u64;

/// Canonical error type shared across the storage core.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("disk: {0}")]
    Disk(String),
    #[error("page bounds: {0}")]
    PageBounds(String),
    #[error("buffer pool exhausted: no unpinned victim available")]
    BufferPoolExhausted,
    #[error("lock timeout")]
    LockTimeout,
    #[error("wal integrity: {0}")]
    WalIntegrity(String),
    #[error("wal io: {0}")]
    WalIo(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::config::{
        BufferPoolConfig, ConfigValue, ConfigView, DatabaseConfig, DiskManagerConfig, WalConfig,
    };
    pub use crate::{DbError, DbResult, Lsn, PageId, TxnId};
}
