//! Wire-level record and checkpoint types (component C5 data model).

use std::collections::HashMap;

use common::{Lsn, TxnId};
use types::Value;

/// What kind of change (or transaction-boundary marker) a [`LogRecord`] carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogRecordKind {
    Begin,
    Commit,
    Abort,
    Insert,
    Update,
    Delete,
    /// Synthesized during recovery for a transaction that never committed.
    Compensate,
}

impl LogRecordKind {
    /// `kind:u8` byte used in the on-disk WAL payload.
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            LogRecordKind::Begin => 0,
            LogRecordKind::Commit => 1,
            LogRecordKind::Abort => 2,
            LogRecordKind::Insert => 3,
            LogRecordKind::Update => 4,
            LogRecordKind::Delete => 5,
            LogRecordKind::Compensate => 6,
        }
    }

    pub(crate) fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(LogRecordKind::Begin),
            1 => Some(LogRecordKind::Commit),
            2 => Some(LogRecordKind::Abort),
            3 => Some(LogRecordKind::Insert),
            4 => Some(LogRecordKind::Update),
            5 => Some(LogRecordKind::Delete),
            6 => Some(LogRecordKind::Compensate),
            _ => None,
        }
    }
}

/// A single WAL entry.
///
/// `key`/`old_value`/`new_value` are meaningful only for `Insert`/`Update`/
/// `Delete`/`Compensate`; transaction-boundary records (`Begin`/`Commit`/
/// `Abort`) carry an empty key and `Value::Int(0)` placeholders so the wire
/// format stays uniform (every record has the same shape on disk).
#[derive(Clone, Debug, PartialEq)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub kind: LogRecordKind,
    pub key: String,
    pub old_value: Value,
    pub new_value: Value,
    pub timestamp: i64,
}

impl LogRecord {
    pub fn begin(txn_id: TxnId, timestamp: i64) -> Self {
        Self::control(txn_id, LogRecordKind::Begin, timestamp)
    }

    pub fn commit(txn_id: TxnId, timestamp: i64) -> Self {
        Self::control(txn_id, LogRecordKind::Commit, timestamp)
    }

    pub fn abort(txn_id: TxnId, timestamp: i64) -> Self {
        Self::control(txn_id, LogRecordKind::Abort, timestamp)
    }

    pub fn insert(txn_id: TxnId, key: impl Into<String>, new_value: Value, timestamp: i64) -> Self {
        Self {
            lsn: 0,
            txn_id,
            kind: LogRecordKind::Insert,
            key: key.into(),
            old_value: Value::Int(0),
            new_value,
            timestamp,
        }
    }

    pub fn update(
        txn_id: TxnId,
        key: impl Into<String>,
        old_value: Value,
        new_value: Value,
        timestamp: i64,
    ) -> Self {
        Self {
            lsn: 0,
            txn_id,
            kind: LogRecordKind::Update,
            key: key.into(),
            old_value,
            new_value,
            timestamp,
        }
    }

    pub fn delete(txn_id: TxnId, key: impl Into<String>, old_value: Value, timestamp: i64) -> Self {
        Self {
            lsn: 0,
            txn_id,
            kind: LogRecordKind::Delete,
            key: key.into(),
            old_value,
            new_value: Value::Int(0),
            timestamp,
        }
    }

    pub fn compensate(txn_id: TxnId, timestamp: i64) -> Self {
        Self::control(txn_id, LogRecordKind::Compensate, timestamp)
    }

    fn control(txn_id: TxnId, kind: LogRecordKind, timestamp: i64) -> Self {
        Self {
            lsn: 0,
            txn_id,
            kind,
            key: String::new(),
            old_value: Value::Int(0),
            new_value: Value::Int(0),
            timestamp,
        }
    }
}

/// A durable snapshot of materialized key/value state, bounding how far
/// recovery must replay.
#[derive(Clone, Debug, PartialEq)]
pub struct CheckpointState {
    pub lsn: Lsn,
    pub timestamp: i64,
    pub page_states: HashMap<String, Value>,
}
