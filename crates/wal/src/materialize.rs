//! Shared two-pass redo used by `recover_from_log`, `replay_log`, and
//! `create_checkpoint`: find which transactions committed, then apply only
//! their `Insert`/`Update`/`Delete` records, in LSN order.

use std::collections::{HashMap, HashSet};

use common::TxnId;
use types::Value;

use crate::record::{LogRecord, LogRecordKind};

pub struct MaterializeResult {
    pub page_states: HashMap<String, Value>,
    /// Transactions with a `Begin` but no matching `Commit`/`Abort` in the
    /// scanned range.
    pub in_progress: Vec<TxnId>,
}

pub fn materialize(baseline: HashMap<String, Value>, records: &[LogRecord]) -> MaterializeResult {
    let mut committed = HashSet::new();
    let mut aborted = HashSet::new();
    let mut began = HashSet::new();

    for rec in records {
        match rec.kind {
            LogRecordKind::Begin => {
                began.insert(rec.txn_id);
            }
            LogRecordKind::Commit => {
                committed.insert(rec.txn_id);
            }
            LogRecordKind::Abort => {
                aborted.insert(rec.txn_id);
            }
            _ => {}
        }
    }

    let mut page_states = baseline;
    for rec in records {
        if !committed.contains(&rec.txn_id) {
            continue;
        }
        match rec.kind {
            LogRecordKind::Insert | LogRecordKind::Update => {
                page_states.insert(rec.key.clone(), rec.new_value.clone());
            }
            LogRecordKind::Delete => {
                page_states.remove(&rec.key);
            }
            _ => {}
        }
    }

    let in_progress = began
        .into_iter()
        .filter(|id| !committed.contains(id) && !aborted.contains(id))
        .collect();

    MaterializeResult {
        page_states,
        in_progress,
    }
}
