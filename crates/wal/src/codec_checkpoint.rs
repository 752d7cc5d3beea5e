//! Framing for the separate checkpoint file: same length-prefixed + CRC32
//! envelope as the log (`codec`), around a hand-rolled `CheckpointState`
//! payload: `lsn:u64 | timestamp:i64 | count:u32 | (key, value) * count`.

use std::collections::HashMap;
use std::io::{Read, Write};

use common::{DbError, DbResult};
use types::Value;

use crate::record::CheckpointState;
use crate::value_codec::{decode_string, decode_value, encode_string, encode_value, read_i64, read_u32, read_u64};

pub fn encode_checkpoint(state: &CheckpointState) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&state.lsn.to_le_bytes());
    payload.extend_from_slice(&state.timestamp.to_le_bytes());
    payload.extend_from_slice(&(state.page_states.len() as u32).to_le_bytes());
    for (key, value) in &state.page_states {
        encode_string(&mut payload, key);
        encode_value(&mut payload, value);
    }

    let crc = crc32fast::hash(&payload);
    let mut out = Vec::with_capacity(4 + payload.len() + 4);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

fn decode_checkpoint(payload: &[u8]) -> DbResult<CheckpointState> {
    let mut pos = 0;
    let lsn = read_u64(payload, &mut pos)?;
    let timestamp = read_i64(payload, &mut pos)?;
    let count = read_u32(payload, &mut pos)? as usize;
    let mut page_states: HashMap<String, Value> = HashMap::with_capacity(count);
    for _ in 0..count {
        let key = decode_string(payload, &mut pos)?;
        let value = decode_value(payload, &mut pos)?;
        page_states.insert(key, value);
    }
    Ok(CheckpointState {
        lsn,
        timestamp,
        page_states,
    })
}

pub fn write_checkpoint(w: &mut impl Write, state: &CheckpointState) -> DbResult<()> {
    let framed = encode_checkpoint(state);
    w.write_all(&framed)
        .map_err(|e| DbError::WalIo(format!("failed to write checkpoint: {e}")))
}

pub fn read_checkpoint(mut r: impl Read) -> DbResult<Option<CheckpointState>> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(DbError::WalIo(format!("failed to read checkpoint length: {e}"))),
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .map_err(|e| DbError::WalIntegrity(format!("truncated checkpoint payload: {e}")))?;

    let mut crc_buf = [0u8; 4];
    r.read_exact(&mut crc_buf)
        .map_err(|e| DbError::WalIntegrity(format!("truncated checkpoint crc: {e}")))?;
    if crc32fast::hash(&payload) != u32::from_le_bytes(crc_buf) {
        return Err(DbError::WalIntegrity("checkpoint crc mismatch".into()));
    }

    decode_checkpoint(&payload).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_checkpoint_through_the_byte_layout() {
        let mut page_states = HashMap::new();
        page_states.insert("a".to_string(), Value::Int(1));
        page_states.insert("b".to_string(), Value::String("x".into()));
        let state = CheckpointState {
            lsn: 42,
            timestamp: 99,
            page_states,
        };

        let mut buf = Vec::new();
        write_checkpoint(&mut buf, &state).unwrap();
        let decoded = read_checkpoint(&buf[..]).unwrap().unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn missing_file_reads_as_none() {
        assert_eq!(read_checkpoint(&[][..]).unwrap(), None);
    }
}
