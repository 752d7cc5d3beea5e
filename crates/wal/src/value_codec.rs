//! Manual tagged-value and length-prefixed-string encoding shared by the
//! log-record and checkpoint codecs. Matches the on-disk layout exactly:
//! `u8 tag (0=Int/1=Double/2=String) | i64 | f64 | len-prefixed string`.

use common::{DbError, DbResult};
use types::Value;

pub(crate) fn encode_string(out: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

pub(crate) fn encode_value(out: &mut Vec<u8>, value: &Value) {
    out.push(value.tag());
    match value {
        Value::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Double(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::String(s) => encode_string(out, s),
    }
}

fn take<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> DbResult<&'a [u8]> {
    if *pos + len > buf.len() {
        return Err(DbError::WalIntegrity("truncated wal payload".into()));
    }
    let slice = &buf[*pos..*pos + len];
    *pos += len;
    Ok(slice)
}

pub(crate) fn read_u8(buf: &[u8], pos: &mut usize) -> DbResult<u8> {
    Ok(take(buf, pos, 1)?[0])
}

pub(crate) fn read_u32(buf: &[u8], pos: &mut usize) -> DbResult<u32> {
    Ok(u32::from_le_bytes(take(buf, pos, 4)?.try_into().unwrap()))
}

pub(crate) fn read_u64(buf: &[u8], pos: &mut usize) -> DbResult<u64> {
    Ok(u64::from_le_bytes(take(buf, pos, 8)?.try_into().unwrap()))
}

pub(crate) fn read_i64(buf: &[u8], pos: &mut usize) -> DbResult<i64> {
    Ok(i64::from_le_bytes(take(buf, pos, 8)?.try_into().unwrap()))
}

pub(crate) fn read_f64(buf: &[u8], pos: &mut usize) -> DbResult<f64> {
    Ok(f64::from_le_bytes(take(buf, pos, 8)?.try_into().unwrap()))
}

pub(crate) fn decode_string(buf: &[u8], pos: &mut usize) -> DbResult<String> {
    let len = read_u32(buf, pos)? as usize;
    let bytes = take(buf, pos, len)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|e| DbError::WalIntegrity(format!("invalid utf-8 in wal string: {e}")))
}

pub(crate) fn decode_value(buf: &[u8], pos: &mut usize) -> DbResult<Value> {
    match read_u8(buf, pos)? {
        0 => Ok(Value::Int(read_i64(buf, pos)?)),
        1 => Ok(Value::Double(read_f64(buf, pos)?)),
        2 => Ok(Value::String(decode_string(buf, pos)?)),
        other => Err(DbError::WalIntegrity(format!("unknown value tag {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_value_variant() {
        for value in [
            Value::Int(-7),
            Value::Double(2.5),
            Value::String("ada".into()),
        ] {
            let mut out = Vec::new();
            encode_value(&mut out, &value);
            let mut pos = 0;
            assert_eq!(decode_value(&out, &mut pos).unwrap(), value);
            assert_eq!(pos, out.len());
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut pos = 0;
        assert!(decode_value(&[9, 0, 0, 0, 0, 0, 0, 0, 0], &mut pos).is_err());
    }
}
