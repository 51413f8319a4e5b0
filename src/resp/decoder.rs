use bytes::BytesMut;

use crate::redis::error::ProtocolError;

use super::value::RespValue;

/// Scan `buf` starting at `from` for the next `\r\n`, returning the index of the `\r`.
fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    if from >= buf.len() {
        return None;
    }
    buf[from..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|pos| from + pos)
}

/// Parse a decimal integer line starting at `from`, returning (value, index just past the
/// trailing `\r\n`). Does not itself validate sign rules beyond what `str::parse` accepts.
fn parse_line_as_int(buf: &[u8], from: usize) -> Result<Option<(i64, usize)>, ProtocolError> {
    let Some(crlf) = find_crlf(buf, from) else {
        return Ok(None);
    };
    let line = std::str::from_utf8(&buf[from..crlf])
        .map_err(|_| ProtocolError::InvalidLength(format!("{:?}", &buf[from..crlf])))?;
    let value = line
        .parse::<i64>()
        .map_err(|_| ProtocolError::InvalidLength(line.to_string()))?;
    Ok(Some((value, crlf + 2)))
}

/// Decode exactly one RESP value starting at byte offset `from` in `buf`.
///
/// Returns `Ok(None)` when the buffer doesn't yet hold a complete value (caller should read
/// more bytes and retry), `Ok(Some((value, consumed)))` on success where `consumed` is the
/// number of bytes from `from` that made up the value, or `Err` on malformed framing.
fn decode_at(buf: &[u8], from: usize) -> Result<Option<(RespValue, usize)>, ProtocolError> {
    if from >= buf.len() {
        return Ok(None);
    }
    let prefix = buf[from];
    match prefix {
        b'+' => {
            let Some(crlf) = find_crlf(buf, from + 1) else {
                return Ok(None);
            };
            let s = String::from_utf8_lossy(&buf[from + 1..crlf]).into_owned();
            Ok(Some((RespValue::SimpleString(s), crlf + 2 - from)))
        }
        b'-' => {
            let Some(crlf) = find_crlf(buf, from + 1) else {
                return Ok(None);
            };
            let s = String::from_utf8_lossy(&buf[from + 1..crlf]).into_owned();
            Ok(Some((RespValue::Error(s), crlf + 2 - from)))
        }
        b':' => match parse_line_as_int(buf, from + 1)? {
            None => Ok(None),
            Some((value, end)) => Ok(Some((RespValue::Integer(value), end - from))),
        },
        b'$' => {
            let Some((len, after_len)) = parse_line_as_int(buf, from + 1)? else {
                return Ok(None);
            };
            if len == -1 {
                return Ok(Some((RespValue::NullBulkString, after_len - from)));
            }
            if len < 0 {
                return Err(ProtocolError::InvalidLength(len.to_string()));
            }
            let len = len as usize;
            let payload_end = after_len + len;
            if buf.len() < payload_end + 2 {
                return Ok(None);
            }
            if &buf[payload_end..payload_end + 2] != b"\r\n" {
                return Err(ProtocolError::MissingTerminator);
            }
            let payload = buf[after_len..payload_end].to_vec();
            Ok(Some((RespValue::BulkString(payload), payload_end + 2 - from)))
        }
        b'*' => {
            let Some((count, after_count)) = parse_line_as_int(buf, from + 1)? else {
                return Ok(None);
            };
            if count == -1 {
                return Ok(Some((RespValue::NullArray, after_count - from)));
            }
            if count < 0 {
                return Err(ProtocolError::InvalidLength(count.to_string()));
            }
            let mut elements = Vec::with_capacity(count as usize);
            let mut cursor = after_count;
            for _ in 0..count {
                match decode_at(buf, cursor)? {
                    None => return Ok(None),
                    Some((value, consumed)) => {
                        elements.push(value);
                        cursor += consumed;
                    }
                }
            }
            Ok(Some((RespValue::Array(elements), cursor - from)))
        }
        other => Err(ProtocolError::InvalidPrefix(other as char, from)),
    }
}

/// Attempt to decode one value from the front of `buf`. On success the consumed bytes are
/// split off the front of `buf`; on "need more data" `buf` is left untouched.
pub fn decode(buf: &mut BytesMut) -> Result<Option<RespValue>, ProtocolError> {
    match decode_at(buf, 0)? {
        None => Ok(None),
        Some((value, consumed)) => {
            let _ = buf.split_to(consumed);
            Ok(Some(value))
        }
    }
}

/// Decode a value that must be a command: a top-level array of bulk strings. Used by the
/// connection loop, which only ever expects clients to send commands this way.
pub fn decode_command(buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, ProtocolError> {
    match decode(buf)? {
        None => Ok(None),
        Some(RespValue::Array(elements)) => {
            if elements.is_empty() {
                return Err(ProtocolError::EmptyCommand);
            }
            let mut parts = Vec::with_capacity(elements.len());
            for element in elements {
                match element {
                    RespValue::BulkString(bytes) => parts.push(bytes),
                    _ => return Err(ProtocolError::NonBulkStringInCommand),
                }
            }
            Ok(Some(parts))
        }
        Some(_) => Err(ProtocolError::NonBulkStringInCommand),
    }
}
