use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use log::warn;

use super::error::RdbError;
use super::storage::{Entry, Keyspace};

const MAGIC: &[u8] = b"REDIS";

const OP_AUX: u8 = 0xFA;
const OP_SELECTDB: u8 = 0xFE;
const OP_RESIZEDB: u8 = 0xFB;
const OP_EXPIRETIME: u8 = 0xFD;
const OP_EXPIRETIME_MS: u8 = 0xFC;
const OP_EOF: u8 = 0xFF;
const OP_STRING: u8 = 0x00;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], RdbError> {
        if self.pos + n > self.buf.len() {
            return Err(RdbError::UnexpectedEof(self.pos));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, RdbError> {
        Ok(self.take(1)?[0])
    }

    fn eof(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Read a length-encoded integer (top two bits `00`/`01`/`10`); `11` is the caller's
    /// concern (special integer encodings only make sense inside `read_string`).
    fn read_length(&mut self) -> Result<u64, RdbError> {
        let b = self.take_u8()?;
        match b >> 6 {
            0b00 => Ok((b & 0x3F) as u64),
            0b01 => {
                let next = self.take_u8()?;
                Ok((((b & 0x3F) as u64) << 8) | next as u64)
            }
            0b10 => {
                let bytes = self.take(4)?;
                Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64)
            }
            _ => Err(RdbError::UnsupportedSpecialEncoding(b)),
        }
    }

    /// Read a length-encoded string, handling the three small-integer special encodings.
    fn read_string(&mut self) -> Result<Vec<u8>, RdbError> {
        let b = self.take_u8()?;
        if b >> 6 == 0b11 {
            let selector = b & 0x3F;
            let value: i64 = match selector {
                0 => self.take_u8()? as i8 as i64,
                1 => {
                    let bytes = self.take(2)?;
                    i16::from_le_bytes([bytes[0], bytes[1]]) as i64
                }
                2 => {
                    let bytes = self.take(4)?;
                    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64
                }
                other => return Err(RdbError::UnsupportedSpecialEncoding(0xC0 | other)),
            };
            return Ok(value.to_string().into_bytes());
        }
        self.pos -= 1;
        let len = self.read_length()? as usize;
        if len > self.buf.len().saturating_sub(self.pos) {
            return Err(RdbError::StringOverrun);
        }
        Ok(self.take(len)?.to_vec())
    }
}

/// Parse a complete in-memory RDB image, returning the (key, payload, expires_at) triples it
/// contains. Expired-in-the-past entries are dropped during parsing, not inserted.
pub fn parse_bytes(buf: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>, Option<i64>)>, RdbError> {
    if buf.len() < 9 {
        return Err(RdbError::TruncatedHeader);
    }
    if &buf[0..5] != MAGIC {
        return Err(RdbError::BadMagic);
    }
    let mut cursor = Cursor::new(&buf[9..]);
    let mut out = Vec::new();
    let mut pending_expiry: Option<i64> = None;
    let now = now_ms();

    loop {
        if cursor.eof() {
            break;
        }
        let opcode = cursor.take_u8()?;
        match opcode {
            OP_EOF => break,
            OP_AUX => {
                cursor.read_string()?;
                cursor.read_string()?;
            }
            OP_SELECTDB => {
                cursor.read_length()?;
            }
            OP_RESIZEDB => {
                cursor.read_length()?;
                cursor.read_length()?;
            }
            OP_EXPIRETIME => {
                let bytes = cursor.take(4)?;
                let seconds = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                pending_expiry = Some(seconds as i64 * 1000);
            }
            OP_EXPIRETIME_MS => {
                let bytes = cursor.take(8)?;
                let ms = u64::from_le_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
                ]);
                pending_expiry = Some(ms as i64);
            }
            OP_STRING => {
                let key = cursor.read_string()?;
                let value = cursor.read_string()?;
                let expires_at = pending_expiry.take();
                if let Some(expires_at) = expires_at {
                    if expires_at <= now {
                        continue;
                    }
                }
                out.push((key, value, expires_at));
            }
            other => return Err(RdbError::UnsupportedSpecialEncoding(other)),
        }
    }
    Ok(out)
}

/// Load `{dir}/{dbfilename}` into `keyspace`. A missing file is not an error: the keyspace
/// simply starts empty. A parse failure clears anything partially populated and logs a warning;
/// it never aborts startup.
pub fn load_into(keyspace: &Keyspace, dir: &str, dbfilename: &str) {
    let path = Path::new(dir).join(dbfilename);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::info!("no snapshot file at {}, starting with an empty keyspace", path.display());
            return;
        }
        Err(e) => {
            warn!("failed to read snapshot file {}: {}", path.display(), e);
            return;
        }
    };
    match parse_bytes(&bytes) {
        Ok(entries) => {
            let count = entries.len();
            for (key, payload, expires_at) in entries {
                keyspace.load(key, Entry { payload, expires_at });
            }
            log::info!("loaded {} keys from snapshot {}", count, path.display());
        }
        Err(e) => {
            warn!("failed to parse snapshot {}: {}, starting with an empty keyspace", path.display(), e);
            keyspace.flushdb();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<u8> {
        b"REDIS0011".to_vec()
    }

    #[test]
    fn empty_file_after_header_yields_no_keys() {
        let mut buf = header();
        buf.push(OP_EOF);
        let entries = parse_bytes(&buf).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn parses_simple_string_pair_with_six_bit_length() {
        let mut buf = header();
        buf.push(OP_STRING);
        buf.push(3);
        buf.extend_from_slice(b"foo");
        buf.push(3);
        buf.extend_from_slice(b"bar");
        buf.push(OP_EOF);
        let entries = parse_bytes(&buf).unwrap();
        assert_eq!(entries, vec![(b"foo".to_vec(), b"bar".to_vec(), None)]);
    }

    #[test]
    fn parses_expiry_ms_before_key_value() {
        let mut buf = header();
        buf.push(OP_EXPIRETIME_MS);
        let future = (now_ms() + 60_000) as u64;
        buf.extend_from_slice(&future.to_le_bytes());
        buf.push(OP_STRING);
        buf.push(1);
        buf.push(b'k');
        buf.push(1);
        buf.push(b'v');
        buf.push(OP_EOF);
        let entries = parse_bytes(&buf).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, b"k".to_vec());
        assert_eq!(entries[0].2, Some(future as i64));
    }

    #[test]
    fn past_expiry_is_dropped() {
        let mut buf = header();
        buf.push(OP_EXPIRETIME);
        buf.extend_from_slice(&100u32.to_le_bytes());
        buf.push(OP_STRING);
        buf.push(1);
        buf.push(b'k');
        buf.push(1);
        buf.push(b'v');
        buf.push(OP_EOF);
        let entries = parse_bytes(&buf).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn parses_14_bit_length() {
        let mut buf = header();
        buf.push(OP_STRING);
        let value = vec![b'x'; 300];
        let len = value.len() as u16;
        buf.push(0x40 | ((len >> 8) as u8 & 0x3F));
        buf.push((len & 0xFF) as u8);
        buf.extend_from_slice(&value);
        buf.push(1);
        buf.push(b'v');
        buf.push(OP_EOF);
        let entries = parse_bytes(&buf).unwrap();
        assert_eq!(entries[0].0, value);
    }

    #[test]
    fn parses_small_integer_special_encoding() {
        let mut buf = header();
        buf.push(OP_STRING);
        buf.push(1);
        buf.push(b'k');
        buf.push(0xC0);
        buf.push(42u8);
        buf.push(OP_EOF);
        let entries = parse_bytes(&buf).unwrap();
        assert_eq!(entries[0].1, b"42".to_vec());
    }

    #[test]
    fn unsupported_special_encoding_is_fatal() {
        let mut buf = header();
        buf.push(OP_STRING);
        buf.push(1);
        buf.push(b'k');
        buf.push(0xC3);
        let err = parse_bytes(&buf).unwrap_err();
        assert!(matches!(err, RdbError::UnsupportedSpecialEncoding(_)));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let buf = b"NOTREDIS1".to_vec();
        assert!(matches!(parse_bytes(&buf), Err(RdbError::BadMagic)));
    }

    #[test]
    fn aux_and_resizedb_opcodes_are_skipped() {
        let mut buf = header();
        buf.push(OP_AUX);
        buf.push(4);
        buf.extend_from_slice(b"name");
        buf.push(3);
        buf.extend_from_slice(b"1.0");
        buf.push(OP_SELECTDB);
        buf.push(0);
        buf.push(OP_RESIZEDB);
        buf.push(0);
        buf.push(0);
        buf.push(OP_STRING);
        buf.push(1);
        buf.push(b'k');
        buf.push(1);
        buf.push(b'v');
        buf.push(OP_EOF);
        let entries = parse_bytes(&buf).unwrap();
        assert_eq!(entries, vec![(b"k".to_vec(), b"v".to_vec(), None)]);
    }

    #[test]
    fn missing_file_loads_empty_without_error() {
        let keyspace = Keyspace::new();
        load_into(&keyspace, "/tmp", "definitely-does-not-exist.rdb");
        assert_eq!(keyspace.len(), 0);
    }

    #[test]
    fn load_into_populates_keyspace_from_file() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.rdb");
        let mut buf = header();
        buf.push(OP_STRING);
        buf.push(3);
        buf.extend_from_slice(b"foo");
        buf.push(3);
        buf.extend_from_slice(b"bar");
        buf.push(OP_EOF);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&buf).unwrap();

        let keyspace = Keyspace::new();
        load_into(&keyspace, dir.path().to_str().unwrap(), "dump.rdb");
        assert_eq!(keyspace.get(b"foo"), Some(b"bar".to_vec()));
    }
}
