use super::value::RespValue;

/// Serialize a value to its exact RESP wire form.
pub fn encode(value: &RespValue) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &RespValue, out: &mut Vec<u8>) {
    match value {
        RespValue::SimpleString(s) => {
            out.push(b'+');
            out.extend_from_slice(s.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        RespValue::Error(s) => {
            out.push(b'-');
            out.extend_from_slice(s.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        RespValue::Integer(i) => {
            out.push(b':');
            out.extend_from_slice(i.to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        RespValue::BulkString(bytes) => {
            out.push(b'$');
            out.extend_from_slice(bytes.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(bytes);
            out.extend_from_slice(b"\r\n");
        }
        RespValue::NullBulkString => out.extend_from_slice(b"$-1\r\n"),
        RespValue::NullArray => out.extend_from_slice(b"*-1\r\n"),
        RespValue::Array(elements) => {
            out.push(b'*');
            out.extend_from_slice(elements.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
            for element in elements {
                encode_into(element, out);
            }
        }
    }
}

/// Frame a raw RDB payload as `$<len>\r\n<bytes>` with no trailing CRLF, per the FULLRESYNC
/// handshake: the payload is not itself a RESP bulk string, it only borrows the length prefix.
pub fn encode_rdb_payload(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 16);
    out.push(b'$');
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(bytes);
    out
}
