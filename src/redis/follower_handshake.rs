use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use bytes::BytesMut;
use log::{info, warn};

use super::error::ReplicationError;
use super::{Outcome, Redis};
use crate::resp::{decode, decode_command, encode, RespValue};

fn send_command(stream: &mut TcpStream, parts: &[&str]) -> Result<(), ReplicationError> {
    let command = RespValue::array_of_bulk_strings(parts.iter().map(|s| s.to_string()));
    stream.write_all(&encode(&command))?;
    Ok(())
}

/// Read bytes off `stream` into `buf` until `buf` holds at least one complete RESP value,
/// then decode and return it (leaving any trailing bytes in `buf` for later use).
fn read_one_reply(stream: &mut TcpStream, buf: &mut BytesMut) -> Result<RespValue, ReplicationError> {
    loop {
        if let Some(value) = decode(buf).map_err(ReplicationError::Protocol)? {
            return Ok(value);
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(ReplicationError::HandshakeClosed);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn expect_simple_string(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    expected: &str,
) -> Result<(), ReplicationError> {
    let reply = read_one_reply(stream, buf)?;
    match &reply {
        RespValue::SimpleString(s) if s == expected => Ok(()),
        other => Err(ReplicationError::UnexpectedHandshakeReply {
            expected: expected.to_string(),
            got: format!("{:?}", other),
        }),
    }
}

/// Read the FULLRESYNC reply, then the RDB payload framed as `$<len>\r\n<bytes>` with no
/// trailing CRLF, and return the payload bytes alongside the leader's starting offset.
fn read_fullresync_and_rdb(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
) -> Result<(String, i64, Vec<u8>), ReplicationError> {
    let reply = read_one_reply(stream, buf)?;
    let (replid, offset) = match &reply {
        RespValue::SimpleString(s) if s.starts_with("FULLRESYNC ") => {
            let mut parts = s["FULLRESYNC ".len()..].split(' ');
            let replid = parts.next().unwrap_or_default().to_string();
            let offset = parts.next().and_then(|s| s.parse::<i64>().ok()).unwrap_or(0);
            (replid, offset)
        }
        other => {
            return Err(ReplicationError::UnexpectedHandshakeReply {
                expected: "FULLRESYNC <replid> <offset>".to_string(),
                got: format!("{:?}", other),
            })
        }
    };

    // The RDB payload is `$<len>\r\n<bytes>` with no trailing CRLF, so it can't go through the
    // generic bulk-string decoder (which requires one). Parse the length prefix by hand.
    loop {
        if let Some(header_end) = find_crlf(buf) {
            if buf[0] != b'$' {
                return Err(ReplicationError::UnexpectedHandshakeReply {
                    expected: "RDB payload length prefix".to_string(),
                    got: format!("{:?}", &buf[..header_end]),
                });
            }
            let len: usize = std::str::from_utf8(&buf[1..header_end])
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| ReplicationError::UnexpectedHandshakeReply {
                    expected: "numeric RDB length".to_string(),
                    got: format!("{:?}", &buf[1..header_end]),
                })?;
            let payload_start = header_end + 2;
            while buf.len() < payload_start + len {
                let mut chunk = [0u8; 4096];
                let n = stream.read(&mut chunk)?;
                if n == 0 {
                    return Err(ReplicationError::HandshakeClosed);
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let payload = buf[payload_start..payload_start + len].to_vec();
            let _ = buf.split_to(payload_start + len);
            return Ok((replid, offset, payload));
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(ReplicationError::HandshakeClosed);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Perform the follower-side handshake against the configured master: connect, PING,
/// REPLCONF listening-port/capa, PSYNC, and consume the FULLRESYNC RDB image. On success
/// hands off to `apply_loop`, which never returns under normal operation.
pub fn run(ctx: Arc<Redis>) {
    let host = match &ctx.config.replicaof_host {
        Some(host) => host.clone(),
        None => return,
    };
    let port = ctx.config.replicaof_port.clone().unwrap_or_default();

    match handshake(&ctx, &host, &port) {
        Ok((stream, buf)) => {
            info!("replica handshake with {}:{} complete, entering apply loop", host, port);
            apply_loop(ctx, stream, buf);
        }
        Err(e) => {
            warn!("replica handshake with {}:{} failed: {}", host, port, e);
        }
    }
}

fn handshake(ctx: &Redis, host: &str, port: &str) -> Result<(TcpStream, BytesMut), ReplicationError> {
    let mut stream = TcpStream::connect(format!("{}:{}", host, port))?;
    let mut buf = BytesMut::new();

    send_command(&mut stream, &["PING"])?;
    expect_simple_string(&mut stream, &mut buf, "PONG")?;

    let own_port = ctx.config.port.to_string();
    send_command(&mut stream, &["REPLCONF", "listening-port", &own_port])?;
    expect_simple_string(&mut stream, &mut buf, "OK")?;

    send_command(&mut stream, &["REPLCONF", "capa", "psync2"])?;
    expect_simple_string(&mut stream, &mut buf, "OK")?;

    send_command(&mut stream, &["PSYNC", "?", "-1"])?;
    let (_replid, offset, _rdb) = read_fullresync_and_rdb(&mut stream, &mut buf)?;
    ctx.add_processed_offset(offset - ctx.processed_offset());

    Ok((stream, buf))
}

/// Consume the replicated command stream forever, applying SET/DEL to the local keyspace and
/// answering `REPLCONF GETACK *` with our own `processed_offset`. Never produces client-visible
/// replies: this connection exists purely to shadow the leader's writes.
fn apply_loop(ctx: Arc<Redis>, mut stream: TcpStream, mut buf: BytesMut) {
    loop {
        let command = match decode_command(&mut buf) {
            Ok(Some(parts)) => parts,
            Ok(None) => {
                let mut chunk = [0u8; 4096];
                match stream.read(&mut chunk) {
                    Ok(0) => {
                        warn!("master connection closed, stopping replication apply loop");
                        return;
                    }
                    Ok(n) => {
                        buf.extend_from_slice(&chunk[..n]);
                        continue;
                    }
                    Err(e) => {
                        warn!("error reading from master: {}", e);
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("protocol error in replicated stream: {}", e);
                return;
            }
        };

        let consumed_bytes = encode(&RespValue::Array(
            command.iter().cloned().map(RespValue::BulkString).collect(),
        ))
        .len();

        match super::parse_command(&command) {
            Ok(parsed @ (super::RedisCommand::Set { .. } | super::RedisCommand::Del(_))) => {
                ctx.execute(&parsed, None);
                ctx.add_processed_offset(consumed_bytes as i64);
            }
            Ok(super::RedisCommand::ReplconfGetack) => {
                ctx.add_processed_offset(consumed_bytes as i64);
                if let Outcome::Reply(reply) = ctx.execute(&super::RedisCommand::ReplconfGetack, None) {
                    if let Err(e) = stream.write_all(&encode(&reply)) {
                        warn!("error sending ACK to master: {}", e);
                        return;
                    }
                }
            }
            Ok(_) => {
                ctx.add_processed_offset(consumed_bytes as i64);
            }
            Err(e) => {
                warn!("unrecognized command in replicated stream, skipping: {}", e.reply_message());
                ctx.add_processed_offset(consumed_bytes as i64);
            }
        }
    }
}
