use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::BytesMut;

use kvnode::client_handler::ClientHandler;
use kvnode::redis::{Redis, RedisConfig};
use kvnode::resp::{decode, encode, RespValue};

fn start_server(config: RedisConfig) -> (Arc<Redis>, std::net::SocketAddr) {
    let ctx = Arc::new(Redis::new(config));
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server_ctx = Arc::clone(&ctx);
    thread::spawn(move || {
        for stream in listener.incoming() {
            let stream = stream.unwrap();
            let ctx = Arc::clone(&server_ctx);
            thread::spawn(move || ClientHandler::new(stream, ctx).run());
        }
    });
    (ctx, addr)
}

fn send_and_read(stream: &mut TcpStream, buf: &mut BytesMut, command: RespValue) -> RespValue {
    stream.write_all(&encode(&command)).unwrap();
    read_one(stream, buf)
}

fn read_one(stream: &mut TcpStream, buf: &mut BytesMut) -> RespValue {
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(value) = decode(buf).unwrap() {
            return value;
        }
        let n = stream.read(&mut chunk).unwrap();
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Drive a connection through the follower-side handshake by hand (PING, REPLCONF x2,
/// PSYNC) and drain the RDB payload, returning the now-promoted connection and its buffer.
fn perform_psync(stream: &mut TcpStream) -> BytesMut {
    let mut buf = BytesMut::new();
    assert_eq!(
        send_and_read(stream, &mut buf, RespValue::array_of_bulk_strings(["PING"])),
        RespValue::SimpleString("PONG".to_string())
    );
    assert_eq!(
        send_and_read(
            stream,
            &mut buf,
            RespValue::array_of_bulk_strings(["REPLCONF", "listening-port", "6380"])
        ),
        RespValue::ok()
    );
    assert_eq!(
        send_and_read(
            stream,
            &mut buf,
            RespValue::array_of_bulk_strings(["REPLCONF", "capa", "psync2"])
        ),
        RespValue::ok()
    );

    stream
        .write_all(&encode(&RespValue::array_of_bulk_strings(["PSYNC", "?", "-1"])))
        .unwrap();
    match read_one(stream, &mut buf) {
        RespValue::SimpleString(s) => assert!(s.starts_with("FULLRESYNC ")),
        other => panic!("expected FULLRESYNC, got {:?}", other),
    }

    // Drain the RDB length header + payload by hand (no trailing CRLF, so it isn't a RESP value).
    loop {
        if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
            let len: usize = std::str::from_utf8(&buf[1..pos]).unwrap().parse().unwrap();
            let needed = pos + 2 + len;
            while buf.len() < needed {
                let mut chunk = [0u8; 4096];
                let n = stream.read(&mut chunk).unwrap();
                buf.extend_from_slice(&chunk[..n]);
            }
            let _ = buf.split_to(needed);
            break;
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).unwrap();
        buf.extend_from_slice(&chunk[..n]);
    }
    buf
}

#[test]
fn follower_receives_propagated_write_after_psync() {
    let (ctx, addr) = start_server(RedisConfig::new());
    let mut follower = TcpStream::connect(addr).unwrap();
    let mut buf = perform_psync(&mut follower);
    assert_eq!(ctx.replication.follower_count(), 1);

    let mut client = TcpStream::connect(addr).unwrap();
    let mut client_buf = BytesMut::new();
    assert_eq!(
        send_and_read(&mut client, &mut client_buf, RespValue::array_of_bulk_strings(["SET", "a", "1"])),
        RespValue::ok()
    );

    match read_one(&mut follower, &mut buf) {
        RespValue::Array(parts) => {
            assert_eq!(
                parts,
                vec![
                    RespValue::bulk_from_str("SET"),
                    RespValue::bulk_from_str("a"),
                    RespValue::bulk_from_str("1"),
                ]
            );
        }
        other => panic!("expected the propagated SET, got {:?}", other),
    }
}

#[test]
fn write_propagation_is_followed_by_an_automatic_getack() {
    let (_ctx, addr) = start_server(RedisConfig::new());
    let mut follower = TcpStream::connect(addr).unwrap();
    let mut follower_buf = perform_psync(&mut follower);

    let mut client = TcpStream::connect(addr).unwrap();
    let mut client_buf = BytesMut::new();
    send_and_read(&mut client, &mut client_buf, RespValue::array_of_bulk_strings(["SET", "a", "1"]));

    match read_one(&mut follower, &mut follower_buf) {
        RespValue::Array(parts) => assert_eq!(parts[0], RespValue::bulk_from_str("SET")),
        other => panic!("expected the propagated SET, got {:?}", other),
    }
    match read_one(&mut follower, &mut follower_buf) {
        RespValue::Array(parts) => {
            assert_eq!(parts[0], RespValue::bulk_from_str("REPLCONF"));
            assert_eq!(parts[1], RespValue::bulk_from_str("GETACK"));
        }
        other => panic!("expected REPLCONF GETACK, got {:?}", other),
    }
}

#[test]
fn wait_returns_follower_count_once_acked() {
    let (ctx, addr) = start_server(RedisConfig::new());
    let mut follower = TcpStream::connect(addr).unwrap();
    let mut follower_buf = perform_psync(&mut follower);

    let mut client = TcpStream::connect(addr).unwrap();
    let mut client_buf = BytesMut::new();
    send_and_read(&mut client, &mut client_buf, RespValue::array_of_bulk_strings(["SET", "a", "1"]));

    // Drain the propagated write and the automatic GETACK that follows it on the fan-out queue.
    let _ = read_one(&mut follower, &mut follower_buf);
    let _ = read_one(&mut follower, &mut follower_buf);

    let offset = ctx.replication.master_repl_offset();
    follower
        .write_all(&encode(&RespValue::array_of_bulk_strings(["REPLCONF", "ACK", &offset.to_string()])))
        .unwrap();

    // Give the server a moment to process the ACK before WAIT samples last_ack_offset.
    thread::sleep(Duration::from_millis(20));

    let reply = send_and_read(&mut client, &mut client_buf, RespValue::array_of_bulk_strings(["WAIT", "1", "1000"]));
    assert_eq!(reply, RespValue::Integer(1));
}
