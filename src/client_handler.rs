use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;

use bytes::BytesMut;
use log::{debug, error, info, warn};

use crate::redis::{commands, Outcome, Redis, RedisCommand};
use crate::resp::{decode_command, encode, encode_rdb_payload, RespValue};

/// One thread per accepted connection. Frames commands off the socket, dispatches them
/// against the shared `Redis` context, and writes replies back in request order. A
/// successful `PSYNC` promotes the connection into a follower session: from then on it
/// produces no client-visible replies, only consuming propagated writes and GETACK.
pub struct ClientHandler {
    stream: TcpStream,
    ctx: Arc<Redis>,
    peer_id: String,
}

impl ClientHandler {
    pub fn new(stream: TcpStream, ctx: Arc<Redis>) -> Self {
        let peer_id = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        ClientHandler { stream, ctx, peer_id }
    }

    pub fn spawn(self) -> thread::JoinHandle<()> {
        thread::spawn(move || self.run())
    }

    pub fn run(mut self) {
        info!("accepted connection from {}", self.peer_id);
        let mut buf = BytesMut::new();
        let mut read_buf = [0u8; 4096];
        let mut is_follower = false;

        loop {
            loop {
                match decode_command(&mut buf) {
                    Ok(Some(parts)) => {
                        if self.handle_command(&parts, &mut is_follower).is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("protocol error from {}: {}, closing connection", self.peer_id, e);
                        let _ = self
                            .stream
                            .write_all(&encode(&RespValue::Error(format!("ERR {}", e))));
                        return;
                    }
                }
            }

            match self.stream.read(&mut read_buf) {
                Ok(0) => {
                    info!("connection from {} closed", self.peer_id);
                    return;
                }
                Ok(n) => buf.extend_from_slice(&read_buf[..n]),
                Err(e) => {
                    error!("error reading from {}: {}", self.peer_id, e);
                    return;
                }
            }
        }
    }

    /// Process one decoded command. Returns `Err(())` to signal the connection must close
    /// (a write to the client failed).
    fn handle_command(&mut self, parts: &[Vec<u8>], is_follower: &mut bool) -> Result<(), ()> {
        debug!("{} -> {:?}", self.peer_id, String::from_utf8_lossy(&parts[0]));

        let command = match commands::parse(parts) {
            Ok(command) => command,
            Err(e) => {
                if *is_follower {
                    return Ok(());
                }
                return self.write_reply(&RespValue::Error(e.reply_message()));
            }
        };

        let is_write = commands::is_write(&command);
        let outcome = self.ctx.execute(&command, Some(&self.peer_id));

        if is_write {
            let raw = encode(&RespValue::Array(
                parts.iter().cloned().map(RespValue::BulkString).collect(),
            ));
            self.ctx.replication.propagate(&raw);
        }

        match outcome {
            Outcome::Reply(reply) => {
                if *is_follower {
                    return Ok(());
                }
                self.write_reply(&reply)
            }
            Outcome::NoReply => Ok(()),
            Outcome::BecomeFollower { fullresync_reply, rdb_payload } => {
                self.write_reply(&fullresync_reply)?;
                if self.stream.write_all(&encode_rdb_payload(&rdb_payload)).is_err() {
                    return Err(());
                }
                if let Ok(clone) = self.stream.try_clone() {
                    self.ctx.replication.add_follower(self.peer_id.clone(), clone);
                    info!("{} promoted to follower after PSYNC", self.peer_id);
                    *is_follower = true;
                }
                Ok(())
            }
        }
    }

    fn write_reply(&mut self, reply: &RespValue) -> Result<(), ()> {
        self.stream.write_all(&encode(reply)).map_err(|e| {
            warn!("error writing reply to {}: {}", self.peer_id, e);
        })
    }
}
