pub mod commands;
pub mod config;
pub mod error;
pub mod follower_handshake;
pub mod rdb;
pub mod replica;
pub mod replication;
pub mod storage;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use rand::Rng;

pub use commands::RedisCommand;
pub use config::RedisConfig;
use error::CommandError;
pub use replication::ReplicationManager;
use storage::Keyspace;

use crate::resp::RespValue;

fn generate_replid() -> String {
    let mut rng = rand::thread_rng();
    (0..40)
        .map(|_| {
            let digit = rng.gen_range(0..16);
            std::char::from_digit(digit, 16).unwrap()
        })
        .collect()
}

/// What the dispatcher should do after running a command: reply to the client, stay silent
/// (REPLCONF ACK has no reply), or promote the connection into a follower session.
pub enum Outcome {
    Reply(RespValue),
    NoReply,
    BecomeFollower { fullresync_reply: RespValue, rdb_payload: Vec<u8> },
}

/// The server's shared state: configuration, keyspace, and replication bookkeeping. One
/// instance is created at startup and handed to every connection worker behind an `Arc`.
pub struct Redis {
    pub config: RedisConfig,
    pub keyspace: Keyspace,
    pub replication: Arc<ReplicationManager>,
    pub replid: String,
    /// Follower-side only: bytes of the replicated command stream consumed since end-of-RDB.
    pub processed_offset: AtomicI64,
}

impl Redis {
    pub fn new(config: RedisConfig) -> Self {
        let replication = Arc::new(ReplicationManager::new());
        replication.start_fanout_loop();
        Redis {
            config,
            keyspace: Keyspace::new(),
            replication,
            replid: generate_replid(),
            processed_offset: AtomicI64::new(0),
        }
    }

    pub fn load_snapshot(&self) {
        rdb::load_into(&self.keyspace, &self.config.dir, &self.config.dbfilename);
    }

    pub fn processed_offset(&self) -> i64 {
        self.processed_offset.load(Ordering::SeqCst)
    }

    pub fn add_processed_offset(&self, bytes: i64) {
        self.processed_offset.fetch_add(bytes, Ordering::SeqCst);
    }

    /// Execute a parsed command. `peer_id` identifies the connection for REPLCONF ACK
    /// bookkeeping (the `host:port` the follower registered under at PSYNC time).
    pub fn execute(&self, command: &RedisCommand, peer_id: Option<&str>) -> Outcome {
        match command {
            RedisCommand::Ping => Outcome::Reply(RespValue::SimpleString("PONG".to_string())),
            RedisCommand::Echo(data) => Outcome::Reply(RespValue::BulkString(data.clone())),
            RedisCommand::Get(key) => match self.keyspace.get(key) {
                Some(value) => Outcome::Reply(RespValue::BulkString(value)),
                None => Outcome::Reply(RespValue::NullBulkString),
            },
            RedisCommand::Set { key, value, px } => {
                let expires_at = px.map(|ms| current_time_ms() + ms);
                self.keyspace.set(key.clone(), value.clone(), expires_at);
                Outcome::Reply(RespValue::ok())
            }
            RedisCommand::Del(key) => {
                let existed = self.keyspace.del(key);
                Outcome::Reply(RespValue::Integer(if existed { 1 } else { 0 }))
            }
            RedisCommand::Keys => {
                let keys = self.keyspace.keys_all();
                Outcome::Reply(RespValue::Array(
                    keys.into_iter().map(RespValue::BulkString).collect(),
                ))
            }
            RedisCommand::ConfigGet(param) => {
                let value = match std::str::from_utf8(param).unwrap_or("") {
                    "dir" => Some(self.config.dir.clone()),
                    "dbfilename" => Some(self.config.dbfilename.clone()),
                    _ => None,
                };
                match value {
                    Some(value) => Outcome::Reply(RespValue::Array(vec![
                        RespValue::BulkString(param.clone()),
                        RespValue::bulk_from_str(value),
                    ])),
                    None => Outcome::Reply(RespValue::NullBulkString),
                }
            }
            RedisCommand::InfoReplication => {
                let body = if self.config.is_replica() {
                    format!(
                        "role:slave\r\nmaster_replid:{}\r\nmaster_repl_offset:{}",
                        self.replid,
                        self.replication.master_repl_offset()
                    )
                } else {
                    format!(
                        "role:master\r\nmaster_replid:{}\r\nmaster_repl_offset:{}",
                        self.replid,
                        self.replication.master_repl_offset()
                    )
                };
                Outcome::Reply(RespValue::bulk_from_str(body))
            }
            RedisCommand::ReplconfListeningPort(_) | RedisCommand::ReplconfCapa(_) => {
                Outcome::Reply(RespValue::ok())
            }
            RedisCommand::ReplconfGetack => {
                let offset = self.processed_offset();
                Outcome::Reply(RespValue::Array(vec![
                    RespValue::bulk_from_str("REPLCONF"),
                    RespValue::bulk_from_str("ACK"),
                    RespValue::bulk_from_str(offset.to_string()),
                ]))
            }
            RedisCommand::ReplconfAck(offset) => {
                if let Some(peer_id) = peer_id {
                    self.replication.update_ack_offset(peer_id, *offset);
                }
                Outcome::NoReply
            }
            RedisCommand::Psync => {
                let offset = self.replication.master_repl_offset();
                let fullresync_reply =
                    RespValue::SimpleString(format!("FULLRESYNC {} {}", self.replid, offset));
                Outcome::BecomeFollower {
                    fullresync_reply,
                    rdb_payload: empty_rdb_payload(),
                }
            }
            RedisCommand::Wait { numreplicas, timeout_ms } => {
                let count = self.replication.wait(*numreplicas, *timeout_ms);
                Outcome::Reply(RespValue::Integer(count as i64))
            }
        }
    }
}

fn current_time_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

/// A minimal but valid empty RDB image, used as the FULLRESYNC payload: this server's snapshot
/// reader is read-only and this process has nothing of its own to persist.
fn empty_rdb_payload() -> Vec<u8> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    const EMPTY_RDB_BASE64: &str =
        "UkVESVMwMDEx+glyZWRpcy12ZXIFNy4yLjD6CnJlZGlzLWJpdHPAQPoFY3RpbWXCbQi8ZfoIdXNlZC1tZW3CsMQQAPoIYW9mLWJhc2XAAP/wbjv+wP9aog==";
    STANDARD.decode(EMPTY_RDB_BASE64).expect("embedded empty RDB payload is valid base64")
}

pub fn parse_command(parts: &[Vec<u8>]) -> Result<RedisCommand, CommandError> {
    commands::parse(parts)
}
