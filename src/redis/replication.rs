use std::collections::HashMap;
use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::warn;

use super::replica::Follower;
use crate::resp::{encode, RespValue};

const GETACK_POLL_INTERVAL: Duration = Duration::from_millis(10);

fn getack_command() -> Vec<u8> {
    encode(&RespValue::Array(vec![
        RespValue::bulk_from_str("REPLCONF"),
        RespValue::bulk_from_str("GETACK"),
        RespValue::bulk_from_str("*"),
    ]))
}

/// Leader-side replication bookkeeping: the connected follower set, the running
/// `master_repl_offset`, and a fan-out queue decoupling writers from slow follower I/O.
///
/// Propagation goes through an unbounded `crossbeam_channel`: a write command bumps
/// `master_repl_offset` and enqueues its bytes under the same `followers` lock, then a single
/// background thread drains the queue and performs the (possibly slow) socket writes. A writer
/// never blocks on a follower's socket.
pub struct ReplicationManager {
    followers: Mutex<HashMap<String, Arc<Follower>>>,
    master_repl_offset: AtomicI64,
    sender: Sender<Vec<u8>>,
    receiver: Receiver<Vec<u8>>,
}

impl ReplicationManager {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        ReplicationManager {
            followers: Mutex::new(HashMap::new()),
            master_repl_offset: AtomicI64::new(0),
            sender,
            receiver,
        }
    }

    /// Spawn the background fan-out loop. Must be called once, after the manager is wrapped
    /// in the `Arc` it will live in for the life of the process.
    pub fn start_fanout_loop(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        thread::spawn(move || {
            while let Ok(bytes) = manager.receiver.recv() {
                manager.write_to_all_followers(&bytes);
            }
        });
    }

    fn write_to_all_followers(&self, bytes: &[u8]) {
        let mut followers = self.followers.lock().unwrap();
        let mut dead = Vec::new();
        for (id, follower) in followers.iter() {
            let mut stream = follower.stream.lock().unwrap();
            if let Err(e) = stream.write_all(bytes) {
                warn!("dropping follower {} after write error: {}", id, e);
                dead.push(id.clone());
            }
        }
        for id in dead {
            followers.remove(&id);
        }
    }

    /// Record a new follower session (after a successful PSYNC handshake).
    pub fn add_follower(&self, id: String, stream: TcpStream) {
        let follower = Arc::new(Follower::new(id.clone(), stream));
        self.followers.lock().unwrap().insert(id, follower);
    }

    pub fn follower_count(&self) -> usize {
        self.followers.lock().unwrap().len()
    }

    pub fn master_repl_offset(&self) -> i64 {
        self.master_repl_offset.load(Ordering::SeqCst)
    }

    /// Propagate a write command's exact RESP bytes to every follower and advance
    /// `master_repl_offset` by the number of bytes emitted. The offset bump and the enqueue
    /// happen under the same lock so a concurrent WAIT can never observe one without the other.
    /// A `REPLCONF GETACK *` follows right behind on the same fan-out queue, so followers'
    /// `last_ack_offset` advances on ordinary write traffic rather than only when a `WAIT`
    /// happens to probe for it.
    pub fn propagate(&self, bytes: &[u8]) {
        let _guard = self.followers.lock().unwrap();
        self.master_repl_offset.fetch_add(bytes.len() as i64, Ordering::SeqCst);
        let _ = self.sender.send(bytes.to_vec());
        let _ = self.sender.send(getack_command());
    }

    pub fn update_ack_offset(&self, follower_id: &str, offset: i64) {
        if let Some(follower) = self.followers.lock().unwrap().get(follower_id) {
            follower.set_last_ack_offset(offset);
        }
    }

    fn send_getack_to_all(&self) {
        self.write_to_all_followers(&getack_command());
    }

    fn count_caught_up(&self, target: i64) -> usize {
        self.followers
            .lock()
            .unwrap()
            .values()
            .filter(|f| f.last_ack_offset() >= target)
            .count()
    }

    /// Implements `WAIT numreplicas timeout_ms`. If no write has ever been propagated
    /// (`target == 0`), the connected follower count is returned directly (the common probe
    /// semantic), without sending GETACK or waiting.
    pub fn wait(&self, numreplicas: i64, timeout_ms: i64) -> usize {
        let target = self.master_repl_offset();
        if target == 0 {
            return self.follower_count();
        }
        self.send_getack_to_all();
        let deadline = Instant::now() + Duration::from_millis(timeout_ms.max(0) as u64);
        loop {
            let caught_up = self.count_caught_up(target);
            if caught_up as i64 >= numreplicas || Instant::now() >= deadline {
                return caught_up;
            }
            thread::sleep(GETACK_POLL_INTERVAL);
        }
    }
}

impl Default for ReplicationManager {
    fn default() -> Self {
        Self::new()
    }
}
