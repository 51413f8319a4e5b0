use std::net::TcpStream;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

/// The leader's view of one connected follower: its writable stream half and the last
/// offset it has acknowledged via `REPLCONF ACK`.
pub struct Follower {
    pub id: String,
    pub stream: Mutex<TcpStream>,
    last_ack_offset: AtomicI64,
}

impl Follower {
    pub fn new(id: String, stream: TcpStream) -> Self {
        Follower {
            id,
            stream: Mutex::new(stream),
            last_ack_offset: AtomicI64::new(0),
        }
    }

    pub fn last_ack_offset(&self) -> i64 {
        self.last_ack_offset.load(Ordering::SeqCst)
    }

    pub fn set_last_ack_offset(&self, offset: i64) {
        self.last_ack_offset.store(offset, Ordering::SeqCst);
    }
}
