use thiserror::Error;

/// Malformed input on the wire. Always fatal to the connection that produced it.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid RESP type prefix '{0}' at offset {1}")]
    InvalidPrefix(char, usize),
    #[error("invalid length '{0}' in RESP frame")]
    InvalidLength(String),
    #[error("RESP frame is missing its trailing CRLF")]
    MissingTerminator,
    #[error("a command array must contain only bulk strings")]
    NonBulkStringInCommand,
    #[error("empty command array")]
    EmptyCommand,
}

/// A recognized command with bad arguments. Reported to the client; the connection stays open.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),
    #[error("ERR PX value must be an integer")]
    InvalidPx,
    #[error("ERR unknown command")]
    Unknown,
    #[error("ERR {0}")]
    Other(String),
}

impl CommandError {
    /// Render as the exact RESP error body (without the leading `-` or trailing CRLF).
    pub fn reply_message(&self) -> String {
        self.to_string()
    }
}

/// Failure parsing a pre-existing RDB snapshot. Always non-fatal to the process: the caller
/// clears whatever was parsed so far and falls back to an empty keyspace.
#[derive(Debug, Error)]
pub enum RdbError {
    #[error("file too short to contain a valid header")]
    TruncatedHeader,
    #[error("missing REDIS magic header")]
    BadMagic,
    #[error("unexpected end of buffer while parsing opcode at offset {0}")]
    UnexpectedEof(usize),
    #[error("unsupported length-encoding special marker {0:#04x}")]
    UnsupportedSpecialEncoding(u8),
    #[error("string length exceeds remaining buffer size")]
    StringOverrun,
    #[error("I/O error reading snapshot file: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure talking to a replication peer (leader <-> follower). Always logged and the peer
/// (or the whole follower session, if this is the follower's own master link) is dropped.
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("I/O error on replication link: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected reply from master during handshake: expected {expected}, got {got}")]
    UnexpectedHandshakeReply { expected: String, got: String },
    #[error("master closed the connection during handshake")]
    HandshakeClosed,
    #[error("protocol error while applying replicated stream: {0}")]
    Protocol(#[from] ProtocolError),
}
