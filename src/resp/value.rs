/// A single RESP value, as read off or written to the wire.
///
/// `BulkString` and `Array` carry owned bytes/elements rather than borrowing from the
/// input buffer: replies are assembled piecemeal (reading storage, formatting numbers)
/// and commands outlive the buffer they were parsed from once queued for replication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Vec<u8>),
    NullBulkString,
    Array(Vec<RespValue>),
    NullArray,
}

impl RespValue {
    pub fn bulk_from_str(s: impl Into<String>) -> Self {
        RespValue::BulkString(s.into().into_bytes())
    }

    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn array_of_bulk_strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RespValue::Array(
            items
                .into_iter()
                .map(|s| RespValue::bulk_from_str(s))
                .collect(),
        )
    }
}
