use super::error::CommandError;

/// A parsed client request. Only the commands this server understands; everything else is
/// captured at the dispatcher level as `-ERR unknown command`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisCommand {
    Ping,
    Echo(Vec<u8>),
    Set {
        key: Vec<u8>,
        value: Vec<u8>,
        px: Option<i64>,
    },
    Get(Vec<u8>),
    Del(Vec<u8>),
    Keys,
    ConfigGet(Vec<u8>),
    InfoReplication,
    ReplconfListeningPort(Vec<u8>),
    ReplconfCapa(Vec<u8>),
    ReplconfGetack,
    ReplconfAck(i64),
    Psync,
    Wait { numreplicas: i64, timeout_ms: i64 },
}

fn as_str(bytes: &[u8]) -> &str {
    std::str::from_utf8(bytes).unwrap_or("")
}

fn eq_ignore_case(bytes: &[u8], word: &str) -> bool {
    bytes.eq_ignore_ascii_case(word.as_bytes())
}

/// Parse one already-decoded command (the bulk-string parts of a RESP array) into a
/// `RedisCommand`, or a `CommandError` describing why it was rejected.
pub fn parse(parts: &[Vec<u8>]) -> Result<RedisCommand, CommandError> {
    let name = as_str(&parts[0]).to_ascii_uppercase();
    match name.as_str() {
        "PING" => Ok(RedisCommand::Ping),
        "ECHO" => {
            if parts.len() != 2 {
                return Err(CommandError::WrongArity("echo".to_string()));
            }
            Ok(RedisCommand::Echo(parts[1].clone()))
        }
        "SET" => {
            if parts.len() != 3 && parts.len() != 5 {
                return Err(CommandError::WrongArity("set".to_string()));
            }
            let key = parts[1].clone();
            let value = parts[2].clone();
            let px = if parts.len() == 5 {
                if !eq_ignore_case(&parts[3], "PX") {
                    return Err(CommandError::Other(format!(
                        "syntax error near '{}'",
                        as_str(&parts[3])
                    )));
                }
                let ms = as_str(&parts[4])
                    .parse::<i64>()
                    .map_err(|_| CommandError::InvalidPx)?;
                Some(ms)
            } else {
                None
            };
            Ok(RedisCommand::Set { key, value, px })
        }
        "GET" => {
            if parts.len() != 2 {
                return Err(CommandError::WrongArity("get".to_string()));
            }
            Ok(RedisCommand::Get(parts[1].clone()))
        }
        "DEL" => {
            if parts.len() < 2 {
                return Err(CommandError::WrongArity("del".to_string()));
            }
            Ok(RedisCommand::Del(parts[1].clone()))
        }
        "KEYS" => {
            if parts.len() != 2 {
                return Err(CommandError::WrongArity("keys".to_string()));
            }
            Ok(RedisCommand::Keys)
        }
        "CONFIG" => {
            if parts.len() != 3 || !eq_ignore_case(&parts[1], "GET") {
                return Err(CommandError::WrongArity("config".to_string()));
            }
            Ok(RedisCommand::ConfigGet(parts[2].clone()))
        }
        "INFO" => {
            // Only `INFO replication` is modeled; any argument (or none) returns the same view.
            Ok(RedisCommand::InfoReplication)
        }
        "REPLCONF" => {
            if parts.len() != 3 {
                return Err(CommandError::WrongArity("replconf".to_string()));
            }
            let sub = as_str(&parts[1]).to_ascii_lowercase();
            match sub.as_str() {
                "listening-port" => Ok(RedisCommand::ReplconfListeningPort(parts[2].clone())),
                "capa" => Ok(RedisCommand::ReplconfCapa(parts[2].clone())),
                "getack" => Ok(RedisCommand::ReplconfGetack),
                "ack" => {
                    let offset = as_str(&parts[2])
                        .parse::<i64>()
                        .map_err(|_| CommandError::Other("invalid ACK offset".to_string()))?;
                    Ok(RedisCommand::ReplconfAck(offset))
                }
                other => Err(CommandError::Other(format!("unknown REPLCONF subcommand '{}'", other))),
            }
        }
        "PSYNC" => {
            if parts.len() != 3 {
                return Err(CommandError::WrongArity("psync".to_string()));
            }
            Ok(RedisCommand::Psync)
        }
        "WAIT" => {
            if parts.len() != 3 {
                return Err(CommandError::WrongArity("wait".to_string()));
            }
            let numreplicas = as_str(&parts[1])
                .parse::<i64>()
                .map_err(|_| CommandError::Other("numreplicas is not an integer".to_string()))?;
            let timeout_ms = as_str(&parts[2])
                .parse::<i64>()
                .map_err(|_| CommandError::Other("timeout is not an integer".to_string()))?;
            Ok(RedisCommand::Wait { numreplicas, timeout_ms })
        }
        _ => Err(CommandError::Unknown),
    }
}

/// Whether this command mutates the Keyspace and must be propagated to followers.
pub fn is_write(command: &RedisCommand) -> bool {
    matches!(command, RedisCommand::Set { .. } | RedisCommand::Del(_))
}
