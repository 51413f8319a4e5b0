use log::warn;

pub const DEFAULT_PORT: u16 = 6379;

/// Server configuration. Populated once at startup from CLI flags and otherwise immutable;
/// handed out as a plain clone (it is small) rather than read from a global.
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub port: u16,
    pub addr: String,
    pub replicaof_host: Option<String>,
    pub replicaof_port: Option<String>,
    pub dir: String,
    pub dbfilename: String,
}

impl RedisConfig {
    pub fn new() -> Self {
        RedisConfig {
            port: DEFAULT_PORT,
            addr: "0.0.0.0".to_string(),
            replicaof_host: None,
            replicaof_port: None,
            dir: ".".to_string(),
            dbfilename: "dump.rdb".to_string(),
        }
    }

    pub fn is_replica(&self) -> bool {
        self.replicaof_host.is_some()
    }

    /// Parse `--dir`, `--dbfilename`, `--port` and `--replicaof` out of a raw argv slice
    /// (argv[0] included, ignored). Unknown flags are ignored; an invalid `--port` value
    /// falls back to the default rather than aborting startup.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = RedisConfig::new();
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--dir" => {
                    if let Some(value) = args.get(i + 1) {
                        config.dir = value.clone();
                        i += 2;
                    } else {
                        warn!("--dir given without a value, ignoring");
                        i += 1;
                    }
                }
                "--dbfilename" => {
                    if let Some(value) = args.get(i + 1) {
                        config.dbfilename = value.clone();
                        i += 2;
                    } else {
                        warn!("--dbfilename given without a value, ignoring");
                        i += 1;
                    }
                }
                "--port" => {
                    if let Some(value) = args.get(i + 1) {
                        match value.parse::<u16>() {
                            Ok(port) => config.port = port,
                            Err(_) => {
                                warn!("invalid --port value '{}', falling back to {}", value, DEFAULT_PORT);
                                config.port = DEFAULT_PORT;
                            }
                        }
                        i += 2;
                    } else {
                        warn!("--port given without a value, ignoring");
                        i += 1;
                    }
                }
                "--replicaof" => {
                    if let Some(value) = args.get(i + 1) {
                        let parts: Vec<&str> = value.split_whitespace().collect();
                        if parts.len() == 2 {
                            config.replicaof_host = Some(parts[0].to_string());
                            config.replicaof_port = Some(parts[1].to_string());
                        } else {
                            warn!("--replicaof expects \"<host> <port>\", got '{}'", value);
                        }
                        i += 2;
                    } else {
                        warn!("--replicaof given without a value, ignoring");
                        i += 1;
                    }
                }
                _ => {
                    i += 1;
                }
            }
        }
        config
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_master_on_default_port() {
        let config = RedisConfig::new();
        assert_eq!(config.port, 6379);
        assert!(!config.is_replica());
        assert_eq!(config.dbfilename, "dump.rdb");
    }

    #[test]
    fn parses_dir_dbfilename_and_port() {
        let args = ["kvnode", "--dir", "/tmp/data", "--dbfilename", "snap.rdb", "--port", "7000"];
        let config = RedisConfig::from_args(args);
        assert_eq!(config.dir, "/tmp/data");
        assert_eq!(config.dbfilename, "snap.rdb");
        assert_eq!(config.port, 7000);
    }

    #[test]
    fn invalid_port_falls_back_to_default() {
        let args = ["kvnode", "--port", "not-a-number"];
        let config = RedisConfig::from_args(args);
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn replicaof_marks_server_as_follower() {
        let args = ["kvnode", "--replicaof", "localhost 6380"];
        let config = RedisConfig::from_args(args);
        assert!(config.is_replica());
        assert_eq!(config.replicaof_host.as_deref(), Some("localhost"));
        assert_eq!(config.replicaof_port.as_deref(), Some("6380"));
    }

    #[test]
    fn malformed_replicaof_is_ignored() {
        let args = ["kvnode", "--replicaof", "justhost"];
        let config = RedisConfig::from_args(args);
        assert!(!config.is_replica());
    }
}
