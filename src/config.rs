use std::path::PathBuf;

use clap::Parser;

/// Server settings. Every flag falls back to a `BOOKWELL_*` environment variable.
#[derive(Parser, Debug, Clone)]
#[command(name = "bookwell", version, about = "Resource booking server speaking the PostgreSQL wire protocol")]
pub struct Config {
    #[arg(long, env = "BOOKWELL_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    #[arg(long, env = "BOOKWELL_PORT", default_value_t = 5433)]
    pub port: u16,

    /// Directory holding the write-ahead log.
    #[arg(long, env = "BOOKWELL_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    #[arg(long, env = "BOOKWELL_MAX_CONNECTIONS", default_value_t = 256)]
    pub max_connections: usize,

    /// WAL appends accumulated before the compactor rewrites the log.
    #[arg(long, env = "BOOKWELL_COMPACT_THRESHOLD", default_value_t = 1000)]
    pub compact_threshold: u64,

    /// Serve Prometheus metrics on this port. Disabled when unset.
    #[arg(long, env = "BOOKWELL_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookwell.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::try_parse_from(["bookwell"]).unwrap();
        assert_eq!(config.port, 5433);
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.wal_path(), PathBuf::from("./data/bookwell.wal"));
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::try_parse_from([
            "bookwell",
            "--bind",
            "127.0.0.1",
            "--port",
            "6543",
            "--data-dir",
            "/var/lib/bookwell",
            "--metrics-port",
            "9100",
        ])
        .unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:6543");
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/bookwell/bookwell.wal"));
        assert_eq!(config.metrics_port, Some(9100));
    }

    #[test]
    fn rejects_bad_port() {
        assert!(Config::try_parse_from(["bookwell", "--port", "70000"]).is_err());
    }
}
