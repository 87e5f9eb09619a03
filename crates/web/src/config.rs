//! Server configuration from the command line.
//!
//! ```text
//! coro-server [--port N] [--backlog N] [--reuse-port] [--log-level L]
//!             [--header-timeout SECS] [--keep-alive SECS]
//!             [--body-timeout SECS] [--write-timeout SECS] [ADDR...]
//! ```

use std::time::Duration;

use thiserror::Error;
use tracing::Level;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 2345;
pub const DEFAULT_BACKLOG: i32 = 50;

pub const USAGE: &str = "\
usage: coro-server [OPTIONS] [ADDR...]

Listens on every ADDR (IPv4, or IPv6 with an optional %interface suffix),
127.0.0.1 when none is given.

options:
  --port N              port to listen on (default 2345)
  --backlog N           listen backlog (default 50)
  --reuse-port          set SO_REUSEPORT so several servers share the port
  --log-level L         trace, debug, info, warn or error (default info)
  --header-timeout S    seconds to receive the first request head (default 10)
  --keep-alive S        idle seconds between requests (default 60)
  --body-timeout S      seconds to receive a request body (default 30)
  --write-timeout S     seconds to write a response (default 30)
  -h, --help            print this text";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("option {flag} needs a value")]
    MissingValue { flag: String },

    #[error("invalid value {value:?} for option {flag}")]
    InvalidValue { flag: String, value: String },

    #[error("unknown option {0}")]
    UnknownOption(String),

    #[error("help requested")]
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addresses: Vec<String>,
    pub port: u16,
    pub backlog: i32,
    pub reuse_port: bool,
    pub log_level: Level,
    pub header_timeout: Duration,
    pub keep_alive_timeout: Duration,
    pub body_timeout: Duration,
    pub write_timeout: Duration,
    /// Resolution of the deadline wheel.
    pub timer_granularity: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addresses: vec![DEFAULT_ADDRESS.to_string()],
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
            reuse_port: false,
            log_level: Level::INFO,
            header_timeout: Duration::from_secs(10),
            keep_alive_timeout: Duration::from_secs(60),
            body_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            timer_granularity: Duration::from_millis(100),
        }
    }
}

impl ServerConfig {
    /// Parses command line arguments, program name excluded.
    pub fn from_args<I, S>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = Self::default();
        let mut addresses = Vec::new();
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-h" | "--help" => return Err(ConfigError::Help),
                "--reuse-port" => config.reuse_port = true,
                "--port" => config.port = parse_value(&arg, args.next())?,
                "--backlog" => config.backlog = parse_value(&arg, args.next())?,
                "--log-level" => config.log_level = parse_value(&arg, args.next())?,
                "--header-timeout" => config.header_timeout = Duration::from_secs(parse_value(&arg, args.next())?),
                "--keep-alive" => config.keep_alive_timeout = Duration::from_secs(parse_value(&arg, args.next())?),
                "--body-timeout" => config.body_timeout = Duration::from_secs(parse_value(&arg, args.next())?),
                "--write-timeout" => config.write_timeout = Duration::from_secs(parse_value(&arg, args.next())?),
                flag if flag.starts_with('-') && flag.len() > 1 => return Err(ConfigError::UnknownOption(arg)),
                _ => addresses.push(arg),
            }
        }

        if !addresses.is_empty() {
            config.addresses = addresses;
        }
        Ok(config)
    }

    /// Longest deadline any connection phase arms.
    pub fn max_timeout(&self) -> Duration {
        self.header_timeout.max(self.keep_alive_timeout).max(self.body_timeout).max(self.write_timeout)
    }
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T, ConfigError> {
    let value = value.ok_or_else(|| ConfigError::MissingValue { flag: flag.to_string() })?;
    value.parse().map_err(|_e| ConfigError::InvalidValue { flag: flag.to_string(), value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_arguments() {
        let config = ServerConfig::from_args(Vec::<String>::new()).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.addresses, vec!["127.0.0.1"]);
        assert_eq!(config.port, 2345);
        assert_eq!(config.backlog, 50);
    }

    #[test]
    fn options_and_addresses() {
        let config = ServerConfig::from_args([
            "--port",
            "8080",
            "--reuse-port",
            "--log-level",
            "debug",
            "--keep-alive",
            "5",
            "0.0.0.0",
            "::1",
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert!(config.reuse_port);
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.keep_alive_timeout, Duration::from_secs(5));
        assert_eq!(config.addresses, vec!["0.0.0.0", "::1"]);
        assert_eq!(config.max_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn reports_bad_input() {
        assert_eq!(
            ServerConfig::from_args(["--port"]),
            Err(ConfigError::MissingValue { flag: "--port".to_string() })
        );
        assert_eq!(
            ServerConfig::from_args(["--backlog", "many"]),
            Err(ConfigError::InvalidValue { flag: "--backlog".to_string(), value: "many".to_string() })
        );
        assert_eq!(ServerConfig::from_args(["--verbose"]), Err(ConfigError::UnknownOption("--verbose".to_string())));
        assert_eq!(ServerConfig::from_args(["-h"]), Err(ConfigError::Help));
    }
}
