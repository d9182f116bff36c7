//! Configuration module.
//!
//! Centralized configuration loading from environment variables, one
//! sub-struct per concern.
//!
//! # Example
//!
//! ```rust,ignore
//! use php_world::config::Config;
//!
//! let config = Config::from_env()?;
//! config.log_summary();
//! ```

mod error;
mod parse;

pub use error::ConfigError;
pub use parse::{env_bool, env_opt, env_or, env_parse, parse_duration};

use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::time::Duration;

/// Complete application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub transport: TransportConfig,
    pub process: ProcessConfig,
    pub fpm: Option<FpmConfig>,
    pub logging: LoggingConfig,
}

/// Which way the bridge talks to PHP, and over what socket kind.
#[derive(Clone, Debug)]
pub enum TransportConfig {
    /// Spawn a `php` CLI child process.
    Cli { socket: SocketKind },
    /// Issue a FastCGI request to a PHP-FPM pool.
    Fpm { socket: SocketKind },
}

#[derive(Clone, Debug)]
pub enum SocketKind {
    UnixSocket(PathBuf),
    TcpLoopback,
}

#[derive(Clone, Debug)]
pub struct ProcessConfig {
    pub php_binary: PathBuf,
    pub extra_args: Vec<String>,
    pub init_file: Option<PathBuf>,
    pub stdout: StdoutDisposition,
    pub handshake_timeout: Duration,
}

/// What to do with PHP's raw (non-protocol) stdout.
#[derive(Clone, Debug)]
pub enum StdoutDisposition {
    /// Pass through to the embedder's own stdout.
    Inherit,
    /// Demultiplex via [`crate::stdout_mux::StdoutMux`], exposed through
    /// `Controller::stdout_reader`.
    PipedMux,
    Null,
    Fd(RawFd),
}

#[derive(Clone, Debug)]
pub struct FpmConfig {
    pub pool_address: FpmAddress,
    pub bootstrap_script_path: PathBuf,
}

#[derive(Clone, Debug)]
pub enum FpmAddress {
    UnixSocket(PathBuf),
    Tcp(SocketAddr),
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub json: bool,
    pub filter: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let transport_kind = env_or("PHP_WORLD_TRANSPORT", "cli");
        let socket = socket_kind_from_env()?;
        let transport = match transport_kind.as_str() {
            "cli" => TransportConfig::Cli { socket },
            "fpm" => TransportConfig::Fpm { socket },
            other => {
                return Err(ConfigError::Invalid {
                    key: "PHP_WORLD_TRANSPORT".into(),
                    message: format!("expected 'cli' or 'fpm', got {other:?}"),
                })
            }
        };

        let stdout = match env_or("PHP_WORLD_STDOUT", "mux").as_str() {
            "inherit" => StdoutDisposition::Inherit,
            "mux" => StdoutDisposition::PipedMux,
            "null" => StdoutDisposition::Null,
            other => {
                if let Ok(fd) = other.parse::<RawFd>() {
                    StdoutDisposition::Fd(fd)
                } else {
                    return Err(ConfigError::Invalid {
                        key: "PHP_WORLD_STDOUT".into(),
                        message: format!("expected inherit/mux/null/<fd>, got {other:?}"),
                    });
                }
            }
        };

        let process = ProcessConfig {
            php_binary: PathBuf::from(env_or("PHP_WORLD_PHP_BINARY", "php")),
            extra_args: env_opt("PHP_WORLD_PHP_ARGS")
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            init_file: env_opt("PHP_WORLD_INIT_FILE").map(PathBuf::from),
            stdout,
            handshake_timeout: env_parse("PHP_WORLD_HANDSHAKE_TIMEOUT_MS", 5_000u64)
                .map(Duration::from_millis)?,
        };

        let fpm = if matches!(transport, TransportConfig::Fpm { .. }) {
            Some(FpmConfig {
                pool_address: fpm_address_from_env()?,
                bootstrap_script_path: PathBuf::from(env_or(
                    "PHP_WORLD_FPM_BOOTSTRAP_PATH",
                    "/var/run/php_world/bootstrap.php",
                )),
            })
        } else {
            None
        };

        let logging = LoggingConfig {
            json: env_bool("PHP_WORLD_LOG_JSON", true),
            filter: env_or("PHP_WORLD_LOG", "info"),
        };

        Ok(Config { transport, process, fpm, logging })
    }

    /// Print configuration summary to log.
    pub fn log_summary(&self) {
        tracing::info!("configuration loaded");
        match &self.transport {
            TransportConfig::Cli { socket } => tracing::info!(?socket, "transport: cli"),
            TransportConfig::Fpm { socket } => tracing::info!(?socket, "transport: fpm"),
        }
        tracing::info!(php_binary = %self.process.php_binary.display(), "php binary");
        tracing::info!(stdout = ?self.process.stdout, "stdout disposition");
        if let Some(init_file) = &self.process.init_file {
            tracing::info!(init_file = %init_file.display(), "init file");
        }
        if let Some(fpm) = &self.fpm {
            tracing::info!(pool = ?fpm.pool_address, "fpm pool");
        }
    }
}

fn socket_kind_from_env() -> Result<SocketKind, ConfigError> {
    match env_opt("PHP_WORLD_SOCKET_PATH") {
        Some(path) => Ok(SocketKind::UnixSocket(PathBuf::from(path))),
        None => Ok(SocketKind::TcpLoopback),
    }
}

fn fpm_address_from_env() -> Result<FpmAddress, ConfigError> {
    if let Some(path) = env_opt("PHP_WORLD_FPM_SOCKET_PATH") {
        return Ok(FpmAddress::UnixSocket(PathBuf::from(path)));
    }
    let addr = env_or("PHP_WORLD_FPM_ADDR", "127.0.0.1:9000");
    addr.parse().map(FpmAddress::Tcp).map_err(|e| ConfigError::Parse {
        key: "PHP_WORLD_FPM_ADDR".into(),
        value: addr,
        error: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_env() {
        for key in [
            "PHP_WORLD_TRANSPORT",
            "PHP_WORLD_SOCKET_PATH",
            "PHP_WORLD_STDOUT",
            "PHP_WORLD_PHP_BINARY",
            "PHP_WORLD_PHP_ARGS",
            "PHP_WORLD_INIT_FILE",
            "PHP_WORLD_HANDSHAKE_TIMEOUT_MS",
            "PHP_WORLD_FPM_SOCKET_PATH",
            "PHP_WORLD_FPM_ADDR",
            "PHP_WORLD_FPM_BOOTSTRAP_PATH",
            "PHP_WORLD_LOG_JSON",
            "PHP_WORLD_LOG",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_config_defaults() {
        clear_env();
        let config = Config::from_env().unwrap();
        assert!(matches!(config.transport, TransportConfig::Cli { .. }));
        assert_eq!(config.process.php_binary, PathBuf::from("php"));
        assert!(config.fpm.is_none());
    }

    #[test]
    fn rejects_unknown_transport() {
        clear_env();
        std::env::set_var("PHP_WORLD_TRANSPORT", "carrier-pigeon");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        std::env::remove_var("PHP_WORLD_TRANSPORT");
    }

    #[test]
    fn fpm_transport_requires_no_extra_env_for_defaults() {
        clear_env();
        std::env::set_var("PHP_WORLD_TRANSPORT", "fpm");
        let config = Config::from_env().unwrap();
        assert!(config.fpm.is_some());
        std::env::remove_var("PHP_WORLD_TRANSPORT");
    }
}
