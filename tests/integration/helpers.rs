//! Test helpers and utilities.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use php_world::config::{Config, LoggingConfig, ProcessConfig, SocketKind, StdoutDisposition, TransportConfig};
use php_world::controller::Controller;
use php_world::host::HostRegistry;

/// Whether a usable `php` CLI binary is on `PATH` (or at
/// `PHP_WORLD_TEST_PHP_BINARY`). Every scenario in this module is a
/// black-box test against a real interpreter process; callers should skip
/// (not fail) when this is false.
pub fn php_available() -> bool {
    std::process::Command::new(php_binary())
        .arg("-v")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn php_binary() -> String {
    std::env::var("PHP_WORLD_TEST_PHP_BINARY").unwrap_or_else(|_| "php".to_string())
}

/// Hands back a unique unix-socket path under the system temp dir, so
/// concurrently running tests never race over the same handshake socket.
fn unique_socket_path() -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("php_world_test_{}_{n}.sock", std::process::id()))
}

/// Builds a CLI-transport `Config` pointed at a fresh temp unix socket,
/// bypassing `Config::from_env` so tests are independent of the host's
/// environment variables.
pub fn test_config() -> Config {
    Config {
        transport: TransportConfig::Cli { socket: SocketKind::UnixSocket(unique_socket_path()) },
        process: ProcessConfig {
            php_binary: php_binary().into(),
            extra_args: Vec::new(),
            init_file: None,
            stdout: StdoutDisposition::PipedMux,
            handshake_timeout: std::time::Duration::from_secs(5),
        },
        fpm: None,
        logging: LoggingConfig { json: false, filter: "warn".into() },
    }
}

/// Spins up a `Controller` over a real `php` CLI process with an empty
/// host registry, ready for a test to drive through its public surface.
/// Callers are responsible for `controller.exit().await` when done.
pub async fn spawn_controller() -> Controller {
    let controller = Controller::new(test_config(), HostRegistry::new());
    controller.ensure_initialized().await.expect("php interpreter failed to start and handshake");
    controller
}

/// Same as [`spawn_controller`] but with a caller-provided registry, for
/// tests that need host classes/functions reachable from PHP.
pub async fn spawn_controller_with(registry: HostRegistry) -> Controller {
    let controller = Controller::new(test_config(), registry);
    controller.ensure_initialized().await.expect("php interpreter failed to start and handshake");
    controller
}
