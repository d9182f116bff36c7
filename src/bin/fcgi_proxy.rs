//! `php_world_fcgi_proxy` — a standalone FastCGI server standing in for a
//! PHP-FPM pool.
//!
//! Accepts inbound FastCGI responder requests, pulls `SCRIPT_FILENAME` and
//! `PHP_WORLD_HELO` out of the request params, runs the configured `php`
//! binary against that script with the HELO handed through the environment
//! (mirroring how real `php-fpm` turns FastCGI params into `$_SERVER`
//! entries), and relays the child's stdout/stderr/exit status back as the
//! FastCGI response. Used by the FPM-transport tests and by anyone who wants
//! to exercise `Controller`'s FPM path without a real php-fpm pool.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;

use clap::Parser;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio::process::Command;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use php_world::fcgi;
use php_world::logging::JsonFormatter;

#[derive(Parser)]
#[command(name = "php_world_fcgi_proxy", version = php_world::VERSION)]
struct Args {
    /// Address to listen on: "unix:/path/to.sock" or "tcp:127.0.0.1:9000".
    #[arg(long)]
    listen: String,

    /// PHP CLI binary used to actually run the requested script.
    #[arg(long, default_value = "php")]
    php_binary: PathBuf,
}

enum Listen {
    Unix(PathBuf),
    Tcp(SocketAddr),
}

fn parse_listen(raw: &str) -> Result<Listen, String> {
    if let Some(path) = raw.strip_prefix("unix:") {
        Ok(Listen::Unix(PathBuf::from(path)))
    } else if let Some(addr) = raw.strip_prefix("tcp:") {
        addr.parse().map(Listen::Tcp).map_err(|e| format!("invalid tcp address {addr:?}: {e}"))
    } else {
        Err(format!("expected \"unix:PATH\" or \"tcp:ADDR\", got {raw:?}"))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(JsonFormatter::new("php_world_fcgi_proxy"))
                .with_ansi(false),
        )
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listen = parse_listen(&args.listen)?;

    match listen {
        Listen::Unix(path) => {
            let _ = std::fs::remove_file(&path);
            let listener = UnixListener::bind(&path)?;
            tracing::info!(path = %path.display(), "listening for FastCGI requests");
            loop {
                let (stream, _) = listener.accept().await?;
                spawn_handler(stream, args.php_binary.clone());
            }
        }
        Listen::Tcp(addr) => {
            let listener = TcpListener::bind(addr).await?;
            tracing::info!(%addr, "listening for FastCGI requests");
            loop {
                let (stream, _) = listener.accept().await?;
                spawn_handler(stream, args.php_binary.clone());
            }
        }
    }
}

fn spawn_handler<S>(stream: S, php_binary: PathBuf)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = handle_connection(stream, php_binary).await {
            tracing::warn!(error = %e, "fcgi connection ended with an error");
        }
    });
}

async fn handle_connection<S>(mut stream: S, php_binary: PathBuf) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = fcgi::read_request(&mut stream).await?;

    let script = request.params.get("SCRIPT_FILENAME").cloned().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "missing SCRIPT_FILENAME param")
    })?;
    let helo = request.params.get("PHP_WORLD_HELO").cloned().unwrap_or_default();

    tracing::info!(script, "running script for FastCGI request");

    let output = Command::new(&php_binary)
        .arg(&script)
        .env("PHP_WORLD_HELO", &helo)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    let app_status = output.status.code().unwrap_or(-1);
    fcgi::write_response(&mut stream, request.request_id, &output.stdout, &output.stderr, app_status).await
}
