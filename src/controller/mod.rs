//! Host-side controller: owns the command connection to one PHP interpreter
//! instance, the scheduler, both handle tables, and the stdout mux (§4.6).

mod callback;

pub use callback::dispatch_callback;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::config::{Config, FpmAddress, ProcessConfig, SocketKind, StdoutDisposition, TransportConfig};
use crate::error::{Error, ExitError};
use crate::fcgi::{self, FcgiResponse};
use crate::framing::{decode_frame, encode_frame, DataFlags, InboundFrame, RecordType};
use crate::handles::{FrameStack, HandleTable};
use crate::host::{HostObject, HostRegistry};
use crate::proxy::{PathShape, PhpProxy, ProxyTransport};
use crate::scheduler::Scheduler;
use crate::stdout_mux::{random_sentinel, Sentinel, StdoutMux};
use crate::value::PhpValue;

/// First id a PHP-constructed host object may be assigned; ids below this
/// are reserved (§3).
const FIRST_USER_HOST_HANDLE: u32 = 2;

/// Placeholder occupying a reserved low host-handle id. Carries no behavior
/// of its own — every method falls back to `HostObject`'s defaults — it
/// only exists so `CallbackKind::Construct`'s first real insert lands on
/// id 2, not 0, matching the id 0/id 1 reservation the PHP side's handle
/// numbering assumes (§3).
struct ReservedHostObject {
    #[allow(dead_code)]
    label: &'static str,
}

#[async_trait]
impl HostObject for ReservedHostObject {}

/// A fresh host-object table with ids 0 (the interpreter controller itself)
/// and 1 (the host global namespace) pre-populated, per §3. Recreated on
/// every (re-)init, since the reservation is per-interpreter-lifetime.
fn fresh_host_objects() -> HandleTable<Arc<dyn HostObject>> {
    let mut table = HandleTable::starting_at(FIRST_USER_HOST_HANDLE);
    table.insert_reserved(0, Arc::new(ReservedHostObject { label: "interpreter controller" }) as Arc<dyn HostObject>);
    table.insert_reserved(1, Arc::new(ReservedHostObject { label: "host global namespace" }) as Arc<dyn HostObject>);
    table
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterpreterStatus {
    Uninitialized,
    Initializing,
    Ready,
    Exiting,
}

type BoxedRead = Box<dyn AsyncRead + Unpin + Send>;
type BoxedWrite = Box<dyn AsyncWrite + Unpin + Send>;
type AcceptFuture = std::pin::Pin<Box<dyn std::future::Future<Output = Result<(BoxedRead, BoxedWrite), Error>> + Send>>;

/// One PHP interpreter instance, reachable through a single command
/// connection. Cheap to clone (an `Arc` around shared state); the last
/// clone dropping does not itself tear the interpreter down — call
/// [`Controller::exit`] explicitly.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

pub struct ControllerInner {
    config: Config,
    status: Mutex<InterpreterStatus>,
    writer: Mutex<Option<BufWriter<BoxedWrite>>>,
    reader: Mutex<Option<BoxedRead>>,
    scheduler: Scheduler,
    host_objects: Mutex<HandleTable<Arc<dyn crate::host::HostObject>>>,
    frame_stack: Mutex<FrameStack>,
    /// Highest PHP-side instance handle observed in any decoded reply so
    /// far, updated whenever a `Result` frame's value carries one (directly
    /// or nested in an array/object) — every PHP object crossing the wire,
    /// not just ones from an explicit `CONSTRUCT`, registers a fresh id on
    /// the PHP side. `push_frame`/`pop_frame` snapshot and restore this, not
    /// `host_objects`' own watermark — the frame being pushed/popped lives
    /// on the PHP side of the wire (§4.3).
    php_handle_watermark: AtomicU32,
    registry: HostRegistry,
    stdout: Mutex<Option<Arc<StdoutMux<BoxedRead>>>>,
    child: Mutex<Option<Child>>,
    socket_path: Mutex<Option<PathBuf>>,
    /// Lets the [`ProxyTransport`] impl recover an `Arc<Self>` for recursive
    /// calls, without `Controller` itself needing to hand one out.
    self_weak: Weak<ControllerInner>,
}

impl Controller {
    pub fn new(config: Config, registry: HostRegistry) -> Controller {
        let inner = Arc::new_cyclic(|weak| ControllerInner {
            config,
            status: Mutex::new(InterpreterStatus::Uninitialized),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            scheduler: Scheduler::new(),
            host_objects: Mutex::new(fresh_host_objects()),
            frame_stack: Mutex::new(FrameStack::new()),
            php_handle_watermark: AtomicU32::new(0),
            registry,
            stdout: Mutex::new(None),
            child: Mutex::new(None),
            socket_path: Mutex::new(None),
            self_weak: weak.clone(),
        });
        Controller { inner }
    }

    fn as_transport(&self) -> Arc<dyn ProxyTransport> {
        self.inner.clone() as Arc<dyn ProxyTransport>
    }

    /// A proxy rooted at a global constant or variable.
    pub fn global(&self, name: &str) -> Result<PhpProxy, Error> {
        Ok(PhpProxy::root(name, &self.as_transport())?)
    }

    /// A proxy rooted at a class-namespace segment.
    pub fn class(&self, segment: &str) -> Result<PhpProxy, Error> {
        Ok(PhpProxy::root_class(segment, &self.as_transport())?)
    }

    /// Ensures the interpreter is spawned/connected and has completed its
    /// handshake, per §4.6 steps 1-5.
    pub async fn ensure_initialized(&self) -> Result<(), Error> {
        self.inner.ensure_initialized().await
    }

    /// Pushes a frame: subsequent host-handle allocations can be rolled
    /// back with a matching `pop_frame`.
    pub async fn push_frame(&self) -> Result<(), Error> {
        self.inner.ensure_initialized().await?;
        let mark = self.inner.php_handle_watermark.load(Ordering::Acquire);
        self.inner.frame_stack.lock().await.push(mark);
        self.inner.exchange(RecordType::PushFrame, &[]).await?;
        Ok(())
    }

    /// Pops a frame: releases every PHP handle allocated since the
    /// matching `push_frame`.
    pub async fn pop_frame(&self) -> Result<(), Error> {
        let saved = self
            .inner
            .frame_stack
            .lock()
            .await
            .pop()
            .ok_or_else(|| Error::Validation(crate::error::ValidationError::UnsupportedOperation(
                "pop_frame with no matching push_frame".into(),
            )))?;
        self.inner.exchange(RecordType::PopFrame, saved.to_string().as_bytes()).await?;
        Ok(())
    }

    /// Returns a fresh reader over the interpreter's raw stdout, up to the
    /// next `end_stdout` boundary, demultiplexed via the stdout mux (§4.6
    /// "stdout interleaving"). `None` when the process wasn't configured
    /// with `StdoutDisposition::PipedMux`, or has no stdout to read (FPM
    /// transport, or before the handshake completes).
    pub async fn stdout_reader(&self) -> Option<crate::stdout_mux::SegmentReader<BoxedRead>> {
        let mux = self.inner.stdout.lock().await.clone()?;
        Some(mux.get_reader().await)
    }

    /// Asks the interpreter to write its stdout end-mark, closing out the
    /// current reader returned by `stdout_reader` at a known boundary.
    pub async fn end_stdout(&self) -> Result<(), Error> {
        self.inner.exchange(RecordType::EndStdout, &[]).await.map(|_| ())
    }

    pub async fn n_objects(&self) -> Result<u64, Error> {
        let value = self.inner.exchange(RecordType::NObjects, &[]).await?;
        match value {
            PhpValue::Int(n) => Ok(n as u64),
            other => Err(Error::InvalidResponse(format!("NOBJECTS returned {other:?}"))),
        }
    }

    /// Count of host objects currently reachable from PHP (the mirror of
    /// `n_objects`, counted on the host's own table rather than round-tripped
    /// to PHP). `2` at a fresh interpreter: the reserved controller-self and
    /// host-global-namespace entries at ids 0/1 (§3, testable property 8).
    pub async fn n_deno_objects(&self) -> u64 {
        self.inner.host_objects.lock().await.len() as u64
    }

    /// Terminates the interpreter. Idempotent.
    pub async fn exit(&self) -> Result<(), Error> {
        self.inner.exit().await
    }

    pub fn registry(&self) -> &HostRegistry {
        &self.inner.registry
    }
}

impl ControllerInner {
    async fn ensure_initialized(self: &Arc<Self>) -> Result<(), Error> {
        let mut status = self.status.lock().await;
        match *status {
            InterpreterStatus::Ready => return Ok(()),
            InterpreterStatus::Initializing | InterpreterStatus::Exiting => {
                return Err(Error::Exit(ExitError { code: None, cause: "interpreter is transitioning".into() }))
            }
            InterpreterStatus::Uninitialized => {}
        }
        *status = InterpreterStatus::Initializing;
        drop(status);

        let result = self.initialize().await;
        let mut status = self.status.lock().await;
        *status = match &result {
            Ok(()) => InterpreterStatus::Ready,
            Err(_) => InterpreterStatus::Uninitialized,
        };
        result
    }

    /// Steps 1-5 of §4.6: generate the HELO, launch the interpreter (CLI or
    /// FPM), accept its connection, and verify the handshake key.
    async fn initialize(self: &Arc<Self>) -> Result<(), Error> {
        let end_mark = random_sentinel();
        let key = generate_key();
        // Ids 0/1 are recreated on each re-init (§3 "Lifecycle").
        *self.host_objects.lock().await = fresh_host_objects();

        match &self.config.transport {
            TransportConfig::Cli { socket } => self.initialize_cli(socket.clone(), &key, end_mark).await,
            TransportConfig::Fpm { socket } => self.initialize_fpm(socket.clone(), &key, end_mark).await,
        }
    }

    async fn initialize_cli(self: &Arc<Self>, socket: SocketKind, key: &str, end_mark: Sentinel) -> Result<(), Error> {
        use base64::Engine;
        let b64 = base64::engine::general_purpose::STANDARD;

        let (listener_url, accept_fut): (String, AcceptFuture) = match socket {
            SocketKind::UnixSocket(path) => {
                let _ = std::fs::remove_file(&path);
                let listener = UnixListener::bind(&path)
                    .map_err(|e| Error::Io(e))?;
                *self.socket_path.lock().await = Some(path.clone());
                (format!("unix://{}", path.display()), Box::pin(accept_unix(listener)))
            }
            SocketKind::TcpLoopback => {
                let listener = TcpListener::bind(("127.0.0.1", 0)).await.map_err(Error::Io)?;
                let port = listener.local_addr().map_err(Error::Io)?.port();
                (format!("tcp://127.0.0.1:{port}"), Box::pin(accept_tcp(listener)))
            }
        };

        let init_file_b64 = self
            .config
            .process
            .init_file
            .as_ref()
            .map(|p| b64.encode(p.display().to_string()))
            .unwrap_or_default();

        let helo = format!(
            "{key} {} {} {init_file_b64}",
            b64.encode(end_mark),
            b64.encode(&listener_url),
        );

        let mut child = spawn_php_cli(&self.config.process, &helo)?;
        let child_stdout = child.stdout.take();
        *self.child.lock().await = Some(child);

        let conn = accept_fut.await?;
        let (read_half, write_half) = conn;
        self.finish_handshake(Box::new(read_half), Box::new(write_half), key).await?;

        if let Some(stdout) = child_stdout {
            // Built for every piped disposition, not just `PipedMux`: `Null`
            // and `Fd` still need *something* draining the pipe on the
            // no-reader write path below, or PHP blocks on `fwrite` once the
            // OS pipe buffer fills (only `Inherit` skips piping entirely).
            if !matches!(self.config.process.stdout, StdoutDisposition::Inherit) {
                let mux = StdoutMux::new(Box::new(stdout) as BoxedRead, end_mark);
                *self.stdout.lock().await = Some(Arc::new(mux));
            }
        }

        if self.config.process.init_file.is_some() {
            self.read_init_ack().await?;
        }
        Ok(())
    }

    /// FPM transport: the host listens exactly as it does for CLI, then
    /// hands the listener URL and HELO to a PHP-FPM pool via a FastCGI
    /// request instead of spawning a child. Step 3 of §4.6: if the FPM
    /// response completes before the bootstrap script connects back, the
    /// script failed before reaching the handshake, and we surface a
    /// descriptive error built from its stdout/stderr.
    async fn initialize_fpm(self: &Arc<Self>, socket: SocketKind, key: &str, end_mark: Sentinel) -> Result<(), Error> {
        use base64::Engine;
        let b64 = base64::engine::general_purpose::STANDARD;

        let fpm = self.config.fpm.as_ref().ok_or_else(|| {
            Error::Config(crate::config::ConfigError::Missing { key: "PHP_WORLD_FPM_ADDR".into() })
        })?;

        let (listener_url, accept_fut): (String, AcceptFuture) = match socket {
            SocketKind::UnixSocket(path) => {
                let _ = std::fs::remove_file(&path);
                let listener = UnixListener::bind(&path).map_err(Error::Io)?;
                *self.socket_path.lock().await = Some(path.clone());
                (format!("unix://{}", path.display()), Box::pin(accept_unix(listener)))
            }
            SocketKind::TcpLoopback => {
                let listener = TcpListener::bind(("127.0.0.1", 0)).await.map_err(Error::Io)?;
                let port = listener.local_addr().map_err(Error::Io)?.port();
                (format!("tcp://127.0.0.1:{port}"), Box::pin(accept_tcp(listener)))
            }
        };

        let init_file_b64 = self
            .config
            .process
            .init_file
            .as_ref()
            .map(|p| b64.encode(p.display().to_string()))
            .unwrap_or_default();

        let helo = format!(
            "{key} {} {} {init_file_b64}",
            b64.encode(end_mark),
            b64.encode(&listener_url),
        );

        crate::php_runtime::write_bootstrap_to(&fpm.bootstrap_script_path).map_err(Error::Io)?;

        let script_path = fpm.bootstrap_script_path.display().to_string();
        let params = vec![
            ("SCRIPT_FILENAME".to_string(), script_path.clone()),
            ("SCRIPT_NAME".to_string(), script_path),
            ("REQUEST_METHOD".to_string(), "GET".to_string()),
            ("PHP_WORLD_HELO".to_string(), helo),
        ];
        let pool_address = fpm.pool_address.clone();

        // Run the request in the background: only the losing branch below
        // actually needs its result, and the bootstrap script's connection
        // to our listener happens concurrently with the FPM response still
        // being open.
        let (response_tx, response_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let _ = response_tx.send(run_fcgi_request(pool_address, params).await);
        });

        tokio::select! {
            conn = accept_fut => {
                let (read_half, write_half) = conn?;
                self.finish_handshake(read_half, write_half, key).await?;
                if self.config.process.init_file.is_some() {
                    self.read_init_ack().await?;
                }
                Ok(())
            }
            result = response_rx => {
                let response = result.map_err(|_| Error::Exit(ExitError {
                    code: None,
                    cause: "fpm request task was dropped before completing".into(),
                }))??;
                Err(Error::Exit(ExitError {
                    code: Some(response.app_status),
                    cause: format!(
                        "php-fpm script exited before connecting back: {}",
                        String::from_utf8_lossy(&response.stderr).trim(),
                    ),
                }))
            }
        }
    }

    async fn finish_handshake(
        self: &Arc<Self>,
        mut read_half: BoxedRead,
        write_half: BoxedWrite,
        key: &str,
    ) -> Result<(), Error> {
        let frame = decode_frame(&mut read_half).await.map_err(Error::Io)?;
        match frame {
            InboundFrame::Result(payload) if payload == key.as_bytes() => {
                *self.reader.lock().await = Some(read_half);
                *self.writer.lock().await = Some(BufWriter::new(write_half));
                Ok(())
            }
            _ => Err(Error::Exit(ExitError { code: None, cause: "handshake key mismatch".into() })),
        }
    }

    async fn read_init_ack(self: &Arc<Self>) -> Result<(), Error> {
        let mut reader = self.reader.lock().await;
        let reader = reader.as_mut().expect("handshake completed");
        match decode_frame(reader).await.map_err(Error::Io)? {
            InboundFrame::Null => Ok(()),
            other => Err(Error::InvalidResponse(format!("expected null init ack, got {other:?}"))),
        }
    }

    async fn write_frame(self: &Arc<Self>, record_type: RecordType, payload: &[u8]) -> Result<(), Error> {
        self.ensure_stdout_drained().await;
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or_else(|| Error::Exit(ExitError {
            code: None,
            cause: "write attempted before handshake".into(),
        }))?;
        encode_frame(writer, record_type, payload).await.map_err(Error::Io)
    }

    /// §4.6 write path: if a stdout mux is present and nothing is currently
    /// attached to it (no `stdout_reader()` in hand), hook it to the
    /// configured disposition's sink before writing. Otherwise PHP's own
    /// `fwrite(STDOUT, ...)` blocks once the OS pipe buffer fills, since
    /// nothing would ever read the other end — the exchange would then
    /// deadlock waiting on a reply that never comes. Runs in the background
    /// rather than being awaited here: draining only completes once PHP
    /// emits the end-mark (`end_stdout()` or process exit), which must not
    /// block the write we're about to issue.
    async fn ensure_stdout_drained(&self) {
        let Some(mux) = self.stdout.lock().await.clone() else { return };
        if !mux.is_idle() {
            return;
        }
        let disposition = self.config.process.stdout.clone();
        tokio::spawn(async move {
            match disposition {
                StdoutDisposition::Fd(fd) => match fd_sink(fd) {
                    Ok(mut sink) => {
                        let _ = mux.set_writer(&mut sink).await;
                    }
                    Err(_) => {
                        let _ = mux.set_none().await;
                    }
                },
                // `PipedMux` with no reader attached yet, or `Null`: nobody
                // is watching this segment, so discard it rather than let it
                // sit unread.
                StdoutDisposition::PipedMux | StdoutDisposition::Null | StdoutDisposition::Inherit => {
                    let _ = mux.set_none().await;
                }
            }
        });
    }

    async fn read_one_frame(self: &Arc<Self>) -> Result<InboundFrame, Error> {
        let mut reader = self.reader.lock().await;
        let reader = reader.as_mut().ok_or_else(|| Error::Exit(ExitError {
            code: None,
            cause: "read attempted before handshake".into(),
        }))?;
        decode_frame(reader).await.map_err(Error::Io)
    }

    /// Writes `record_type`/`payload`, then loops reading frames: servicing
    /// any inbound callback requests until our own result frame arrives.
    /// Runs through the scheduler so concurrent callers stay in submission
    /// order at the current nesting level (§4.5).
    async fn exchange(self: &Arc<Self>, record_type: RecordType, payload: &[u8]) -> Result<PhpValue, Error> {
        self.ensure_initialized().await?;
        let this = self.clone();
        let payload = payload.to_vec();
        this.scheduler
            .enqueue(move || {
                let this = this.clone();
                async move { this.exchange_inner(record_type, payload).await }
            })
            .await
    }

    async fn exchange_inner(self: &Arc<Self>, record_type: RecordType, payload: Vec<u8>) -> Result<PhpValue, Error> {
        self.write_frame(record_type, &payload).await?;
        loop {
            match self.read_one_frame().await? {
                InboundFrame::Null => return Ok(PhpValue::Null),
                InboundFrame::Undefined => return Ok(PhpValue::Undefined),
                InboundFrame::Result(bytes) => {
                    let value = PhpValue::parse(&bytes).map_err(|_| {
                        Error::InvalidResponse("result payload was not valid JSON".into())
                    })?;
                    if let Some(id) = value.max_php_handle() {
                        self.php_handle_watermark.fetch_max(id + 1, Ordering::AcqRel);
                    }
                    return Ok(value);
                }
                InboundFrame::Error { file, line, message, trace } => {
                    return Err(Error::Remote { file, line, message, trace })
                }
                InboundFrame::Callback(req) => {
                    // The request body can itself carry PHP handles (e.g. a
                    // PHP object passed as a call argument); same rationale
                    // as the `Result` branch above.
                    if let Ok(body_value) = PhpValue::parse(&req.body) {
                        if let Some(id) = body_value.max_php_handle() {
                            self.php_handle_watermark.fetch_max(id + 1, Ordering::AcqRel);
                        }
                    }
                    self.scheduler.enter_callback().await;
                    let reply = callback::dispatch_callback(self, &req).await;
                    self.scheduler.leave_callback().await;
                    self.write_data_reply(req.host_handle, reply).await?;
                }
            }
        }
    }

    async fn write_data_reply(
        self: &Arc<Self>,
        _host_handle: u32,
        reply: Result<PhpValue, Error>,
    ) -> Result<(), Error> {
        let (flags, body) = match reply {
            Ok(value) => (DataFlags::IS_JSON, value.to_bytes()),
            Err(e) => (DataFlags::IS_ERROR, e.to_string().into_bytes()),
        };
        let mut payload = format!("{} ", flags.bits()).into_bytes();
        payload.extend_from_slice(&body);
        self.write_frame(RecordType::Data, &payload).await
    }

    async fn exit(self: &Arc<Self>) -> Result<(), Error> {
        let mut status = self.status.lock().await;
        if *status == InterpreterStatus::Uninitialized {
            return Ok(());
        }
        *status = InterpreterStatus::Exiting;
        drop(status);

        if let Some(stdout) = self.stdout.lock().await.take() {
            let _ = stdout.set_none().await;
        }
        let _ = self.write_frame(RecordType::Exit, &[]).await;

        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.wait().await;
        }

        for (_, obj) in self.host_objects.lock().await.drain_all() {
            let _ = obj.dispose().await;
        }

        if let Some(path) = self.socket_path.lock().await.take() {
            let _ = std::fs::remove_file(path);
        }

        *self.writer.lock().await = None;
        *self.reader.lock().await = None;
        *self.status.lock().await = InterpreterStatus::Uninitialized;
        Ok(())
    }
}

async fn accept_unix(listener: UnixListener) -> Result<(BoxedRead, BoxedWrite), Error> {
    let (stream, _addr) = listener.accept().await.map_err(Error::Io)?;
    let (r, w) = stream.into_split();
    Ok((Box::new(r), Box::new(w)))
}

async fn accept_tcp(listener: TcpListener) -> Result<(BoxedRead, BoxedWrite), Error> {
    let (stream, _addr) = listener.accept().await.map_err(Error::Io)?;
    let (r, w) = stream.into_split();
    Ok((Box::new(r), Box::new(w)))
}

/// Connects to the configured PHP-FPM pool and issues one responder
/// request carrying `params`, returning once the pool's response completes.
/// Used both to race against the bootstrap script's connect-back (§4.6 step
/// 3) and, on the losing branch, to surface the pool's stderr in the error.
async fn run_fcgi_request(address: FpmAddress, params: Vec<(String, String)>) -> Result<FcgiResponse, Error> {
    match address {
        FpmAddress::UnixSocket(path) => {
            let mut stream = UnixStream::connect(&path).await.map_err(Error::Io)?;
            fcgi::send_request(&mut stream, &params, &[]).await.map_err(Error::Io)
        }
        FpmAddress::Tcp(addr) => {
            let mut stream = TcpStream::connect(addr).await.map_err(Error::Io)?;
            fcgi::send_request(&mut stream, &params, &[]).await.map_err(Error::Io)
        }
    }
}

/// Strips the leading `<?php` tag `BOOTSTRAP_PHP` carries (needed for the
/// FPM transport, which writes it out as an ordinary script) so it can be
/// handed to `php -r`, which treats its argument as already being inside
/// `<?php ?>` and rejects a literal tag at the start.
fn bootstrap_for_dash_r() -> &'static str {
    crate::php_runtime::BOOTSTRAP_PHP.trim_start().strip_prefix("<?php").unwrap_or(crate::php_runtime::BOOTSTRAP_PHP)
}

#[cfg(feature = "debug-profile")]
fn spawn_php_cli(process: &ProcessConfig, helo: &str) -> Result<Child, Error> {
    let script_path = std::env::temp_dir().join(format!("php_world_bootstrap_{}.php", std::process::id()));
    crate::php_runtime::write_bootstrap_to(&script_path).map_err(Error::Io)?;

    let mut command = Command::new(&process.php_binary);
    command
        .arg(&script_path)
        .args(&process.extra_args)
        .stdin(Stdio::piped())
        .stdout(match process.stdout {
            StdoutDisposition::PipedMux => Stdio::piped(),
            StdoutDisposition::Inherit => Stdio::inherit(),
            StdoutDisposition::Null => Stdio::null(),
            StdoutDisposition::Fd(_) => Stdio::piped(),
        })
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(Error::Io)?;
    if let Some(mut stdin) = child.stdin.take() {
        let helo = helo.to_string();
        tokio::spawn(async move {
            let _ = stdin.write_all(helo.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });
    }
    Ok(child)
}

#[cfg(not(feature = "debug-profile"))]
fn spawn_php_cli(process: &ProcessConfig, helo: &str) -> Result<Child, Error> {
    let mut command = Command::new(&process.php_binary);
    command
        .arg("-r")
        .arg(bootstrap_for_dash_r())
        .args(&process.extra_args)
        .stdin(Stdio::piped())
        .stdout(match process.stdout {
            StdoutDisposition::PipedMux => Stdio::piped(),
            StdoutDisposition::Inherit => Stdio::inherit(),
            StdoutDisposition::Null => Stdio::null(),
            StdoutDisposition::Fd(_) => Stdio::piped(),
        })
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(Error::Io)?;
    if let Some(mut stdin) = child.stdin.take() {
        let helo = helo.to_string();
        tokio::spawn(async move {
            let _ = stdin.write_all(helo.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });
    }
    Ok(child)
}

fn generate_key() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Wraps a configured raw fd (`PHP_WORLD_STDOUT=<fd>`) as an async sink for
/// the stdout mux's no-reader drain. Dups the fd first so the `File` this
/// returns can be dropped (closing its own copy) without closing the
/// embedder's original descriptor out from under it.
fn fd_sink(fd: std::os::unix::io::RawFd) -> std::io::Result<tokio::fs::File> {
    use std::os::unix::io::FromRawFd;
    let duped = nix::unistd::dup(fd).map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))?;
    let file = unsafe { std::fs::File::from_raw_fd(duped) };
    Ok(tokio::fs::File::from_std(file))
}

#[async_trait]
impl ProxyTransport for ControllerInner {
    async fn read(&self, shape: &PathShape) -> Result<PhpValue, Error> {
        let (record_type, payload) = callback::encode_read(shape)?;
        // `arc_self` recovers the `Arc<Self>` `exchange` needs to enqueue
        // through the scheduler; every `PhpProxy` only ever holds a `Weak`
        // upgraded from the controller's own `Arc`, so this call site never
        // outlives it.
        self.arc_self().exchange(record_type, &payload).await
    }

    async fn write(&self, shape: &PathShape, value: PhpValue) -> Result<(), Error> {
        let (record_type, payload) = callback::encode_write(shape, value)?;
        self.arc_self().exchange(record_type, &payload).await.map(|_| ())
    }

    async fn invoke(&self, shape: &PathShape, args: Vec<PhpValue>) -> Result<PhpValue, Error> {
        let (record_type, payload) = callback::encode_call(shape, args)?;
        self.arc_self().exchange(record_type, &payload).await
    }

    async fn construct(&self, class: &[String], args: Vec<PhpValue>) -> Result<PhpProxy, Error> {
        let payload = callback::encode_construct(class, args);
        let value = self.arc_self().exchange(RecordType::Construct, &payload).await?;
        let handle = value.as_php_handle().ok_or_else(|| {
            Error::InvalidResponse("CONSTRUCT did not return a handle".into())
        })?;
        // Watermark already advanced in `exchange_inner` when this reply's
        // `Result` frame was parsed; nothing further to do here.
        let transport = self.arc_self() as Arc<dyn ProxyTransport>;
        Ok(PhpProxy::new(PathShape::Instance { handle, member: None }, &transport))
    }

    async fn delete(&self, shape: &PathShape) -> Result<(), Error> {
        let (record_type, payload) = callback::encode_delete(shape)?;
        self.arc_self().exchange(record_type, &payload).await.map(|_| ())
    }

    async fn iter_next(&self, handle: u32) -> Result<(PhpValue, bool), Error> {
        let value = self
            .arc_self()
            .exchange(RecordType::ClassIterate, handle.to_string().as_bytes())
            .await?;
        match value {
            PhpValue::Array(mut items) if items.len() == 2 => {
                let done = matches!(items.pop(), Some(PhpValue::Bool(true)));
                let val = items.pop().unwrap_or(PhpValue::Null);
                Ok((val, done))
            }
            other => Err(Error::InvalidResponse(format!("unexpected iterate reply {other:?}"))),
        }
    }
}

impl ControllerInner {
    /// Recovers the `Arc<Self>` this instance is always held behind, set up
    /// via `Arc::new_cyclic` in `Controller::new`. Upgrade only fails once
    /// the owning `Controller` (and every clone of it) has been dropped,
    /// which also means no live caller could be holding `&self` to ask.
    fn arc_self(&self) -> Arc<ControllerInner> {
        self.self_weak.upgrade().expect("ControllerInner outlived by its own Arc")
    }
}
