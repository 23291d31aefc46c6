//! Child-process bridge: spawn, register, pump, tear down.
//!
//! A bridge owns exactly one child process and one Unix socket. Bytes
//! from the connected client go to the child's stdin verbatim; child
//! stdout comes back as delimiter-cut frames. Every exit path (clean
//! child exit, crash, `terminate()`) funnels through one teardown
//! routine that unlinks the socket and deregisters the name.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cim_core::{
    CiName, CommsConfig, CommsError, CommsResult, Delimiter, Endpoint, EndpointKind,
};
use cim_registry::RegistryHandle;

use crate::pump::{Frame, FrameScanner};

/// Grace period between SIGTERM and SIGKILL on `terminate()`.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// How often the bridge refreshes its registry heartbeat.
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(30);

/// Depth of the framed-stdout channel between pump and session.
const FRAME_BUFFER: usize = 64;

/// Body of the reply served to a second client while one is already
/// connected; terminated with the bridge's configured delimiter.
const BUSY_REPLY: &[u8] = b"error: bridge busy";

/// What to run behind a bridge.
#[derive(Debug, Clone)]
pub struct BridgeSpec {
    /// Name the bridge registers under
    pub name: CiName,

    /// Command to launch
    pub command: String,

    /// Command arguments
    pub args: Vec<String>,

    /// Framing delimiter for the child's stdout
    pub delimiter: Delimiter,
}

impl BridgeSpec {
    /// Creates a spec with no arguments and a newline delimiter.
    pub fn new(name: CiName, command: impl Into<String>) -> Self {
        Self {
            name,
            command: command.into(),
            args: Vec::new(),
            delimiter: Delimiter::default(),
        }
    }

    /// Sets the command arguments (builder-style).
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Sets the framing delimiter (builder-style).
    #[must_use]
    pub fn with_delimiter(mut self, delimiter: Delimiter) -> Self {
        self.delimiter = delimiter;
        self
    }
}

/// Spawns and supervises bridged processes.
pub struct ProcessBridge;

impl ProcessBridge {
    /// Launches the command, binds its socket and registers the name.
    ///
    /// # Errors
    ///
    /// - `ProcessSpawn` if the command cannot be launched
    /// - `RegistrationConflict` if the name is already live
    /// - `Io` for socket or filesystem failures
    pub async fn spawn(
        spec: BridgeSpec,
        registry: RegistryHandle,
        config: &CommsConfig,
    ) -> CommsResult<BridgeHandle> {
        let socket_path = config.bridge_socket_path(spec.name.as_str());

        let mut child = Command::new(&spec.command)
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CommsError::ProcessSpawn {
                command: spec.command.clone(),
                reason: e.to_string(),
            })?;

        let pid = child.id().ok_or_else(|| CommsError::ProcessSpawn {
            command: spec.command.clone(),
            reason: "exited before its pid could be read".to_string(),
        })?;
        let stdin = child.stdin.take().ok_or_else(|| CommsError::ProcessSpawn {
            command: spec.command.clone(),
            reason: "stdin was not piped".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| CommsError::ProcessSpawn {
            command: spec.command.clone(),
            reason: "stdout was not piped".to_string(),
        })?;

        let endpoint = Endpoint::new(
            spec.name.clone(),
            "localhost",
            config.derived_port(spec.name.as_str()),
            EndpointKind::ToolBridge,
        )
        .with_pid(pid)
        .with_delimiter(spec.delimiter.clone())
        .with_socket_path(&socket_path);

        // Register before touching the socket path: a duplicate name is
        // rejected here, so it can never unlink a live bridge's socket.
        // kill_on_drop reaps the child on every early return.
        registry.register(endpoint).await?;

        std::fs::create_dir_all(&config.socket_dir)?;
        // A predecessor hard-killed without teardown leaves a stale
        // socket file; unlink it before binding.
        match std::fs::remove_file(&socket_path) {
            Ok(()) => debug!(socket = %socket_path.display(), "Removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                let _ = registry.deregister(&spec.name).await;
                return Err(e.into());
            }
        }
        let listener = match UnixListener::bind(&socket_path) {
            Ok(listener) => listener,
            Err(e) => {
                let _ = registry.deregister(&spec.name).await;
                return Err(e.into());
            }
        };

        info!(
            name = %spec.name,
            command = %spec.command,
            pid,
            socket = %socket_path.display(),
            "Bridge started"
        );

        let shutdown = CancellationToken::new();
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_BUFFER);
        tokio::spawn(outbound_pump(
            stdout,
            spec.delimiter.clone(),
            frames_tx,
            spec.name.clone(),
        ));

        let supervisor = Supervisor {
            name: spec.name.clone(),
            pid,
            child,
            stdin,
            stdin_open: true,
            delimiter: spec.delimiter,
            listener,
            frames: frames_rx,
            registry,
            socket_path: socket_path.clone(),
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(supervisor.run());

        Ok(BridgeHandle {
            name: spec.name,
            pid,
            socket_path,
            shutdown,
            task,
        })
    }
}

/// Running bridge.
///
/// Dropping the handle leaves the bridge running until its child exits;
/// use [`terminate`](Self::terminate) for a controlled stop.
pub struct BridgeHandle {
    name: CiName,
    pid: u32,
    socket_path: PathBuf,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl BridgeHandle {
    /// Name the bridge is registered under.
    pub fn name(&self) -> &CiName {
        &self.name
    }

    /// Child process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Path of the bridge's Unix socket.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Awaits natural child exit and the teardown that follows.
    pub async fn wait(&mut self) -> CommsResult<()> {
        (&mut self.task)
            .await
            .map_err(|e| CommsError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
    }

    /// Stops the child (SIGTERM, then SIGKILL after a grace period) and
    /// awaits teardown.
    pub async fn terminate(&mut self) -> CommsResult<()> {
        self.shutdown.cancel();
        self.wait().await
    }
}

/// Why a client session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Client disconnected; keep accepting.
    ClientGone,
    /// Child stdout closed; the child is exiting.
    ChildGone,
    /// Shutdown was requested.
    Shutdown,
}

/// Owns the child, the listener and the client session loop.
struct Supervisor {
    name: CiName,
    pid: u32,
    child: Child,
    stdin: ChildStdin,
    stdin_open: bool,
    delimiter: Delimiter,
    listener: UnixListener,
    frames: mpsc::Receiver<Frame>,
    registry: RegistryHandle,
    socket_path: PathBuf,
    shutdown: CancellationToken,
}

impl Supervisor {
    async fn run(mut self) {
        let mut heartbeat = interval(HEARTBEAT_PERIOD);

        loop {
            let stream = tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    self.terminate_child().await;
                    break;
                }

                status = self.child.wait() => {
                    match status {
                        Ok(status) => info!(name = %self.name, %status, "Bridged child exited"),
                        Err(e) => warn!(name = %self.name, error = %e, "Failed to reap child"),
                    }
                    break;
                }

                _ = heartbeat.tick() => {
                    self.send_heartbeat().await;
                    continue;
                }

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        warn!(name = %self.name, error = %e, "Accept failed");
                        continue;
                    }
                }
            };

            debug!(name = %self.name, "Client connected");
            match self.serve_client(stream, &mut heartbeat).await {
                SessionEnd::ClientGone => {
                    debug!(name = %self.name, "Client disconnected");
                }
                SessionEnd::ChildGone => {
                    match self.child.wait().await {
                        Ok(status) => info!(name = %self.name, %status, "Bridged child exited"),
                        Err(e) => warn!(name = %self.name, error = %e, "Failed to reap child"),
                    }
                    break;
                }
                SessionEnd::Shutdown => {
                    self.terminate_child().await;
                    break;
                }
            }
        }

        self.teardown().await;
    }

    /// Serves one connected client until it leaves, the child exits or
    /// shutdown is requested. A second client arriving meanwhile is
    /// answered with a busy frame and dropped, never queued.
    async fn serve_client(&mut self, mut stream: UnixStream, heartbeat: &mut Interval) -> SessionEnd {
        let (mut client_read, mut client_write) = stream.split();
        let mut buf = vec![0u8; 8192];

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => return SessionEnd::Shutdown,

                read = client_read.read(&mut buf) => {
                    let n = match read {
                        Ok(0) | Err(_) => return SessionEnd::ClientGone,
                        Ok(n) => n,
                    };
                    // Delimiter included: it is the child's line terminator
                    if self.stdin_open {
                        let wrote = self.stdin.write_all(&buf[..n]).await;
                        let flushed = self.stdin.flush().await;
                        if wrote.is_err() || flushed.is_err() {
                            warn!(name = %self.name, "Child stdin closed");
                            self.stdin_open = false;
                        }
                    }
                }

                frame = self.frames.recv() => {
                    match frame {
                        Some(frame) => {
                            if client_write.write_all(&frame.bytes).await.is_err() {
                                return SessionEnd::ClientGone;
                            }
                        }
                        None => return SessionEnd::ChildGone,
                    }
                }

                _ = heartbeat.tick() => self.send_heartbeat().await,

                second = self.listener.accept() => {
                    if let Ok((mut second, _)) = second {
                        debug!(name = %self.name, "Rejecting second client");
                        let _ = second.write_all(BUSY_REPLY).await;
                        let _ = second.write_all(self.delimiter.as_bytes()).await;
                    }
                }
            }
        }
    }

    async fn send_heartbeat(&self) {
        if let Err(e) = self.registry.heartbeat(&self.name).await {
            warn!(name = %self.name, error = %e, "Heartbeat failed");
        }
    }

    /// SIGTERM, then SIGKILL after the grace period.
    async fn terminate_child(&mut self) {
        info!(name = %self.name, pid = self.pid, "Terminating bridged child");
        let rc = unsafe { libc::kill(self.pid as i32, libc::SIGTERM) };
        if rc != 0 {
            warn!(name = %self.name, pid = self.pid, "SIGTERM delivery failed");
        }

        match tokio::time::timeout(TERMINATE_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => info!(name = %self.name, %status, "Child exited after SIGTERM"),
            Ok(Err(e)) => warn!(name = %self.name, error = %e, "Failed to reap child"),
            Err(_) => {
                warn!(name = %self.name, pid = self.pid, "Child ignored SIGTERM, killing");
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
            }
        }
    }

    /// The one cleanup routine every exit path reaches.
    async fn teardown(mut self) {
        self.frames.close();
        while self.frames.try_recv().is_ok() {}

        drop(self.listener);
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(name = %self.name, error = %e, "Failed to unlink socket");
            }
        }

        if let Err(e) = self.registry.deregister(&self.name).await {
            warn!(name = %self.name, error = %e, "Deregistration failed");
        }

        info!(name = %self.name, "Bridge stopped");
    }
}

/// Reads child stdout and cuts it into frames.
///
/// Exits on stdout EOF, flushing any trailing partial chunk as a final
/// frame so it is still delivered to the client.
async fn outbound_pump(
    mut stdout: ChildStdout,
    delimiter: Delimiter,
    frames: mpsc::Sender<Frame>,
    name: CiName,
) {
    let mut scanner = FrameScanner::new(delimiter);
    let mut buf = vec![0u8; 8192];

    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for frame in scanner.push(&buf[..n]) {
                    if !frame.terminated {
                        let overflow = CommsError::DelimiterFraming {
                            name: name.clone(),
                            buffered: frame.bytes.len(),
                        };
                        warn!(name = %name, error = %overflow, "Oversized frame flushed");
                    }
                    if frames.send(frame).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(name = %name, error = %e, "Child stdout read failed");
                break;
            }
        }
    }

    if let Some(last) = scanner.finish() {
        let _ = frames.send(last).await;
    }
    debug!(name = %name, "Outbound pump finished");
}
