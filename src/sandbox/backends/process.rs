//! Piped host process spawning shared by the local and docker engines.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{LiveboxError, Result};
use crate::sandbox::monitor::strip_ansi;
use crate::sandbox::{ServerReady, SpawnedProcess};

const OUTPUT_BUFFER: usize = 256;

/// Kill switches for every live process an engine has spawned.
///
/// A switch is removed when its process exits, so the set only holds
/// processes that are still running.
#[derive(Debug, Default, Clone)]
pub struct ProcessSet {
    killers: Arc<Mutex<HashMap<u64, oneshot::Sender<()>>>>,
    next_id: Arc<AtomicU64>,
}

impl ProcessSet {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<()>>> {
        self.killers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self) -> (u64, oneshot::Receiver<()>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);
        (id, rx)
    }

    fn untrack(&self, id: u64) {
        self.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ask every tracked process to terminate. Returns how many were signalled.
    pub fn kill_all(&self) -> usize {
        let killers: Vec<_> = self.lock().drain().map(|(_, tx)| tx).collect();
        killers
            .into_iter()
            .filter_map(|k| k.send(()).ok())
            .count()
    }
}

/// First dev-server URL announced in a chunk of output.
pub fn detect_server_url(text: &str) -> Option<ServerReady> {
    static URL: OnceLock<Option<Regex>> = OnceLock::new();
    let url = URL
        .get_or_init(|| {
            Regex::new(r"https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1?\]):(\d{2,5})[^\s]*")
                .ok()
        })
        .as_ref()?;

    let cleaned = strip_ansi(text);
    let caps = url.captures(&cleaned)?;
    let port: u16 = caps.get(1)?.as_str().parse().ok()?;
    let whole = caps.get(0)?.as_str().trim_end_matches('/');
    Some(ServerReady {
        port,
        url: whole.to_string(),
    })
}

/// Read from an async reader and forward chunks, announcing the server
/// URL the first time one shows up.
async fn read_output_stream<R>(
    mut reader: R,
    output_tx: mpsc::Sender<Result<String>>,
    ready_tx: broadcast::Sender<ServerReady>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8_192];
    let mut announced = false;
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                if !announced {
                    if let Some(ready) = detect_server_url(&chunk) {
                        debug!(url = %ready.url, "Server URL detected in output");
                        let _ = ready_tx.send(ready);
                        announced = true;
                    }
                }
                if output_tx.send(Ok(chunk)).await.is_err() {
                    // Nobody is listening any more; keep draining so the
                    // child never blocks on a full pipe.
                    continue;
                }
            }
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = output_tx
                    .send(Err(LiveboxError::OutputStream(e.to_string())))
                    .await;
                break;
            }
        }
    }
}

/// Spawn `cmd` with piped stdout/stderr and report through a [`SpawnedProcess`].
pub fn spawn_piped(
    mut cmd: Command,
    ready_tx: broadcast::Sender<ServerReady>,
    processes: &ProcessSet,
) -> Result<SpawnedProcess> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| LiveboxError::SandboxExecution(format!("Failed to spawn process: {}", e)))?;

    let (output_tx, output_rx) = mpsc::channel(OUTPUT_BUFFER);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(read_output_stream(
            stdout,
            output_tx.clone(),
            ready_tx.clone(),
        ));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(read_output_stream(stderr, output_tx, ready_tx));
    }

    let (exit_tx, exit_rx) = oneshot::channel();
    let (id, kill_rx) = processes.track();
    let processes = processes.clone();
    tokio::spawn(async move {
        let code = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => status.code().unwrap_or(1),
                Err(e) => {
                    warn!(error = %e, "Failed to wait for process");
                    1
                }
            },
            // A dropped switch is not a kill request.
            Ok(()) = kill_rx => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill process");
                }
                137
            }
        };
        processes.untrack(id);
        let _ = exit_tx.send(code);
    });

    Ok(SpawnedProcess {
        output: output_rx,
        exit: exit_rx,
    })
}
