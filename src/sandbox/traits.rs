use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::Result;
use crate::session::SessionContext;
use crate::vfs::{DirEntry, MountTree};

/// Reported by the engine once a spawned server binds a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerReady {
    pub port: u16,
    pub url: String,
}

impl ServerReady {
    pub fn localhost(port: u16) -> Self {
        Self {
            port,
            url: format!("http://localhost:{}", port),
        }
    }
}

/// Handle to a process running inside the sandbox.
///
/// `output` yields chunks as they are produced, not necessarily
/// line-aligned, and closes once the process has released its output.
/// `exit` resolves once with the exit code.
pub struct SpawnedProcess {
    pub output: mpsc::Receiver<Result<String>>,
    pub exit: oneshot::Receiver<i32>,
}

/// The small operation contract the orchestration core drives.
///
/// Paths are relative to the sandbox root and use `/` separators.
#[async_trait]
pub trait SandboxEngine: Send + Sync {
    /// Returns the backend name (e.g., "local", "docker")
    fn name(&self) -> &str;

    /// Bring up an empty, ready environment.
    /// Default implementation is a no-op for engines that are ready on construction.
    async fn boot(&self, _session: &SessionContext) -> Result<()> {
        Ok(())
    }

    /// Materialize a whole tree in one structural call.
    async fn mount(&self, tree: &MountTree) -> Result<()>;

    /// Spawn a process; output and exit are reported asynchronously.
    async fn spawn(&self, program: &str, args: &[String]) -> Result<SpawnedProcess>;

    /// Read a file's raw bytes
    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    /// Write raw bytes, creating parent directories as needed
    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<()>;

    /// List a directory ("" is the root)
    async fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>>;

    /// Subscribe to server-ready announcements. Subscribe before spawning
    /// the server so the announcement cannot be missed.
    fn subscribe_server_ready(&self) -> broadcast::Receiver<ServerReady>;

    /// Gracefully shutdown the sandbox and any processes it still runs.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
