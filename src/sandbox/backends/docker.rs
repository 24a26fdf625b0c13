use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::host_fs::HostFs;
use super::process::{spawn_piped, ProcessSet};
use crate::config::types::DockerConfig;
use crate::error::{LiveboxError, Result};
use crate::sandbox::traits::{SandboxEngine, ServerReady, SpawnedProcess};
use crate::session::SessionContext;
use crate::vfs::{DirEntry, MountTree};

/// Mount point of the session workdir inside the container
const CONTAINER_WORKDIR: &str = "/workspace";

/// Docker sandbox engine.
///
/// The tree lives in a host directory that is bind-mounted into one
/// long-lived session container. Processes run via `docker exec`, so the
/// install step and the dev server share the container's filesystem and
/// toolchain. File operations go straight to the host side of the mount.
pub struct DockerEngine {
    image: String,
    fs: HostFs,
    memory_limit_mb: u64,
    enable_networking: bool,
    ports: Vec<u16>,
    processes: ProcessSet,
    ready_tx: broadcast::Sender<ServerReady>,
    /// Session container ID once booted (protected by Mutex for interior mutability)
    container_id: Mutex<Option<String>>,
}

impl DockerEngine {
    /// Create a new Docker engine. The container starts on `boot`.
    pub fn new(config: DockerConfig, root: PathBuf, memory_limit_mb: u64) -> Result<Self> {
        if !Self::is_available() {
            return Err(LiveboxError::BackendNotAvailable {
                backend: "docker".to_string(),
                reason: "Docker daemon is not accessible. Ensure Docker is installed and running."
                    .to_string(),
            });
        }

        let (ready_tx, _) = broadcast::channel(16);
        Ok(Self {
            image: config.image,
            fs: HostFs::new(root),
            memory_limit_mb,
            enable_networking: config.enable_networking,
            ports: config.ports,
            processes: ProcessSet::default(),
            ready_tx,
            container_id: Mutex::new(None),
        })
    }

    /// Check if the Docker backend is available on this system.
    ///
    /// Returns true if Docker daemon is accessible.
    pub fn is_available() -> bool {
        match std::process::Command::new("docker")
            .args(["info"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) => status.success(),
            Err(_) => false,
        }
    }

    /// Check if a Docker image exists locally.
    async fn image_exists(image: &str) -> bool {
        match Command::new("docker")
            .args(["image", "inspect", image])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(_) => false,
        }
    }

    async fn pull_image(image: &str) -> Result<()> {
        info!(image = %image, "Pulling Docker image...");
        let output = Command::new("docker")
            .args(["pull", image])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| LiveboxError::SandboxInit(format!("Failed to run docker pull: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LiveboxError::SandboxInit(format!(
                "Failed to pull Docker image '{}': {}",
                image, stderr
            )));
        }
        Ok(())
    }

    /// Start the long-lived session container.
    async fn start_container(&self) -> Result<String> {
        let mut cmd = Command::new("docker");
        cmd.args(["run", "-d"]);

        if !self.enable_networking {
            cmd.arg("--network=none");
        }

        cmd.arg(format!("--memory={}m", self.memory_limit_mb));

        for port in &self.ports {
            cmd.arg("-p");
            cmd.arg(format!("{}:{}", port, port));
        }

        cmd.arg("-v");
        cmd.arg(format!(
            "{}:{}:rw",
            self.fs.root().display(),
            CONTAINER_WORKDIR
        ));
        cmd.args(["-w", CONTAINER_WORKDIR]);

        // Image and command to keep container running
        cmd.arg(&self.image);
        cmd.args(["tail", "-f", "/dev/null"]);

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let output = cmd.output().await.map_err(|e| {
            LiveboxError::SandboxInit(format!("Failed to start Docker session: {}", e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LiveboxError::SandboxInit(format!(
                "Failed to start Docker session: {}",
                stderr
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn get_container_id(&self) -> Option<String> {
        self.container_id.lock().ok().and_then(|guard| guard.clone())
    }

    /// Stop and remove the session container.
    async fn stop_container(&self, container_id: &str) -> Result<()> {
        info!(container_id = %container_id, "Stopping Docker session container...");

        let rm_output = Command::new("docker")
            .args(["rm", "-f", container_id])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                LiveboxError::SandboxExecution(format!("Failed to remove container: {}", e))
            })?;

        if !rm_output.status.success() {
            let stderr = String::from_utf8_lossy(&rm_output.stderr);
            warn!(container_id = %container_id, error = %stderr, "Failed to remove container");
        }

        info!(container_id = %container_id, "Docker session container stopped");
        Ok(())
    }
}

#[async_trait]
impl SandboxEngine for DockerEngine {
    fn name(&self) -> &str {
        "docker"
    }

    async fn boot(&self, session: &SessionContext) -> Result<()> {
        self.fs.prepare().await?;

        if !Self::image_exists(&self.image).await {
            Self::pull_image(&self.image).await?;
        }

        let container_id = self.start_container().await?;
        info!(
            session = %session.id,
            container_id = %container_id,
            image = %self.image,
            "Docker session container started"
        );

        let mut id_lock = self
            .container_id
            .lock()
            .map_err(|e| LiveboxError::SandboxInit(format!("Failed to acquire lock: {}", e)))?;
        *id_lock = Some(container_id);
        Ok(())
    }

    async fn mount(&self, tree: &MountTree) -> Result<()> {
        self.fs.mount(tree).await
    }

    async fn spawn(&self, program: &str, args: &[String]) -> Result<SpawnedProcess> {
        let container_id = self.get_container_id().ok_or_else(|| {
            LiveboxError::SandboxExecution("Docker session container is not running".to_string())
        })?;
        debug!(container_id = %container_id, program = %program, "Executing via docker exec");

        let mut cmd = Command::new("docker");
        cmd.args(["exec", "-w", CONTAINER_WORKDIR]);
        cmd.arg(&container_id);
        cmd.arg(program);
        cmd.args(args);
        spawn_piped(cmd, self.ready_tx.clone(), &self.processes)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.fs.read_file(path).await
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<()> {
        self.fs.write_file(path, contents).await
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        self.fs.read_dir(path).await
    }

    fn subscribe_server_ready(&self) -> broadcast::Receiver<ServerReady> {
        self.ready_tx.subscribe()
    }

    async fn shutdown(&self) -> Result<()> {
        self.processes.kill_all();
        if let Some(container_id) = self.get_container_id() {
            self.stop_container(&container_id).await?;

            if let Ok(mut lock) = self.container_id.lock() {
                *lock = None;
            }
        }
        Ok(())
    }
}
