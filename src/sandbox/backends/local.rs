use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::host_fs::HostFs;
use super::process::{spawn_piped, ProcessSet};
use crate::error::Result;
use crate::sandbox::traits::{SandboxEngine, ServerReady, SpawnedProcess};
use crate::session::SessionContext;
use crate::vfs::{DirEntry, MountTree};

/// Local sandbox engine.
///
/// Mounts the tree into a dedicated host directory and runs processes
/// directly on the host with that directory as their working directory.
/// No isolation beyond the directory boundary.
pub struct LocalEngine {
    fs: HostFs,
    processes: ProcessSet,
    ready_tx: broadcast::Sender<ServerReady>,
}

impl LocalEngine {
    pub fn new(root: PathBuf) -> Self {
        let (ready_tx, _) = broadcast::channel(16);
        Self {
            fs: HostFs::new(root),
            processes: ProcessSet::default(),
            ready_tx,
        }
    }
}

#[async_trait]
impl SandboxEngine for LocalEngine {
    fn name(&self) -> &str {
        "local"
    }

    async fn boot(&self, session: &SessionContext) -> Result<()> {
        self.fs.prepare().await?;
        info!(
            session = %session.id,
            root = %self.fs.root().display(),
            "Local sandbox booted"
        );
        Ok(())
    }

    async fn mount(&self, tree: &MountTree) -> Result<()> {
        self.fs.mount(tree).await
    }

    async fn spawn(&self, program: &str, args: &[String]) -> Result<SpawnedProcess> {
        debug!(program = %program, args = ?args, "Spawning local process");
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(self.fs.root());
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
        let killed = self.processes.kill_all();
        info!(killed = killed, "Local sandbox shut down");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::vfs::MountNode;

    #[tokio::test]
    async fn processes_run_inside_the_mounted_root() {
        let dir = tempfile::tempdir().unwrap();
        let engine = LocalEngine::new(dir.path().join("ws"));
        engine.boot(&SessionContext::anonymous()).await.unwrap();

        let mut tree = MountTree::new();
        tree.insert(
            "greeting.txt".to_string(),
            MountNode::File {
                contents: "hi there".to_string(),
            },
        );
        engine.mount(&tree).await.unwrap();

        let mut process = engine
            .spawn("cat", &["greeting.txt".to_string()])
            .await
            .unwrap();
        let mut output = String::new();
        while let Some(chunk) = process.output.recv().await {
            output.push_str(&chunk.unwrap());
        }
        assert_eq!(output, "hi there");
        assert_eq!(process.exit.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn announced_url_reaches_subscribers() {
        let dir = tempfile::tempdir().unwrap();
        let engine = LocalEngine::new(dir.path().to_path_buf());
        let mut ready = engine.subscribe_server_ready();

        let _process = engine
            .spawn(
                "sh",
                &[
                    "-c".to_string(),
                    "echo 'Local: http://localhost:4321/'".to_string(),
                ],
            )
            .await
            .unwrap();

        assert_eq!(ready.recv().await.unwrap().port, 4321);
    }

    #[tokio::test]
    async fn missing_program_is_an_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = LocalEngine::new(dir.path().to_path_buf());
        assert!(engine
            .spawn("livebox-definitely-not-a-program", &[])
            .await
            .is_err());
    }
}
