//! In-process engine with a map-backed filesystem and scripted processes.
//!
//! Used for dry runs and for exercising the orchestration core without a
//! host toolchain. Every mutating call is recorded so ordering can be
//! asserted afterwards.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use crate::error::{LiveboxError, Result};
use crate::sandbox::traits::{SandboxEngine, ServerReady, SpawnedProcess};
use crate::session::SessionContext;
use crate::vfs::{join_path, normalize_path, DirEntry, MountNode, MountTree};

/// A recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOp {
    Boot,
    Mount,
    WriteFile(String),
    Spawn(String),
    Shutdown,
}

/// Canned behaviour for one command line.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProcess {
    /// Output chunks, in order. `Err` simulates a broken output stream.
    pub chunks: Vec<std::result::Result<String, String>>,
    /// Exit code, or `None` to keep running until shutdown.
    pub exit_code: Option<i32>,
    /// Port announced as ready once the output has been queued.
    pub announce: Option<u16>,
}

impl ScriptedProcess {
    pub fn exits(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            ..Self::default()
        }
    }

    /// Long-running server that announces `port`.
    pub fn server(port: u16) -> Self {
        Self {
            announce: Some(port),
            ..Self::default()
        }
    }

    /// Long-running process that never announces a port.
    pub fn hangs() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, chunk: impl Into<String>) -> Self {
        self.chunks.push(Ok(chunk.into()));
        self
    }

    pub fn with_stream_error(mut self, message: impl Into<String>) -> Self {
        self.chunks.push(Err(message.into()));
        self
    }
}

struct LiveProcess {
    command: String,
    output: mpsc::Sender<Result<String>>,
    exit: oneshot::Sender<i32>,
}

#[derive(Default)]
struct MemoryState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    ops: Vec<EngineOp>,
    live: Vec<LiveProcess>,
    booted: bool,
}

/// Map-backed engine with scripted processes.
pub struct MemoryEngine {
    state: Mutex<MemoryState>,
    scripts: Mutex<HashMap<String, ScriptedProcess>>,
    failing_writes: Mutex<HashSet<String>>,
    fail_mount: Mutex<bool>,
    ready_tx: broadcast::Sender<ServerReady>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

impl MemoryEngine {
    pub fn new() -> Self {
        let (ready_tx, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(MemoryState::default()),
            scripts: Mutex::new(HashMap::new()),
            failing_writes: Mutex::new(HashSet::new()),
            fail_mount: Mutex::new(false),
            ready_tx,
        }
    }

    /// Script the process spawned for `command` (program and args joined by spaces).
    /// Unscripted commands exit 0 without output.
    pub fn with_script(self, command: &str, script: ScriptedProcess) -> Self {
        self.script(command, script);
        self
    }

    pub fn script(&self, command: &str, script: ScriptedProcess) {
        lock(&self.scripts).insert(command.to_string(), script);
    }

    /// Make every write to `path` fail.
    pub fn fail_writes_to(&self, path: &str) {
        lock(&self.failing_writes).insert(path.to_string());
    }

    pub fn fail_mounts(&self) {
        *lock(&self.fail_mount) = true;
    }

    /// Every recorded call, oldest first.
    pub fn ops(&self) -> Vec<EngineOp> {
        lock(&self.state).ops.clone()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        let path = normalize_path(path).ok()?;
        lock(&self.state).files.get(&path).cloned()
    }

    /// Put a file in place without recording an operation, as if a process wrote it.
    pub fn seed_file(&self, path: &str, contents: impl Into<Vec<u8>>) -> Result<()> {
        let path = normalize_path(path)?;
        let mut state = lock(&self.state);
        insert_file(&mut state, path, contents.into());
        Ok(())
    }

    /// Emit a chunk from the most recently spawned long-running process.
    pub fn push_output(&self, chunk: impl Into<String>) -> bool {
        let state = lock(&self.state);
        match state.live.last() {
            Some(process) => process.output.try_send(Ok(chunk.into())).is_ok(),
            None => false,
        }
    }

    /// Make the most recently spawned long-running process exit.
    pub fn exit_live(&self, code: i32) -> bool {
        let process = lock(&self.state).live.pop();
        match process {
            Some(process) => {
                debug!(command = %process.command, code = code, "Scripted process exited");
                process.exit.send(code).is_ok()
            }
            None => false,
        }
    }

    /// Booted and not yet shut down.
    pub fn is_booted(&self) -> bool {
        lock(&self.state).booted
    }

    pub fn live_processes(&self) -> usize {
        lock(&self.state).live.len()
    }
}

fn insert_file(state: &mut MemoryState, path: String, contents: Vec<u8>) {
    let mut parent = path.as_str();
    while let Some((dir, _)) = parent.rsplit_once('/') {
        state.dirs.insert(dir.to_string());
        parent = dir;
    }
    state.files.insert(path, contents);
}

fn mount_level(state: &mut MemoryState, prefix: &str, tree: &MountTree) {
    for (name, node) in tree {
        let path = join_path(prefix, name);
        match node {
            MountNode::File { contents } => {
                insert_file(state, path, contents.clone().into_bytes());
            }
            MountNode::Directory(children) => {
                state.dirs.insert(path.clone());
                mount_level(state, &path, children);
            }
        }
    }
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

fn name_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, name)| name).unwrap_or(path)
}

#[async_trait]
impl SandboxEngine for MemoryEngine {
    fn name(&self) -> &str {
        "memory"
    }

    async fn boot(&self, _session: &SessionContext) -> Result<()> {
        let mut state = lock(&self.state);
        state.booted = true;
        state.ops.push(EngineOp::Boot);
        Ok(())
    }

    async fn mount(&self, tree: &MountTree) -> Result<()> {
        if *lock(&self.fail_mount) {
            return Err(LiveboxError::SandboxExecution(
                "mount rejected".to_string(),
            ));
        }
        let mut state = lock(&self.state);
        state.ops.push(EngineOp::Mount);
        mount_level(&mut state, "", tree);
        Ok(())
    }

    async fn spawn(&self, program: &str, args: &[String]) -> Result<SpawnedProcess> {
        let command = command_line(program, args);
        let script = lock(&self.scripts)
            .get(&command)
            .cloned()
            .unwrap_or_else(|| ScriptedProcess::exits(0));
        debug!(command = %command, "Spawning scripted process");

        let (output_tx, output_rx) = mpsc::channel(script.chunks.len() + 64);
        let (exit_tx, exit_rx) = oneshot::channel();

        for chunk in script.chunks {
            let item = chunk.map_err(LiveboxError::OutputStream);
            let _ = output_tx.try_send(item);
        }
        if let Some(port) = script.announce {
            let _ = self.ready_tx.send(ServerReady::localhost(port));
        }

        let mut state = lock(&self.state);
        state.ops.push(EngineOp::Spawn(command.clone()));
        match script.exit_code {
            Some(code) => {
                let _ = exit_tx.send(code);
            }
            None => state.live.push(LiveProcess {
                command,
                output: output_tx,
                exit: exit_tx,
            }),
        }

        Ok(SpawnedProcess {
            output: output_rx,
            exit: exit_rx,
        })
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize_path(path)?;
        lock(&self.state)
            .files
            .get(&path)
            .cloned()
            .ok_or(LiveboxError::FileNotFound { path })
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<()> {
        let path = normalize_path(path)?;
        if lock(&self.failing_writes).contains(&path) {
            return Err(LiveboxError::SandboxExecution(format!(
                "write to {} rejected",
                path
            )));
        }
        let mut state = lock(&self.state);
        state.ops.push(EngineOp::WriteFile(path.clone()));
        insert_file(&mut state, path, contents.to_vec());
        Ok(())
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let path = normalize_path(path)?;
        let state = lock(&self.state);
        if !path.is_empty() && !state.dirs.contains(&path) {
            return Err(LiveboxError::FileNotFound { path });
        }

        let mut listing: Vec<DirEntry> = state
            .dirs
            .iter()
            .filter(|d| parent_of(d) == path)
            .map(|d| DirEntry::dir(name_of(d)))
            .collect();
        listing.extend(
            state
                .files
                .keys()
                .filter(|f| parent_of(f) == path)
                .map(|f| DirEntry::file(name_of(f))),
        );
        listing.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listing)
    }

    fn subscribe_server_ready(&self) -> broadcast::Receiver<ServerReady> {
        self.ready_tx.subscribe()
    }

    async fn shutdown(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.ops.push(EngineOp::Shutdown);
        for process in state.live.drain(..) {
            let _ = process.exit.send(137);
        }
        state.booted = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_process_replays_output_then_exits() {
        let engine = MemoryEngine::new().with_script(
            "npm install",
            ScriptedProcess::exits(0).with_output("added 12 packages"),
        );

        let mut process = engine
            .spawn("npm", &["install".to_string()])
            .await
            .unwrap();
        assert_eq!(
            process.output.recv().await.unwrap().unwrap(),
            "added 12 packages"
        );
        assert!(process.output.recv().await.is_none());
        assert_eq!(process.exit.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn long_running_process_exits_on_shutdown() {
        let engine = MemoryEngine::new().with_script("npm run dev", ScriptedProcess::server(5173));
        engine.boot(&SessionContext::anonymous()).await.unwrap();
        assert!(engine.is_booted());
        let mut ready = engine.subscribe_server_ready();

        let process = engine
            .spawn("npm", &["run".to_string(), "dev".to_string()])
            .await
            .unwrap();
        assert_eq!(ready.recv().await.unwrap(), ServerReady::localhost(5173));
        assert_eq!(engine.live_processes(), 1);

        engine.shutdown().await.unwrap();
        assert_eq!(process.exit.await.unwrap(), 137);
        assert_eq!(engine.live_processes(), 0);
        assert!(!engine.is_booted());
    }

    #[tokio::test]
    async fn read_dir_lists_immediate_children() {
        let engine = MemoryEngine::new();
        engine.write_file("src/app.tsx", b"x").await.unwrap();
        engine.write_file("src/lib/util.ts", b"y").await.unwrap();
        engine.write_file("package.json", b"{}").await.unwrap();

        assert_eq!(
            engine.read_dir("").await.unwrap(),
            vec![DirEntry::file("package.json"), DirEntry::dir("src")]
        );
        assert_eq!(
            engine.read_dir("src").await.unwrap(),
            vec![DirEntry::file("app.tsx"), DirEntry::dir("lib")]
        );
        assert!(engine.read_dir("missing").await.is_err());
    }

    #[tokio::test]
    async fn rejected_writes_leave_no_trace() {
        let engine = MemoryEngine::new();
        engine.fail_writes_to("locked.txt");
        assert!(engine.write_file("locked.txt", b"x").await.is_err());
        assert!(engine.file("locked.txt").is_none());
        assert!(engine.ops().is_empty());
    }
}
