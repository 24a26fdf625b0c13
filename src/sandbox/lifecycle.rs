//! Boot, install and serve state machine for one sandbox session.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::types::LiveboxConfig;
use crate::error::{LiveboxError, Result};
use crate::events::{Event, EventBus};
use crate::sandbox::monitor::OutputMonitor;
use crate::sandbox::traits::{SandboxEngine, ServerReady, SpawnedProcess};
use crate::session::SessionContext;
use crate::vfs::{mount_tree, FileTree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Idle,
    Booting,
    Booted,
    DepsInstalling,
    DepsInstalled,
    ServerStarting,
    ServerStarted,
    Error,
}

impl SandboxState {
    /// Only the linear successor is allowed, plus `Error` from anything
    /// that is not already `Error`.
    pub fn can_transition_to(self, next: SandboxState) -> bool {
        use SandboxState::*;
        matches!(
            (self, next),
            (Idle, Booting)
                | (Booting, Booted)
                | (Booted, DepsInstalling)
                | (DepsInstalling, DepsInstalled)
                | (DepsInstalled, ServerStarting)
                | (ServerStarting, ServerStarted)
        ) || (next == Error && self != Error)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SandboxState::ServerStarted | SandboxState::Error)
    }
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SandboxState::Idle => "idle",
            SandboxState::Booting => "booting",
            SandboxState::Booted => "booted",
            SandboxState::DepsInstalling => "deps_installing",
            SandboxState::DepsInstalled => "deps_installed",
            SandboxState::ServerStarting => "server_starting",
            SandboxState::ServerStarted => "server_started",
            SandboxState::Error => "error",
        };
        f.write_str(name)
    }
}

fn split_command(command: &[String]) -> Result<(&str, &[String])> {
    command
        .split_first()
        .map(|(program, args)| (program.as_str(), args))
        .ok_or_else(|| LiveboxError::Config("command must not be empty".to_string()))
}

/// Drives one session from `Idle` to `ServerStarted` (or `Error`).
///
/// Booting and receiving the file tree are independent facts that may
/// arrive in either order. Whichever completes the pair triggers mount,
/// install and server start, and that side effect runs at most once per
/// session id.
pub struct SandboxLifecycle {
    engine: Arc<dyn SandboxEngine>,
    bus: EventBus,
    session: SessionContext,
    monitor: Arc<Mutex<OutputMonitor>>,
    install_command: Vec<String>,
    dev_command: Vec<String>,
    state: SandboxState,
    history: Vec<SandboxState>,
    tree: Option<FileTree>,
    attempted: HashSet<String>,
    server: Option<ServerReady>,
    server_task: Option<JoinHandle<()>>,
    last_error: Option<String>,
}

impl SandboxLifecycle {
    pub fn new(
        engine: Arc<dyn SandboxEngine>,
        bus: EventBus,
        session: SessionContext,
        config: &LiveboxConfig,
    ) -> Result<Self> {
        split_command(&config.sandbox.install_command)?;
        split_command(&config.sandbox.dev_command)?;
        let monitor = OutputMonitor::new(&config.monitor)?.with_bus(bus.clone());

        Ok(Self {
            engine,
            bus,
            session,
            monitor: Arc::new(Mutex::new(monitor)),
            install_command: config.sandbox.install_command.clone(),
            dev_command: config.sandbox.dev_command.clone(),
            state: SandboxState::Idle,
            history: Vec::new(),
            tree: None,
            attempted: HashSet::new(),
            server: None,
            server_task: None,
            last_error: None,
        })
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }

    /// Every state entered so far, oldest first.
    pub fn history(&self) -> &[SandboxState] {
        &self.history
    }

    pub fn server(&self) -> Option<&ServerReady> {
        self.server.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn engine(&self) -> Arc<dyn SandboxEngine> {
        Arc::clone(&self.engine)
    }

    pub fn current_runtime_error(&self) -> Option<String> {
        self.monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current_error()
            .map(str::to_string)
    }

    /// Acquire the environment. Continues into mount/install/serve when the
    /// tree is already available.
    pub async fn boot(&mut self) -> Result<()> {
        self.transition(SandboxState::Booting)?;
        if let Err(e) = self.engine.boot(&self.session).await {
            return Err(self.fail(e));
        }
        self.transition(SandboxState::Booted)?;
        self.try_start().await
    }

    /// Hand over the file tree. Continues into mount/install/serve when the
    /// environment is already booted.
    pub async fn provide_tree(&mut self, tree: FileTree) -> Result<()> {
        debug!(files = tree.len(), "File tree provided");
        self.tree = Some(tree);
        self.try_start().await
    }

    /// Provide the tree, boot, and wait for the server.
    pub async fn run(&mut self, tree: FileTree) -> Result<ServerReady> {
        self.provide_tree(tree).await?;
        self.boot().await?;
        self.server.clone().ok_or_else(|| {
            LiveboxError::ServerStart("lifecycle finished without a server".to_string())
        })
    }

    async fn try_start(&mut self) -> Result<()> {
        if self.state != SandboxState::Booted || self.tree.is_none() {
            return Ok(());
        }
        if !self.attempted.insert(self.session.id.clone()) {
            debug!(session = %self.session.id, "Start already attempted for this session");
            return Ok(());
        }

        if let Err(e) = self.install_and_serve().await {
            return Err(self.fail(e));
        }
        Ok(())
    }

    async fn install_and_serve(&mut self) -> Result<()> {
        self.transition(SandboxState::DepsInstalling)?;

        if let Some(tree) = self.tree.as_ref() {
            mount_tree(self.engine.as_ref(), tree).await?;
        }

        let (program, args) = split_command(&self.install_command)?;
        info!(command = %self.install_command.join(" "), "Installing dependencies");
        let SpawnedProcess { mut output, exit } = self.engine.spawn(program, args).await?;

        while let Some(chunk) = output.recv().await {
            let text = chunk?;
            self.monitor
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .ingest(&text);
        }

        let exit_code = exit.await.map_err(|_| {
            LiveboxError::SandboxExecution("install process exit was never reported".to_string())
        })?;
        if exit_code != 0 {
            return Err(LiveboxError::InstallFailed { exit_code });
        }
        self.transition(SandboxState::DepsInstalled)?;

        let ready = self.start_server().await?;
        self.transition(SandboxState::ServerStarted)?;
        info!(url = %ready.url, port = ready.port, "Dev server ready");
        self.server = Some(ready.clone());
        self.bus.publish(Event::ServerReady(ready));
        Ok(())
    }

    async fn start_server(&mut self) -> Result<ServerReady> {
        self.transition(SandboxState::ServerStarting)?;

        // Subscribe first so an announcement during spawn is not missed.
        let mut ready = self.engine.subscribe_server_ready();
        let (program, args) = split_command(&self.dev_command)?;
        info!(command = %self.dev_command.join(" "), "Starting dev server");
        let SpawnedProcess { mut output, mut exit } = self.engine.spawn(program, args).await?;

        let monitor = Arc::clone(&self.monitor);
        self.server_task = Some(tokio::spawn(async move {
            while let Some(chunk) = output.recv().await {
                match chunk {
                    Ok(text) => {
                        monitor
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .ingest(&text);
                    }
                    Err(e) => warn!(error = %e, "Dev server output stream failed"),
                }
            }
            debug!("Dev server output closed");
        }));

        loop {
            tokio::select! {
                announced = ready.recv() => match announced {
                    Ok(server) => return Ok(server),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(LiveboxError::ServerStart(
                            "engine stopped reporting server readiness".to_string(),
                        ))
                    }
                },
                code = &mut exit => {
                    return Err(LiveboxError::ServerStart(match code {
                        Ok(code) => format!("dev server exited with code {} before binding a port", code),
                        Err(_) => "dev server exited before binding a port".to_string(),
                    }))
                }
            }
        }
    }

    fn transition(&mut self, next: SandboxState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(LiveboxError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        info!(from = %self.state, to = %next, "Sandbox state transition");
        self.state = next;
        self.history.push(next);
        self.bus.publish(Event::SandboxState(next));
        Ok(())
    }

    /// Record a fatal error and enter `Error`. No retry.
    fn fail(&mut self, error: LiveboxError) -> LiveboxError {
        warn!(state = %self.state, error = %error, "Sandbox lifecycle failed");
        self.last_error = Some(error.to_string());
        if self.state != SandboxState::Error {
            self.state = SandboxState::Error;
            self.history.push(SandboxState::Error);
            self.bus.publish(Event::SandboxState(SandboxState::Error));
        }
        error
    }

    /// Stop watching server output and shut the engine down.
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(task) = self.server_task.take() {
            task.abort();
        }
        self.engine.shutdown().await?;
        info!(session = %self.session.id, "Sandbox session shut down");
        Ok(())
    }
}

impl Drop for SandboxLifecycle {
    fn drop(&mut self) {
        if let Some(task) = self.server_task.take() {
            task.abort();
        }
    }
}
