mod backends;
mod factory;
mod lifecycle;
pub mod monitor;
mod traits;

#[cfg(feature = "local")]
pub use backends::LocalEngine;

#[cfg(feature = "docker")]
pub use backends::DockerEngine;

pub use backends::{EngineOp, MemoryEngine, ScriptedProcess};
pub use factory::{
    available_backends, create_engine, resolve_backend_type, workspace_root, BackendInfo,
};
pub use lifecycle::{SandboxLifecycle, SandboxState};
pub use monitor::{strip_ansi, OutputMonitor};
pub use traits::{SandboxEngine, ServerReady, SpawnedProcess};
