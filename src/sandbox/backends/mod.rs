#[cfg(any(feature = "local", feature = "docker"))]
mod host_fs;
#[cfg(any(feature = "local", feature = "docker"))]
mod process;

#[cfg(feature = "local")]
mod local;

#[cfg(feature = "local")]
pub use local::LocalEngine;

#[cfg(feature = "docker")]
mod docker;

#[cfg(feature = "docker")]
pub use docker::DockerEngine;

mod memory;

pub use memory::{EngineOp, MemoryEngine, ScriptedProcess};
