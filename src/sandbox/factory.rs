use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::config::get_data_dir;
use crate::config::types::{BackendType, SandboxConfig};
use crate::error::{LiveboxError, Result};
use crate::sandbox::backends::{MemoryEngine, ScriptedProcess};
use crate::sandbox::traits::SandboxEngine;
use crate::session::SessionContext;

#[cfg(feature = "local")]
use crate::sandbox::backends::LocalEngine;

#[cfg(feature = "docker")]
use crate::sandbox::backends::DockerEngine;

/// Host directory a session's tree is mounted into. One fresh directory
/// per session, so every boot starts from an empty environment.
pub fn workspace_root(config: &SandboxConfig, session: &SessionContext) -> PathBuf {
    let base = match &config.workdir {
        Some(dir) => PathBuf::from(dir),
        None => get_data_dir().join("workspaces"),
    };
    base.join(&session.id)
}

/// Create a sandbox engine based on the configuration.
///
/// This factory function selects and instantiates the appropriate backend
/// based on the configured backend type and platform availability.
pub fn create_engine(
    config: &SandboxConfig,
    session: &SessionContext,
) -> Result<Arc<dyn SandboxEngine>> {
    let backend_type = resolve_backend_type(&config.backend)?;
    info!(backend = ?backend_type, session = %session.id, "Creating sandbox engine");

    match backend_type {
        #[cfg(feature = "local")]
        BackendType::Local => Ok(Arc::new(LocalEngine::new(workspace_root(config, session)))),
        #[cfg(not(feature = "local"))]
        BackendType::Local => Err(LiveboxError::BackendNotAvailable {
            backend: "local".to_string(),
            reason: "Local support was not compiled in. Rebuild with --features local".to_string(),
        }),

        #[cfg(feature = "docker")]
        BackendType::Docker => Ok(Arc::new(DockerEngine::new(
            config.docker.clone(),
            workspace_root(config, session),
            config.memory_limit_mb,
        )?)),
        #[cfg(not(feature = "docker"))]
        BackendType::Docker => Err(LiveboxError::BackendNotAvailable {
            backend: "docker".to_string(),
            reason: "Docker support was not compiled in. Rebuild with --features docker"
                .to_string(),
        }),

        BackendType::Memory => Ok(Arc::new(dry_run_engine(config))),

        BackendType::Auto => Err(LiveboxError::BackendNotAvailable {
            backend: "auto".to_string(),
            reason: "backend selection did not resolve".to_string(),
        }),
    }
}

/// Memory engine scripted so the configured commands succeed: install
/// exits 0 and the dev server announces the first configured port.
fn dry_run_engine(config: &SandboxConfig) -> MemoryEngine {
    let port = config.docker.ports.first().copied().unwrap_or(5173);
    MemoryEngine::new()
        .with_script(&config.install_command.join(" "), ScriptedProcess::exits(0))
        .with_script(&config.dev_command.join(" "), ScriptedProcess::server(port))
}

/// Resolve the backend type, handling Auto selection.
pub fn resolve_backend_type(requested: &BackendType) -> Result<BackendType> {
    match requested {
        BackendType::Auto => {
            // Priority: Docker > Local
            #[cfg(feature = "docker")]
            {
                if DockerEngine::is_available() {
                    return Ok(BackendType::Docker);
                }
            }

            if cfg!(feature = "local") {
                Ok(BackendType::Local)
            } else {
                Err(LiveboxError::BackendNotAvailable {
                    backend: "auto".to_string(),
                    reason: "No sandbox backends available".to_string(),
                })
            }
        }
        #[cfg(feature = "docker")]
        BackendType::Docker => {
            if !DockerEngine::is_available() {
                return Err(LiveboxError::BackendNotAvailable {
                    backend: "docker".to_string(),
                    reason: "Docker daemon is not accessible. Ensure Docker is installed and running."
                        .to_string(),
                });
            }
            Ok(BackendType::Docker)
        }
        other => Ok(other.clone()),
    }
}

/// Get information about available backends on this system.
pub fn available_backends() -> Vec<BackendInfo> {
    let mut backends = Vec::new();

    backends.push(BackendInfo {
        name: "local",
        available: cfg!(feature = "local"),
        description: "Host working directory, processes run directly",
        unavailable_reason: if cfg!(feature = "local") {
            None
        } else {
            Some("Not compiled in (use --features local)")
        },
    });

    #[cfg(feature = "docker")]
    {
        let available = DockerEngine::is_available();
        backends.push(BackendInfo {
            name: "docker",
            available,
            description: "Workdir bind-mounted into a Docker session container",
            unavailable_reason: if available {
                None
            } else {
                Some("Docker daemon not accessible")
            },
        });
    }

    #[cfg(not(feature = "docker"))]
    {
        backends.push(BackendInfo {
            name: "docker",
            available: false,
            description: "Workdir bind-mounted into a Docker session container",
            unavailable_reason: Some("Not compiled in (use --features docker)"),
        });
    }

    backends.push(BackendInfo {
        name: "memory",
        available: true,
        description: "In-process dry run with scripted processes",
        unavailable_reason: None,
    });

    backends
}

/// Information about a sandbox backend.
#[derive(Debug, Clone)]
pub struct BackendInfo {
    pub name: &'static str,
    pub available: bool,
    pub description: &'static str,
    pub unavailable_reason: Option<&'static str>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxLifecycle;
    use crate::config::types::LiveboxConfig;
    use crate::events::EventBus;
    use crate::vfs::FileTree;

    #[test]
    fn workspace_is_per_session() {
        let config = SandboxConfig {
            workdir: Some("/tmp/livebox".to_string()),
            ..SandboxConfig::default()
        };
        let a = SessionContext::anonymous();
        let b = SessionContext::anonymous();
        assert_ne!(workspace_root(&config, &a), workspace_root(&config, &b));
        assert!(workspace_root(&config, &a).starts_with("/tmp/livebox"));
    }

    #[test]
    fn explicit_backends_resolve_to_themselves() {
        assert_eq!(
            resolve_backend_type(&BackendType::Memory).unwrap(),
            BackendType::Memory
        );
        assert_ne!(
            resolve_backend_type(&BackendType::Auto).unwrap_or(BackendType::Memory),
            BackendType::Auto
        );
    }

    #[tokio::test]
    async fn dry_run_engine_reaches_server_started() {
        let mut config = LiveboxConfig::default();
        config.sandbox.backend = BackendType::Memory;
        config.sandbox.dev_command = vec!["pnpm".to_string(), "dev".to_string()];
        let session = SessionContext::anonymous();

        let engine = create_engine(&config.sandbox, &session).unwrap();
        let mut lifecycle =
            SandboxLifecycle::new(engine, EventBus::new(), session, &config).unwrap();

        let server = lifecycle.run(FileTree::new()).await.unwrap();
        assert_eq!(server.port, 5173);
    }

    #[test]
    fn memory_backend_is_always_listed() {
        assert!(available_backends()
            .iter()
            .any(|b| b.name == "memory" && b.available));
    }
}
