use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveboxConfig {
    pub sandbox: SandboxConfig,
    pub monitor: MonitorConfig,
    pub editor: EditorConfig,
    pub approval: ApprovalConfig,
    pub remote: RemoteConfig,
}

/// The type of sandbox engine to use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Host working directory with processes spawned directly
    Local,
    /// Host working directory bind-mounted into a Docker container
    Docker,
    /// In-process filesystem with scripted processes (tests, dry runs)
    Memory,
    /// Automatically select the best available backend
    #[default]
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Which backend to use
    pub backend: BackendType,
    /// Host directory the tree is mounted into (a temp dir when unset)
    pub workdir: Option<String>,
    /// Dependency install command, program first
    pub install_command: Vec<String>,
    /// Long-running dev server command, program first
    pub dev_command: Vec<String>,
    /// Memory limit in MB (docker only)
    pub memory_limit_mb: u64,
    /// Directory names skipped when re-exporting the sandbox tree
    pub ignore: Vec<String>,
    /// Docker-specific configuration
    pub docker: DockerConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            workdir: None,
            install_command: vec!["npm".to_string(), "install".to_string()],
            dev_command: vec!["npm".to_string(), "run".to_string(), "dev".to_string()],
            memory_limit_mb: 1024,
            ignore: vec!["node_modules".to_string(), ".git".to_string()],
            docker: DockerConfig::default(),
        }
    }
}

/// Docker-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Image the session container runs
    pub image: String,
    /// Enable networking in the container (needed for package installs)
    pub enable_networking: bool,
    /// Container ports published to the host, same number on both sides
    pub ports: Vec<u16>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            image: "node:20-slim".to_string(),
            enable_networking: true,
            ports: vec![5173],
        }
    }
}

/// Runtime error detection over dev server output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Ordered matchers, compiled case-insensitive. First match wins.
    pub patterns: Vec<String>,
    /// Marks the first stack-trace line; the message is cut there.
    pub stack_marker: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            patterns: vec![
                r"\[[\w:.-]+\]\s*(internal server\s+)?error".to_string(),
                r"syntaxerror".to_string(),
                r"uncaught\s+\w*".to_string(),
            ],
            stack_marker: r"\n\s*at\s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Lines above this are revealed at this line instead, so fixed chrome
    /// never covers a highlight near the top of a file.
    pub min_reveal_line: u32,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self { min_reveal_line: 10 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Give up on a pending tool call after this many seconds (None = wait)
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the remote schema store
    pub schema_endpoint: String,
    /// File the schema push tool writes into the sandbox
    pub schema_file: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            schema_endpoint: "https://api.instantdb.com".to_string(),
            schema_file: "instant.schema.ts".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: LiveboxConfig = toml::from_str("").unwrap();
        assert_eq!(config.sandbox.backend, BackendType::Auto);
        assert_eq!(config.sandbox.install_command, vec!["npm", "install"]);
        assert_eq!(config.editor.min_reveal_line, 10);
        assert!(config.approval.timeout_seconds.is_none());
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let config: LiveboxConfig = toml::from_str(
            r#"
            [sandbox]
            backend = "docker"
            dev_command = ["pnpm", "dev"]

            [approval]
            timeout_seconds = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.sandbox.backend, BackendType::Docker);
        assert_eq!(config.sandbox.dev_command, vec!["pnpm", "dev"]);
        assert_eq!(config.sandbox.ignore, vec!["node_modules", ".git"]);
        assert_eq!(config.sandbox.docker.image, "node:20-slim");
        assert_eq!(config.approval.timeout_seconds, Some(30));
    }
}
