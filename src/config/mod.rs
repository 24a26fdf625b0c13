pub mod loader;
pub mod types;

pub use loader::{get_config_path, get_data_dir, load_config};
pub use types::{
    ApprovalConfig, BackendType, DockerConfig, EditorConfig, LiveboxConfig, MonitorConfig,
    RemoteConfig, SandboxConfig,
};
