use std::path::{Path, PathBuf};

use crate::config::types::LiveboxConfig;
use crate::error::{LiveboxError, Result};

/// Get the default configuration file path
pub fn get_config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "livebox", "livebox") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        // Fallback to home directory
        dirs_fallback().join(".livebox").join("config.toml")
    }
}

fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(config_path: Option<&Path>) -> Result<LiveboxConfig> {
    let path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(get_config_path);

    if !path.exists() {
        // Return defaults if no config file exists
        return Ok(LiveboxConfig::default());
    }

    let content = std::fs::read_to_string(&path)?;
    parse_config(&content)
}

/// Parse configuration text, rejecting values that cannot drive a session.
pub fn parse_config(content: &str) -> Result<LiveboxConfig> {
    let config: LiveboxConfig =
        toml::from_str(content).map_err(|e| LiveboxError::TomlParse(e.to_string()))?;

    if config.sandbox.install_command.is_empty() {
        return Err(LiveboxError::Config(
            "sandbox.install_command must name a program".to_string(),
        ));
    }
    if config.sandbox.dev_command.is_empty() {
        return Err(LiveboxError::Config(
            "sandbox.dev_command must name a program".to_string(),
        ));
    }

    Ok(config)
}

/// Get the data directory for scratch sandbox workdirs
pub fn get_data_dir() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "livebox", "livebox") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        dirs_fallback().join(".local").join("share").join("livebox")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.sandbox.dev_command, vec!["npm", "run", "dev"]);
    }

    #[test]
    fn reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[editor]\nmin_reveal_line = 4\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.editor.min_reveal_line, 4);
    }

    #[test]
    fn rejects_empty_commands() {
        let err = parse_config("[sandbox]\ninstall_command = []\n").unwrap_err();
        assert!(matches!(err, LiveboxError::Config(_)));
    }

    #[test]
    fn reports_toml_syntax_errors() {
        let err = parse_config("[sandbox\n").unwrap_err();
        assert!(matches!(err, LiveboxError::TomlParse(_)));
    }
}
