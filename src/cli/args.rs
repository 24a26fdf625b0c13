use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::types::BackendType;

#[derive(Parser, Debug)]
#[clap(name = "livebox")]
#[clap(version, about = "Live-editing sandbox for web app source trees")]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(flatten)]
    pub global_opts: GlobalOpts,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Configuration file path
    #[clap(short, long, global = true, env = "LIVEBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[clap(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mount a source tree, install dependencies and run its dev server
    Up(UpArgs),

    /// Pack a directory into a .tar.gz snapshot
    Snapshot(SnapshotArgs),

    /// List sandbox backends and whether they can run here
    Backends,

    /// Initialize a new livebox configuration
    Init(InitArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

// ============================================================================
// Session Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct UpArgs {
    /// Source directory or .tar.gz snapshot
    pub source: PathBuf,

    /// Override the configured sandbox backend
    #[clap(long, short = 'b', value_enum)]
    pub backend: Option<BackendType>,

    /// Identifier of the app in the remote store
    #[clap(long)]
    pub app_id: Option<String>,

    /// Bearer credential for remote calls
    #[clap(long, env = "LIVEBOX_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Schema file to push to the remote store once the server is up
    #[clap(long, value_name = "FILE")]
    pub push_schema: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SnapshotArgs {
    /// Directory to pack
    pub source: PathBuf,

    /// Output archive path
    pub output: PathBuf,
}

// ============================================================================
// Configuration Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force overwrite existing configuration
    #[clap(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[clap(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn up_accepts_backend_override() {
        let cli = Cli::try_parse_from(["livebox", "up", "./app", "--backend", "memory"]).unwrap();
        match cli.command {
            Commands::Up(args) => {
                assert_eq!(args.source, PathBuf::from("./app"));
                assert_eq!(args.backend, Some(BackendType::Memory));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn up_takes_a_schema_to_push() {
        let cli = Cli::try_parse_from([
            "livebox",
            "up",
            "./app",
            "--app-id",
            "app-1",
            "--push-schema",
            "instant.schema.ts",
        ])
        .unwrap();
        match cli.command {
            Commands::Up(args) => {
                assert_eq!(args.app_id.as_deref(), Some("app-1"));
                assert_eq!(args.push_schema, Some(PathBuf::from("instant.schema.ts")));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn global_flags_work_after_the_subcommand() {
        let cli =
            Cli::try_parse_from(["livebox", "snapshot", "src", "out.tar.gz", "-vv", "--format", "json"])
                .unwrap();
        assert_eq!(cli.global_opts.verbose, 2);
        assert_eq!(cli.global_opts.format, OutputFormat::Json);
    }
}
