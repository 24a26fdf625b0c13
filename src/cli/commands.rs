use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

use crate::cli::args::{ConfigAction, ConfigArgs, InitArgs, OutputFormat, SnapshotArgs, UpArgs};
use crate::config::loader::get_config_path;
use crate::config::types::LiveboxConfig;
use crate::editor::{HeadlessSurface, LiveEditSynchronizer};
use crate::error::{LiveboxError, Result};
use crate::events::{Event, EventBus};
use crate::preview::{HeadlessTarget, PreviewController};
use crate::sandbox::{available_backends, create_engine, SandboxLifecycle, ServerReady};
use crate::session::SessionContext;
use crate::tools::{
    HttpSchemaStore, SchemaPushTool, ToolApprovalGate, ToolCallApproval, ToolOutcome,
};
use crate::vfs::{read_archive, write_archive, FileTree};

// ============================================================================
// Session Commands
// ============================================================================

/// Run one live session until Ctrl-C.
pub async fn up(args: UpArgs, mut config: LiveboxConfig, format: OutputFormat) -> Result<()> {
    if let Some(backend) = args.backend {
        config.sandbox.backend = backend;
    }

    let tree = load_source(&args.source, &config.sandbox.ignore)?;
    info!(source = %args.source.display(), files = tree.len(), "Source tree loaded");

    let schema = match &args.push_schema {
        Some(path) => Some(std::fs::read_to_string(path)?),
        None => None,
    };

    let session = SessionContext::new(args.app_id, args.token);
    let bus = EventBus::new();
    let engine = create_engine(&config.sandbox, &session)?;

    let gate = ToolApprovalGate::from_config(&config.approval);
    let approvals = gate.listen(&bus);
    let mut preview = PreviewController::new(HeadlessTarget::default());
    let mut editor = LiveEditSynchronizer::new(
        HeadlessSurface::new(),
        bus.clone(),
        session.clone(),
        engine.clone(),
        tree.clone(),
        &config,
    );
    let mut events = bus.subscribe_all();

    let mut lifecycle =
        SandboxLifecycle::new(engine.clone(), bus.clone(), session.clone(), &config)?;
    let server = match lifecycle.run(tree).await {
        Ok(server) => server,
        Err(e) => {
            approvals.abort();
            if let Err(shutdown_err) = lifecycle.shutdown().await {
                warn!(error = %shutdown_err, "Failed to shut down sandbox after error");
            }
            return Err(e);
        }
    };
    output_server(&server, lifecycle.session(), format);

    let schema_push = schema.map(|schema| {
        let store = Arc::new(HttpSchemaStore::new(&config.remote.schema_endpoint));
        let tool = SchemaPushTool::new(gate.clone(), engine, store, &config.remote.schema_file);
        let (gate, bus) = (gate.clone(), bus.clone());
        tokio::spawn(async move {
            let answers = tokio::io::BufReader::new(tokio::io::stdin());
            match push_schema(&tool, &gate, &bus, &session, &schema, answers).await {
                Ok(ToolOutcome::Completed(())) => info!("Schema pushed"),
                Ok(ToolOutcome::Rejected) => info!("Schema push rejected"),
                Err(e) => warn!(error = %e, "Schema push failed"),
            }
        })
    });

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted, shutting down");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                preview.handle_event(&event);
                if let Err(e) = editor.handle_event(&event).await {
                    warn!(error = %e, "Editor failed to handle event");
                }
                output_event(&event, format);
            }
        }
    }

    if let Some(task) = schema_push {
        task.abort();
    }
    approvals.abort();
    lifecycle.shutdown().await?;
    if editor.is_dirty() {
        warn!(pending = editor.pending().len(), "Session ended with unsaved edits");
    }
    Ok(())
}

/// Pack a directory into a gzip-compressed tarball.
pub async fn snapshot(args: SnapshotArgs, config: LiveboxConfig, format: OutputFormat) -> Result<()> {
    let tree = FileTree::load_dir(&args.source, &config.sandbox.ignore)?;
    let file = File::create(&args.output)?;
    let mut writer = write_archive(&tree, BufWriter::new(file))?;
    writer.flush()?;

    match format {
        OutputFormat::Text => {
            println!("Wrote {} files to {}", tree.len(), args.output.display());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "files": tree.len(),
                    "output": args.output.display().to_string(),
                })
            );
        }
    }
    Ok(())
}

pub async fn backends(format: OutputFormat) -> Result<()> {
    let backends = available_backends();
    match format {
        OutputFormat::Text => {
            println!("{:<10} {:<10} DESCRIPTION", "BACKEND", "STATUS");
            for backend in &backends {
                let status = if backend.available { "ready" } else { "missing" };
                println!("{:<10} {:<10} {}", backend.name, status, backend.description);
                if let Some(reason) = backend.unavailable_reason {
                    println!("{:<21} ({})", "", reason);
                }
            }
        }
        OutputFormat::Json => {
            let list: Vec<_> = backends
                .iter()
                .map(|b| {
                    serde_json::json!({
                        "name": b.name,
                        "available": b.available,
                        "description": b.description,
                        "unavailable_reason": b.unavailable_reason,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&list)?);
        }
    }
    Ok(())
}

// ============================================================================
// Configuration Commands
// ============================================================================

pub async fn init(args: InitArgs) -> Result<()> {
    let config_path = get_config_path();

    if config_path.exists() && !args.force {
        println!("Configuration already exists at: {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    // Create parent directories if needed
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let default_config = LiveboxConfig::default();
    let toml_str = toml::to_string_pretty(&default_config)
        .map_err(|e| LiveboxError::Config(e.to_string()))?;

    std::fs::write(&config_path, toml_str)?;

    println!("Created configuration at: {}", config_path.display());
    println!("\nQuick start:");
    println!("  # Run an app directory in a sandbox");
    println!("  livebox up ./my-app");
    println!();
    println!("  # Dry run without a toolchain");
    println!("  livebox up ./my-app --backend memory");
    println!();
    println!("  # Snapshot an app for later");
    println!("  livebox snapshot ./my-app my-app.tar.gz");

    Ok(())
}

pub async fn config(args: ConfigArgs, config: LiveboxConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&config)
                .map_err(|e| LiveboxError::Config(e.to_string()))?;
            println!("{}", toml_str);
        }
        ConfigAction::Path => {
            println!("{}", get_config_path().display());
        }
    }
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Load a tree from a directory or a `.tar.gz` snapshot.
fn load_source(source: &Path, ignore: &[String]) -> Result<FileTree> {
    if source.is_dir() {
        FileTree::load_dir(source, ignore)
    } else if source.is_file() {
        read_archive(BufReader::new(File::open(source)?), ignore)
    } else {
        Err(LiveboxError::Config(format!(
            "source {} is neither a directory nor an archive",
            source.display()
        )))
    }
}

const SCHEMA_PUSH_CALL: &str = "schema-push";

/// Run a gated schema push. The decision is read from `answers` and
/// published on the bus like any other approval.
async fn push_schema<R>(
    tool: &SchemaPushTool,
    gate: &ToolApprovalGate,
    bus: &EventBus,
    session: &SessionContext,
    schema: &str,
    answers: R,
) -> Result<ToolOutcome<()>>
where
    R: AsyncBufRead + Unpin,
{
    let invoke = tool.invoke(session, SCHEMA_PUSH_CALL, schema);
    tokio::pin!(invoke);

    let ask = async {
        while !gate.is_pending(SCHEMA_PUSH_CALL) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        eprint!("Push schema to the remote store? [y/N] ");
        let approval = if read_confirmation(answers).await {
            ToolCallApproval::approved(SCHEMA_PUSH_CALL)
        } else {
            ToolCallApproval::rejected(SCHEMA_PUSH_CALL)
        };
        bus.publish(Event::ToolCallApproval(approval));
    };

    tokio::select! {
        outcome = &mut invoke => return outcome,
        () = ask => {}
    }
    invoke.await
}

/// `y` or `yes` approves; anything else, including EOF, rejects.
async fn read_confirmation<R: AsyncBufRead + Unpin>(mut answers: R) -> bool {
    let mut line = String::new();
    match answers.read_line(&mut line).await {
        Ok(_) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
        Err(e) => {
            warn!(error = %e, "Could not read approval answer");
            false
        }
    }
}

fn output_server(server: &ServerReady, session: &SessionContext, format: OutputFormat) {
    match format {
        OutputFormat::Text => {
            println!("Session {} ready", session.display_id());
            println!("  Preview: {}", server.url);
            println!("\nPress Ctrl-C to stop.");
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "session": session.id,
                    "app_id": session.app_id,
                    "url": server.url,
                    "port": server.port,
                })
            );
        }
    }
}

fn output_event(event: &Event, format: OutputFormat) {
    let Event::RuntimeError(error) = event else {
        return;
    };
    match format {
        OutputFormat::Text => match error {
            Some(message) => eprintln!("runtime error: {}", message),
            None => eprintln!("runtime error cleared"),
        },
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "event": "runtime_error",
                    "message": error,
                })
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::sandbox::MemoryEngine;
    use crate::tools::RemoteSchemaStore;

    #[derive(Default)]
    struct RecordingStore {
        pushed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RemoteSchemaStore for RecordingStore {
        async fn push_schema(&self, _ctx: &SessionContext, schema: &str) -> Result<()> {
            self.pushed.lock().unwrap().push(schema.to_string());
            Ok(())
        }
    }

    async fn push_with_answer(
        answer: &'static [u8],
    ) -> (ToolOutcome<()>, Arc<MemoryEngine>, Arc<RecordingStore>) {
        let bus = EventBus::new();
        let gate = ToolApprovalGate::new();
        let listener = gate.listen(&bus);
        let engine = Arc::new(MemoryEngine::new());
        let store = Arc::new(RecordingStore::default());
        let tool = SchemaPushTool::new(
            gate.clone(),
            engine.clone(),
            store.clone(),
            "instant.schema.ts",
        );
        let session = SessionContext::new(Some("app-1".to_string()), None);

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            push_schema(&tool, &gate, &bus, &session, "export default {}", answer),
        )
        .await
        .unwrap()
        .unwrap();
        listener.abort();
        (outcome, engine, store)
    }

    #[tokio::test]
    async fn confirmed_schema_push_reaches_sandbox_and_store() {
        let (outcome, engine, store) = push_with_answer(b"Y\n").await;
        assert_eq!(outcome, ToolOutcome::Completed(()));
        assert_eq!(engine.file("instant.schema.ts"), Some(b"export default {}".to_vec()));
        assert_eq!(*store.pushed.lock().unwrap(), vec!["export default {}"]);
    }

    #[tokio::test]
    async fn declined_or_missing_answer_rejects_the_push() {
        for answer in [&b"n\n"[..], &b""[..]] {
            let (outcome, engine, store) = push_with_answer(answer).await;
            assert!(outcome.is_rejected());
            assert!(engine.file("instant.schema.ts").is_none());
            assert!(store.pushed.lock().unwrap().is_empty());
        }
    }

    #[test]
    fn load_source_reads_directories_and_archives() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app");
        std::fs::create_dir_all(app.join("src")).unwrap();
        std::fs::write(app.join("src/main.ts"), "start()").unwrap();

        let from_dir = load_source(&app, &[]).unwrap();
        assert_eq!(from_dir.len(), 1);

        let archive = dir.path().join("app.tar.gz");
        write_archive(&from_dir, File::create(&archive).unwrap()).unwrap();
        assert_eq!(load_source(&archive, &[]).unwrap(), from_dir);
    }

    #[test]
    fn missing_source_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_source(&dir.path().join("nope"), &[]),
            Err(LiveboxError::Config(_))
        ));
    }
}
