//! End-to-end session flows against the in-process engine.

use std::sync::Arc;
use std::time::Duration;

use livebox::config::types::LiveboxConfig;
use livebox::editor::{HeadlessSurface, LiveEditSynchronizer};
use livebox::events::{Channel, Event, EventBus};
use livebox::sandbox::{
    EngineOp, MemoryEngine, SandboxLifecycle, SandboxState, ScriptedProcess, ServerReady,
};
use livebox::session::SessionContext;
use livebox::tools::{ToolApprovalGate, ToolCallApproval, ToolOutcome};
use livebox::vfs::{export_tree, FileTree};

fn app_tree() -> FileTree {
    let mut tree = FileTree::new();
    tree.insert_file("package.json", r#"{"scripts":{"dev":"vite"}}"#)
        .unwrap();
    tree.insert_file("src/App.tsx", "export const App = () => null;\n")
        .unwrap();
    tree.insert_file("src/main.tsx", "render(<App />)\n").unwrap();
    tree.insert_file("public/favicon.ico", vec![0u8, 159, 146, 150])
        .unwrap();
    tree.insert_dir("src/components").unwrap();
    tree
}

fn engine() -> Arc<MemoryEngine> {
    Arc::new(
        MemoryEngine::new()
            .with_script("npm install", ScriptedProcess::exits(0))
            .with_script("npm run dev", ScriptedProcess::server(5173)),
    )
}

struct Session {
    engine: Arc<MemoryEngine>,
    bus: EventBus,
    lifecycle: SandboxLifecycle,
    editor: LiveEditSynchronizer<HeadlessSurface>,
}

async fn start() -> Session {
    let engine = engine();
    let bus = EventBus::new();
    let config = LiveboxConfig::default();
    let session = SessionContext::anonymous();
    let tree = app_tree();

    let mut lifecycle =
        SandboxLifecycle::new(engine.clone(), bus.clone(), session.clone(), &config).unwrap();
    lifecycle.run(tree.clone()).await.unwrap();

    let mut editor = LiveEditSynchronizer::new(
        HeadlessSurface::new(),
        bus.clone(),
        session,
        engine.clone(),
        tree,
        &config,
    );
    editor.set_editor_loaded(true);
    editor.set_editor_mounted(true);

    Session {
        engine,
        bus,
        lifecycle,
        editor,
    }
}

#[tokio::test]
async fn mounted_tree_exports_back_unchanged() {
    let session = start().await;
    let exported = export_tree(session.engine.as_ref(), &[]).await.unwrap();
    assert_eq!(exported, app_tree());
    assert_eq!(
        session.engine.file("public/favicon.ico"),
        Some(vec![0u8, 159, 146, 150])
    );
}

#[tokio::test]
async fn sandbox_steps_run_in_order_and_start_once() {
    let engine = engine();
    let bus = EventBus::new();
    let mut states = bus.subscribe(&[Channel::SandboxState]);
    let mut lifecycle = SandboxLifecycle::new(
        engine.clone(),
        bus.clone(),
        SessionContext::anonymous(),
        &LiveboxConfig::default(),
    )
    .unwrap();

    let server = lifecycle.run(app_tree()).await.unwrap();
    lifecycle.provide_tree(app_tree()).await.unwrap();

    assert_eq!(server, ServerReady::localhost(5173));
    let spawns: Vec<_> = engine
        .ops()
        .into_iter()
        .filter(|op| matches!(op, EngineOp::Spawn(_)))
        .collect();
    assert_eq!(
        spawns,
        vec![
            EngineOp::Spawn("npm install".to_string()),
            EngineOp::Spawn("npm run dev".to_string()),
        ]
    );
    assert_eq!(
        states.drain().into_iter().last(),
        Some(Event::SandboxState(SandboxState::ServerStarted))
    );
}

#[tokio::test]
async fn runtime_errors_are_reported_then_cleared() {
    let session = start().await;
    let mut errors = session.bus.subscribe(&[Channel::RuntimeError]);

    assert!(session
        .engine
        .push_output("[vite] Internal server error: Failed to resolve import\n    at resolve (index.js:1:1)"));
    let raised = tokio::time::timeout(Duration::from_secs(5), errors.recv())
        .await
        .unwrap();
    assert_eq!(
        raised,
        Some(Event::RuntimeError(Some(
            "[vite] Internal server error: Failed to resolve import".to_string()
        )))
    );

    assert!(session.engine.push_output("page reload src/App.tsx"));
    let cleared = tokio::time::timeout(Duration::from_secs(5), errors.recv())
        .await
        .unwrap();
    assert_eq!(cleared, Some(Event::RuntimeError(None)));
    assert_eq!(session.lifecycle.state(), SandboxState::ServerStarted);
}

#[tokio::test]
async fn saved_edits_reach_the_sandbox_and_the_committed_tree() {
    let mut session = start().await;
    let mut edited = session.bus.subscribe(&[Channel::AppEdited]);

    session.editor.open_tab("src/App.tsx").unwrap();
    session
        .editor
        .edit("src/App.tsx", "export const App = () => <h1/>;\n", false)
        .unwrap();
    session.editor.save().await.unwrap();

    assert_eq!(
        session.engine.file("src/App.tsx"),
        Some(b"export const App = () => <h1/>;\n".to_vec())
    );
    assert_eq!(
        session
            .editor
            .committed()
            .get_file("src/App.tsx")
            .map(|c| c.to_display_string()),
        Some("export const App = () => <h1/>;\n".to_string())
    );
    assert_eq!(
        edited.drain(),
        vec![Event::AppEdited(true), Event::AppEdited(false)]
    );
}

#[tokio::test]
async fn discarded_edits_never_reach_the_sandbox() {
    let mut session = start().await;
    session.editor.open_tab("src/main.tsx").unwrap();
    session.editor.edit("src/main.tsx", "broken(", false).unwrap();

    session
        .editor
        .handle_event(&Event::DiscardRequested)
        .await
        .unwrap();

    assert!(!session.editor.is_dirty());
    assert_eq!(session.editor.buffer("src/main.tsx"), Some("render(<App />)\n"));
    assert_eq!(
        session.engine.file("src/main.tsx"),
        Some(b"render(<App />)\n".to_vec())
    );
}

#[tokio::test]
async fn inspector_highlights_only_the_focused_file() {
    let mut session = start().await;
    session.editor.open_tab("src/main.tsx").unwrap();

    session.editor.inspector_signal("src/App.tsx:12:3");
    assert_eq!(session.editor.focused(), Some("src/main.tsx"));
    assert!(!session.editor.has_active_highlight());

    session.editor.open_tab("src/App.tsx").unwrap();
    session.editor.inspector_signal("src/App.tsx:12:3");
    assert_eq!(
        session.editor.surface().decorated_lines(),
        vec![("src/App.tsx".to_string(), 12)]
    );

    session.editor.focus_change("src/main.tsx").unwrap();
    assert!(session.editor.surface().decorated_lines().is_empty());
}

#[tokio::test]
async fn approvals_from_the_bus_gate_tool_effects() {
    let bus = EventBus::new();
    let gate = ToolApprovalGate::new();
    let listener = gate.listen(&bus);

    assert!(!gate.approve("never-registered"));

    let waiting = {
        let gate = gate.clone();
        tokio::spawn(async move { gate.run("call-1", || async { Ok(42) }).await })
    };
    while !gate.is_pending("call-1") {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    bus.publish(Event::ToolCallApproval(ToolCallApproval::approved("call-1")));

    let outcome = tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome, ToolOutcome::Completed(42));
    assert_eq!(gate.pending_count(), 0);
    listener.abort();
}
