use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::types::LiveboxConfig;
use crate::editor::highlight::{parse_inspector_signal, HighlightRequest};
use crate::editor::resolver::{EditResolver, ModifyFileAction, WriteThroughResolver};
use crate::editor::surface::{language_for_path, DecorationId, EditorSurface};
use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::sandbox::SandboxEngine;
use crate::session::SessionContext;
use crate::vfs::{export_tree, normalize_path, FileTree};

/// Keeps open buffers, pending edits and the committed tree consistent.
///
/// The committed tree changes only on `save` (full re-export of the
/// sandbox). A pending entry exists only while its buffer differs from the
/// committed content.
pub struct LiveEditSynchronizer<S: EditorSurface> {
    surface: S,
    bus: EventBus,
    session: SessionContext,
    engine: Arc<dyn SandboxEngine>,
    resolver: Arc<dyn EditResolver>,
    ignore: Vec<String>,
    min_reveal_line: u32,
    committed: watch::Sender<Arc<FileTree>>,
    tabs: Vec<String>,
    focused: Option<String>,
    buffers: HashMap<String, String>,
    pending: IndexMap<String, String>,
    editor_loaded: bool,
    editor_mounted: bool,
    highlight_request: Option<HighlightRequest>,
    active_highlight: Option<DecorationId>,
    /// Caret position we placed ourselves; its echo is not a user move.
    programmatic_caret: Option<(u32, u32)>,
}

impl<S: EditorSurface> LiveEditSynchronizer<S> {
    pub fn new(
        surface: S,
        bus: EventBus,
        session: SessionContext,
        engine: Arc<dyn SandboxEngine>,
        tree: FileTree,
        config: &LiveboxConfig,
    ) -> Self {
        let (committed, _) = watch::channel(Arc::new(tree));
        Self {
            surface,
            bus,
            session,
            engine,
            resolver: Arc::new(WriteThroughResolver),
            ignore: config.sandbox.ignore.clone(),
            min_reveal_line: config.editor.min_reveal_line,
            committed,
            tabs: Vec::new(),
            focused: None,
            buffers: HashMap::new(),
            pending: IndexMap::new(),
            editor_loaded: false,
            editor_mounted: false,
            highlight_request: None,
            active_highlight: None,
            programmatic_caret: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn EditResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn tabs(&self) -> &[String] {
        &self.tabs
    }

    pub fn focused(&self) -> Option<&str> {
        self.focused.as_deref()
    }

    pub fn buffer(&self, path: &str) -> Option<&str> {
        self.buffers.get(path).map(String::as_str)
    }

    pub fn pending(&self) -> &IndexMap<String, String> {
        &self.pending
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn has_active_highlight(&self) -> bool {
        self.active_highlight.is_some()
    }

    /// Snapshot of the committed tree.
    pub fn committed(&self) -> Arc<FileTree> {
        self.committed.borrow().clone()
    }

    /// Readers (preview, file-tree views) follow the committed tree here.
    pub fn subscribe_committed(&self) -> watch::Receiver<Arc<FileTree>> {
        self.committed.subscribe()
    }

    fn committed_content(&self, path: &str) -> String {
        self.committed
            .borrow()
            .get_file(path)
            .map(|c| c.to_display_string())
            .unwrap_or_default()
    }

    fn publish_tabs(&self) {
        self.bus.publish(Event::EditorTabChange {
            focus: self.focused.clone(),
            opened: self.tabs.clone(),
        });
    }

    /// Open a tab (or reuse it) and focus it.
    pub fn open_tab(&mut self, path: &str) -> Result<()> {
        let path = normalize_path(path)?;
        if !self.tabs.contains(&path) {
            let content = match self.pending.get(&path) {
                Some(edit) => edit.clone(),
                None => self.committed_content(&path),
            };
            self.surface.open(&path, &content, language_for_path(&path));
            self.buffers.insert(path.clone(), content);
            self.tabs.push(path.clone());
            debug!(path = %path, "Tab opened");
        }
        self.set_focus(path);
        Ok(())
    }

    /// Close a tab. Focus moves to the last remaining tab; a pending edit
    /// for the path is kept.
    pub fn close_tab(&mut self, path: &str) -> Result<()> {
        let path = normalize_path(path)?;
        let Some(index) = self.tabs.iter().position(|t| *t == path) else {
            return Ok(());
        };
        self.tabs.remove(index);
        self.buffers.remove(&path);
        self.surface.close(&path);

        if self.focused.as_deref() == Some(path.as_str()) {
            self.clear_highlight();
            self.focused = self.tabs.last().cloned();
            if let Some(next) = &self.focused {
                self.surface.focus(next);
            }
        }
        self.publish_tabs();
        Ok(())
    }

    /// Focus an already open tab. Never touches pending edits.
    pub fn focus_change(&mut self, path: &str) -> Result<bool> {
        let path = normalize_path(path)?;
        if !self.tabs.contains(&path) {
            debug!(path = %path, "Focus requested for a tab that is not open");
            return Ok(false);
        }
        self.set_focus(path);
        Ok(true)
    }

    fn set_focus(&mut self, path: String) {
        if self.focused.as_deref() != Some(path.as_str()) {
            self.clear_highlight();
            self.surface.focus(&path);
            self.focused = Some(path);
        }
        self.publish_tabs();
        self.try_apply_highlight();
    }

    /// Record a buffer change. Programmatic flushes (content loaded into
    /// the surface by us) update the buffer without announcing it.
    pub fn edit(&mut self, path: &str, content: &str, is_programmatic_flush: bool) -> Result<()> {
        let path = normalize_path(path)?;
        self.buffers.insert(path.clone(), content.to_string());

        if content == self.committed_content(&path) {
            self.pending.shift_remove(&path);
        } else {
            self.pending.insert(path, content.to_string());
        }

        if !is_programmatic_flush {
            self.bus.publish(Event::AppEdited(self.is_dirty()));
        }
        Ok(())
    }

    /// Push every pending edit through the resolver, then re-derive the
    /// committed tree from the sandbox.
    ///
    /// On failure the edits already applied leave the pending map; the
    /// failing edit and everything after it stay pending and the committed
    /// tree is unchanged.
    pub async fn save(&mut self) -> Result<()> {
        let actions: Vec<ModifyFileAction> = self
            .pending
            .iter()
            .map(|(path, content)| ModifyFileAction {
                path: path.clone(),
                content: content.clone(),
            })
            .collect();

        for action in &actions {
            if let Err(e) = self
                .resolver
                .apply(&self.session, self.engine.as_ref(), action)
                .await
            {
                warn!(path = %action.path, error = %e, "Save stopped at failing edit");
                return Err(e);
            }
            self.pending.shift_remove(&action.path);
        }

        let tree = export_tree(self.engine.as_ref(), &self.ignore).await?;
        self.committed.send_replace(Arc::new(tree));
        self.pending.clear();
        self.bus.publish(Event::AppEdited(false));
        info!(files = actions.len(), "Edits saved");
        Ok(())
    }

    /// Reset every buffer, open or not, to the committed content and drop
    /// all pending edits.
    pub fn discard(&mut self) {
        let paths: Vec<String> = self
            .tabs
            .iter()
            .chain(self.pending.keys())
            .chain(self.buffers.keys())
            .cloned()
            .collect();
        for path in paths {
            let content = self.committed_content(&path);
            if self.tabs.contains(&path) {
                self.surface.set_content(&path, &content);
            }
            self.buffers.insert(path, content);
        }
        let dropped = self.pending.len();
        self.pending.clear();
        self.bus.publish(Event::AppEdited(false));
        info!(dropped = dropped, "Edits discarded");
    }

    /// Handle an inspector `path:line[:column]` signal. Malformed signals
    /// are ignored.
    pub fn inspector_signal(&mut self, info: &str) -> bool {
        let Some(request) = parse_inspector_signal(info) else {
            debug!(info = %info, "Ignoring malformed inspector signal");
            return false;
        };
        self.bus.publish(Event::SourceCodeOpen(request.path.clone()));

        let path = request.path.clone();
        self.highlight_request = Some(request);
        if self.focused.as_deref() != Some(path.as_str()) {
            if self.tabs.contains(&path) {
                self.set_focus(path);
            } else if self.focused.is_none() {
                if let Err(e) = self.open_tab(&path) {
                    warn!(path = %path, error = %e, "Could not open inspected file");
                }
            }
        }
        self.try_apply_highlight();
        true
    }

    pub fn set_editor_loaded(&mut self, loaded: bool) {
        self.editor_loaded = loaded;
        self.try_apply_highlight();
    }

    pub fn set_editor_mounted(&mut self, mounted: bool) {
        self.editor_mounted = mounted;
        self.try_apply_highlight();
    }

    /// Apply the pending highlight once its path is focused and the editor
    /// is both loaded and mounted. Returns whether it was applied.
    fn try_apply_highlight(&mut self) -> bool {
        let ready = match &self.highlight_request {
            Some(request) => {
                self.editor_loaded
                    && self.editor_mounted
                    && self.focused.as_deref() == Some(request.path.as_str())
            }
            None => false,
        };
        if !ready {
            return false;
        }
        let Some(request) = self.highlight_request.take() else {
            return false;
        };

        self.clear_highlight();
        let id = self.surface.decorate_line(&request.path, request.line);
        self.active_highlight = Some(id);
        self.surface
            .reveal_line(request.line.max(self.min_reveal_line));

        if let Some(column) = request.column {
            self.programmatic_caret = Some((request.line, column));
            self.surface.set_caret(request.line, column);
        }
        debug!(path = %request.path, line = request.line, "Highlight applied");
        true
    }

    /// Caret moved in the surface. The echo of our own caret placement is
    /// skipped once; any other move clears the highlight.
    pub fn on_caret_moved(&mut self, line: u32, column: u32) {
        if let Some(expected) = self.programmatic_caret.take() {
            if expected == (line, column) {
                return;
            }
        }
        self.clear_highlight();
    }

    fn clear_highlight(&mut self) {
        self.programmatic_caret = None;
        if let Some(id) = self.active_highlight.take() {
            self.surface.clear_decoration(id);
        }
    }

    /// React to save/discard requests from the bus.
    pub async fn handle_event(&mut self, event: &Event) -> Result<()> {
        match event {
            Event::SaveRequested => self.save().await,
            Event::DiscardRequested => {
                self.discard();
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
