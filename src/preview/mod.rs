//! The rendered preview bound to the dev server URL.
//!
//! The target is created once and kept for the whole session. Switching
//! between preview and edit views only toggles its visibility, so its
//! navigation and scroll state survive the switch.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::events::Event;
use crate::sandbox::ServerReady;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Preview,
    Edit,
}

/// Embedded render target (an iframe, a webview, a headless browser tab).
pub trait PreviewTarget: Send {
    fn load(&mut self, url: &str);
    fn reload(&mut self);
    fn set_visible(&mut self, visible: bool);
}

/// Target without a renderer; records what it was asked to show.
#[derive(Debug, Clone, Default)]
pub struct HeadlessTarget {
    pub url: Option<String>,
    pub loads: Vec<String>,
    pub reloads: usize,
    pub visible: bool,
}

impl PreviewTarget for HeadlessTarget {
    fn load(&mut self, url: &str) {
        self.url = Some(url.to_string());
        self.loads.push(url.to_string());
    }

    fn reload(&mut self) {
        self.reloads += 1;
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }
}

fn join_url(base: &str, relative: &str) -> String {
    let relative = relative.trim();
    if relative.is_empty() || relative == "/" {
        return format!("{}/", base.trim_end_matches('/'));
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

pub struct PreviewController<T: PreviewTarget> {
    target: T,
    base_url: Option<String>,
    path: String,
    view: ViewMode,
}

impl<T: PreviewTarget> PreviewController<T> {
    pub fn new(mut target: T) -> Self {
        target.set_visible(true);
        Self {
            target,
            base_url: None,
            path: "/".to_string(),
            view: ViewMode::Preview,
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn view(&self) -> ViewMode {
        self.view
    }

    /// URL currently shown, once the server is up.
    pub fn current_url(&self) -> Option<String> {
        self.base_url.as_deref().map(|base| join_url(base, &self.path))
    }

    /// Bind to the dev server. A path chosen before the server came up is kept.
    pub fn bind(&mut self, server: &ServerReady) {
        self.base_url = Some(server.url.clone());
        let url = join_url(&server.url, &self.path);
        info!(url = %url, "Preview bound to dev server");
        self.target.load(&url);
    }

    /// Reload the same URL. No-op until bound.
    pub fn refresh(&mut self) -> bool {
        if self.base_url.is_none() {
            return false;
        }
        debug!("Preview refreshed");
        self.target.reload();
        true
    }

    /// Load `relative` under the server URL.
    pub fn navigate(&mut self, relative: &str) -> bool {
        self.path = relative.trim().to_string();
        match self.current_url() {
            Some(url) => {
                debug!(url = %url, "Preview navigated");
                self.target.load(&url);
                true
            }
            None => false,
        }
    }

    pub fn set_view(&mut self, view: ViewMode) {
        self.view = view;
        self.target.set_visible(view == ViewMode::Preview);
    }

    pub fn handle_event(&mut self, event: &Event) {
        match event {
            Event::ServerReady(server) => self.bind(server),
            Event::PreviewPathChange(path) => {
                self.navigate(path);
            }
            Event::RefreshPreview => {
                self.refresh();
            }
            Event::SourceCodeOpen(_) => self.set_view(ViewMode::Edit),
            _ => {}
        }
    }
}
