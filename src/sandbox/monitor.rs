//! Heuristic runtime-error detection over streamed process output.
//!
//! Last chunk wins: a chunk that matches sets the current error, a chunk
//! that doesn't clears it. No aggregation across chunks and no dedup.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use tracing::{debug, info};

use crate::config::types::MonitorConfig;
use crate::error::{LiveboxError, Result};
use crate::events::{Event, EventBus};

fn ansi_regex() -> Option<&'static Regex> {
    static ANSI: OnceLock<Option<Regex>> = OnceLock::new();
    ANSI.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]").ok()
    })
    .as_ref()
}

/// Remove terminal escape sequences (colours, cursor movement, titles).
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    match ansi_regex() {
        Some(re) => re.replace_all(text, ""),
        None => Cow::Borrowed(text),
    }
}

pub struct OutputMonitor {
    patterns: Vec<Regex>,
    stack_marker: Regex,
    current: Option<String>,
    bus: Option<EventBus>,
}

impl OutputMonitor {
    pub fn new(config: &MonitorConfig) -> Result<Self> {
        let patterns = config
            .patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| LiveboxError::Config(format!("invalid monitor pattern {:?}: {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        let stack_marker = Regex::new(&config.stack_marker).map_err(|e| {
            LiveboxError::Config(format!(
                "invalid stack marker {:?}: {}",
                config.stack_marker, e
            ))
        })?;

        Ok(Self {
            patterns,
            stack_marker,
            current: None,
            bus: None,
        })
    }

    /// Publish every change of the current error on the `RuntimeError` channel.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Scan one chunk and return the current error afterwards.
    pub fn ingest(&mut self, chunk: &str) -> Option<&str> {
        let cleaned = strip_ansi(chunk);

        if self.patterns.iter().any(|p| p.is_match(&cleaned)) {
            let message = match self.stack_marker.find(&cleaned) {
                Some(m) => &cleaned[..m.start()],
                None => &cleaned[..],
            }
            .trim()
            .to_string();

            info!(error = %message, "Runtime error detected in server output");
            self.publish(Some(message.clone()));
            self.current = Some(message);
        } else if self.current.take().is_some() {
            debug!("Runtime error cleared");
            self.publish(None);
        }

        self.current.as_deref()
    }

    pub fn current_error(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn clear(&mut self) {
        if self.current.take().is_some() {
            self.publish(None);
        }
    }

    fn publish(&self, error: Option<String>) {
        if let Some(bus) = &self.bus {
            bus.publish(Event::RuntimeError(error));
        }
    }
}
