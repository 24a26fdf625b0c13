use serde::{Deserialize, Serialize};

use crate::vfs::normalize_path;

/// A source location to mark in the editor. Consumed once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightRequest {
    pub path: String,
    pub line: u32,
    pub column: Option<u32>,
}

/// Parse an inspector signal of the form `path:line[:column]`.
///
/// Path and line are mandatory; anything unparseable yields `None` and is
/// ignored by the caller.
pub fn parse_inspector_signal(info: &str) -> Option<HighlightRequest> {
    let mut parts = info.trim().split(':');
    let path = normalize_path(parts.next()?).ok()?;
    if path.is_empty() {
        return None;
    }

    let line = parts.next()?.trim().parse::<u32>().ok().filter(|l| *l > 0)?;
    let column = parts
        .next()
        .and_then(|c| c.trim().parse::<u32>().ok())
        .filter(|c| *c > 0);

    Some(HighlightRequest { path, line, column })
}
