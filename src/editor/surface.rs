use std::collections::{BTreeMap, HashMap};

pub type DecorationId = u64;

/// Editor language id for a path, picked by its last extension.
/// Unknown extensions fall back to `text`.
pub fn language_for_path(path: &str) -> &'static str {
    let name = path.rsplit('/').next().unwrap_or(path);
    let Some((_, ext)) = name.rsplit_once('.') else {
        return "text";
    };
    match ext.to_ascii_lowercase().as_str() {
        "md" => "markdown",
        "html" => "html",
        "xml" => "xml",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "ini" | "cfg" | "conf" => "ini",
        "csv" => "csv",
        "sql" => "sql",
        "log" => "log",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "css" => "css",
        "scss" => "scss",
        "sass" => "sass",
        "vue" => "vue",
        "svelte" => "svelte",
        "py" => "python",
        "rb" => "ruby",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "hpp" => "cpp",
        "go" => "go",
        "rs" => "rust",
        "swift" => "swift",
        "kt" => "kotlin",
        "scala" => "scala",
        "clj" => "clojure",
        "php" => "php",
        _ => "text",
    }
}

/// The code-editing surface the synchronizer drives.
pub trait EditorSurface: Send {
    /// Open a buffer with the language id used for syntax highlighting.
    fn open(&mut self, path: &str, content: &str, language: &str);
    fn set_content(&mut self, path: &str, content: &str);
    fn focus(&mut self, path: &str);
    fn close(&mut self, path: &str);
    /// Mark a whole line. The returned id clears it again.
    fn decorate_line(&mut self, path: &str, line: u32) -> DecorationId;
    fn clear_decoration(&mut self, id: DecorationId);
    fn reveal_line(&mut self, line: u32);
    fn set_caret(&mut self, line: u32, column: u32);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    Open(String),
    SetContent(String),
    Focus(String),
    Close(String),
    Decorate { path: String, line: u32 },
    ClearDecoration(DecorationId),
    Reveal(u32),
    Caret { line: u32, column: u32 },
}

/// Surface without a UI. Keeps buffer contents and records every call.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    buffers: BTreeMap<String, String>,
    languages: HashMap<String, String>,
    decorations: HashMap<DecorationId, (String, u32)>,
    next_decoration: DecorationId,
    focused: Option<String>,
    calls: Vec<SurfaceCall>,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self, path: &str) -> Option<&str> {
        self.buffers.get(path).map(String::as_str)
    }

    pub fn focused(&self) -> Option<&str> {
        self.focused.as_deref()
    }

    pub fn language(&self, path: &str) -> Option<&str> {
        self.languages.get(path).map(String::as_str)
    }

    /// Lines currently decorated, as `(path, line)`.
    pub fn decorated_lines(&self) -> Vec<(String, u32)> {
        let mut lines: Vec<_> = self.decorations.values().cloned().collect();
        lines.sort();
        lines
    }

    pub fn calls(&self) -> &[SurfaceCall] {
        &self.calls
    }
}

impl EditorSurface for HeadlessSurface {
    fn open(&mut self, path: &str, content: &str, language: &str) {
        self.buffers.insert(path.to_string(), content.to_string());
        self.languages.insert(path.to_string(), language.to_string());
        self.calls.push(SurfaceCall::Open(path.to_string()));
    }

    fn set_content(&mut self, path: &str, content: &str) {
        self.buffers.insert(path.to_string(), content.to_string());
        self.calls.push(SurfaceCall::SetContent(path.to_string()));
    }

    fn focus(&mut self, path: &str) {
        self.focused = Some(path.to_string());
        self.calls.push(SurfaceCall::Focus(path.to_string()));
    }

    fn close(&mut self, path: &str) {
        self.buffers.remove(path);
        self.languages.remove(path);
        self.decorations.retain(|_, (p, _)| p != path);
        if self.focused.as_deref() == Some(path) {
            self.focused = None;
        }
        self.calls.push(SurfaceCall::Close(path.to_string()));
    }

    fn decorate_line(&mut self, path: &str, line: u32) -> DecorationId {
        self.next_decoration += 1;
        let id = self.next_decoration;
        self.decorations.insert(id, (path.to_string(), line));
        self.calls.push(SurfaceCall::Decorate {
            path: path.to_string(),
            line,
        });
        id
    }

    fn clear_decoration(&mut self, id: DecorationId) {
        self.decorations.remove(&id);
        self.calls.push(SurfaceCall::ClearDecoration(id));
    }

    fn reveal_line(&mut self, line: u32) {
        self.calls.push(SurfaceCall::Reveal(line));
    }

    fn set_caret(&mut self, line: u32, column: u32) {
        self.calls.push(SurfaceCall::Caret { line, column });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn languages_follow_the_last_extension() {
        assert_eq!(language_for_path("src/App.tsx"), "typescript");
        assert_eq!(language_for_path("src/main.JSX"), "javascript");
        assert_eq!(language_for_path("include/util.h"), "c");
        assert_eq!(language_for_path("include/util.hpp"), "cpp");
        assert_eq!(language_for_path("config/app.conf"), "ini");
        assert_eq!(language_for_path("docker-compose.yml"), "yaml");
        assert_eq!(language_for_path("src/lib.rs"), "rust");
        assert_eq!(language_for_path("bundle.min.js"), "javascript");
    }

    #[test]
    fn unknown_or_missing_extensions_are_text() {
        assert_eq!(language_for_path("notes.txt"), "text");
        assert_eq!(language_for_path("Makefile"), "text");
        assert_eq!(language_for_path("scripts/run.ps1"), "text");
        assert_eq!(language_for_path("v1.2/LICENSE"), "text");
    }

    #[test]
    fn closing_a_buffer_forgets_its_language() {
        let mut surface = HeadlessSurface::new();
        surface.open("a.py", "pass", "python");
        assert_eq!(surface.language("a.py"), Some("python"));
        surface.close("a.py");
        assert_eq!(surface.language("a.py"), None);
    }
}
