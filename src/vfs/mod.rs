//! Abstract file tree, the single source of truth between save/discard cycles.

mod archive;
mod export;
mod mount;

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::error::{LiveboxError, Result};

pub use archive::{read_archive, write_archive};
pub use export::{export_tree, DirEntry};
pub use mount::{
    mount_tree, plan_mount, validate_tree, BinaryOverlay, MountNode, MountPlan, MountReport,
    MountTree,
};

/// Leaf content. Binary leaves must survive byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Text(String),
    Binary(Vec<u8>),
}

impl FileContent {
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Content as shown in a text buffer.
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    /// Classify raw bytes read back from a sandbox.
    pub fn from_bytes(name: &str, bytes: Vec<u8>) -> Self {
        if !is_text_path(name) {
            return Self::Binary(bytes);
        }
        match String::from_utf8(bytes) {
            Ok(text) => Self::Text(text),
            Err(e) => Self::Binary(e.into_bytes()),
        }
    }
}

impl From<&str> for FileContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for FileContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileNode {
    File(FileContent),
    Directory(FileTree),
}

/// A directory level. Names are unique per directory by construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTree {
    entries: BTreeMap<String, FileNode>,
}

impl FileTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &FileNode)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of file leaves at any depth.
    pub fn len(&self) -> usize {
        self.files().len()
    }

    pub fn get(&self, path: &str) -> Option<&FileNode> {
        let segments = split_path(path).ok()?;
        let (last, parents) = segments.split_last()?;

        let mut level = self;
        for segment in parents {
            match level.entries.get(*segment)? {
                FileNode::Directory(dir) => level = dir,
                FileNode::File(_) => return None,
            }
        }
        level.entries.get(*last)
    }

    pub fn get_file(&self, path: &str) -> Option<&FileContent> {
        match self.get(path)? {
            FileNode::File(content) => Some(content),
            FileNode::Directory(_) => None,
        }
    }

    /// Insert a file, creating intermediate directories. Last write wins.
    pub fn insert_file(&mut self, path: &str, content: impl Into<FileContent>) -> Result<()> {
        let segments = split_path(path)?;
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| LiveboxError::InvalidPath {
                path: path.to_string(),
            })?;

        let level = self.directory_mut(path, parents)?;
        if let Some(FileNode::Directory(_)) = level.entries.get(*last) {
            return Err(LiveboxError::InvalidPath {
                path: path.to_string(),
            });
        }
        level
            .entries
            .insert(last.to_string(), FileNode::File(content.into()));
        Ok(())
    }

    /// Ensure a (possibly empty) directory exists.
    pub fn insert_dir(&mut self, path: &str) -> Result<()> {
        let segments = split_path(path)?;
        self.directory_mut(path, &segments).map(|_| ())
    }

    fn directory_mut(&mut self, path: &str, segments: &[&str]) -> Result<&mut FileTree> {
        let mut level = self;
        for segment in segments {
            let node = level
                .entries
                .entry(segment.to_string())
                .or_insert_with(|| FileNode::Directory(FileTree::new()));
            level = match node {
                FileNode::Directory(dir) => dir,
                FileNode::File(_) => {
                    return Err(LiveboxError::InvalidPath {
                        path: path.to_string(),
                    })
                }
            };
        }
        Ok(level)
    }

    /// Every file leaf with its full path, sorted depth-first.
    pub fn files(&self) -> Vec<(String, &FileContent)> {
        let mut out = Vec::new();
        self.collect_files("", &mut out);
        out
    }

    fn collect_files<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a FileContent)>) {
        for (name, node) in &self.entries {
            let path = join_path(prefix, name);
            match node {
                FileNode::File(content) => out.push((path, content)),
                FileNode::Directory(dir) => dir.collect_files(&path, out),
            }
        }
    }

    /// Load a tree from a host directory, skipping ignored directory names.
    pub fn load_dir(root: &Path, ignore: &[String]) -> Result<Self> {
        let mut tree = FileTree::new();
        load_level(root, "", ignore, &mut tree)?;
        debug!(root = %root.display(), files = tree.len(), "Loaded tree from directory");
        Ok(tree)
    }
}

fn load_level(dir: &Path, prefix: &str, ignore: &[String], tree: &mut FileTree) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = join_path(prefix, &name);
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            if ignore.iter().any(|i| i == &name) {
                continue;
            }
            tree.insert_dir(&path)?;
            load_level(&entry.path(), &path, ignore, tree)?;
        } else if file_type.is_file() {
            let bytes = std::fs::read(entry.path())?;
            tree.insert_file(&path, FileContent::from_bytes(&name, bytes))?;
        }
    }
    Ok(())
}

/// Split a sandbox path into segments, tolerating `./` and leading `/`.
pub fn split_path(path: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = path
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    if segments.iter().any(|s| *s == "..") {
        return Err(LiveboxError::InvalidPath {
            path: path.to_string(),
        });
    }
    Ok(segments)
}

/// Normalized relative form of a sandbox path (`./src/App.tsx` -> `src/App.tsx`).
pub fn normalize_path(path: &str) -> Result<String> {
    Ok(split_path(path)?.join("/"))
}

pub(crate) fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

const TEXT_EXTENSIONS: &[&str] = &[
    // Code
    "js", "mjs", "cjs", "njs", "jst", "ts", "mts", "cts", "jsx", "tsx", "vue", "svelte", "py",
    "rb", "java", "c", "h", "cpp", "hpp", "cs", "go", "rs", "php", "kt", "scala", "clj", "hs",
    "ml", "fs", "r", "swift", "sol", "flow", "bnf", "def", "graphql", "gql",
    // Shell
    "sh", "bash", "zsh", "fish", "ps1", "bat", "cmd",
    // Markup and styles
    "html", "htm", "css", "scss", "sass", "less", "svg", "xml",
    // Config and data
    "json", "jsonc", "yaml", "yml", "toml", "ini", "cfg", "conf", "lock", "csv", "tsv", "sql",
    "log", "map",
    // Docs
    "md", "mdx", "txt", "rst", "rtf", "license", "readme", "changelog",
    // Dotfiles (the whole name after the leading dot)
    "dockerfile", "gitignore", "gitattributes", "gitkeep", "npmignore", "npmrc", "eslintrc",
    "eslintignore", "prettierrc", "prettierignore", "babelrc", "editorconfig", "nvmrc",
];

/// Whether a file name denotes text content, judged by its extension.
pub fn is_text_path(name: &str) -> bool {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    let lower = file_name.to_lowercase();

    if lower.contains("license") || lower.contains("readme") || lower.starts_with(".env") {
        return true;
    }

    match lower.rsplit_once('.') {
        Some((_, ext)) => TEXT_EXTENSIONS.contains(&ext),
        None => false,
    }
}
