//! Full re-derivation of a tree from the sandbox filesystem.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::sandbox::SandboxEngine;
use crate::vfs::{is_text_path, join_path, FileContent, FileTree};

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

impl DirEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
        }
    }
}

/// Walk the whole sandbox filesystem and rebuild the tree.
///
/// Directories named in `ignore` are skipped. An unreadable file becomes an
/// empty leaf and an unreadable nested directory is left empty; only a
/// failure to list the root is returned as an error.
pub async fn export_tree(engine: &dyn SandboxEngine, ignore: &[String]) -> Result<FileTree> {
    let mut tree = FileTree::new();
    let mut stack = vec![String::new()];

    while let Some(dir) = stack.pop() {
        let entries = match engine.read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if dir.is_empty() => return Err(e),
            Err(e) => {
                warn!(path = %dir, error = %e, "Failed to read directory during export");
                continue;
            }
        };

        for entry in entries {
            let path = join_path(&dir, &entry.name);
            if entry.is_dir {
                if ignore.iter().any(|i| i == &entry.name) {
                    continue;
                }
                tree.insert_dir(&path)?;
                stack.push(path);
                continue;
            }

            let content = match engine.read_file(&path).await {
                Ok(bytes) => FileContent::from_bytes(&entry.name, bytes),
                Err(e) => {
                    warn!(path = %path, error = %e, "Failed to read file during export");
                    if is_text_path(&entry.name) {
                        FileContent::Text(String::new())
                    } else {
                        FileContent::Binary(Vec::new())
                    }
                }
            };
            tree.insert_file(&path, content)?;
        }
    }

    debug!(files = tree.len(), "Exported tree from sandbox");
    Ok(tree)
}
