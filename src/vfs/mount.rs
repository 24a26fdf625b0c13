//! Two-phase mount: one structural call for the whole tree, then one
//! verbatim write per binary leaf.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::error::{LiveboxError, Result};
use crate::sandbox::SandboxEngine;
use crate::vfs::{join_path, FileContent, FileNode, FileTree};

/// Structural description handed to the engine's bulk mount. Text only,
/// so binary leaves appear as empty placeholders until overlaid.
pub type MountTree = BTreeMap<String, MountNode>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountNode {
    File { contents: String },
    Directory(MountTree),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryOverlay {
    pub path: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountPlan {
    pub structure: MountTree,
    pub overlays: Vec<BinaryOverlay>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountReport {
    pub text_files: usize,
    pub binary_files: usize,
}

pub fn plan_mount(tree: &FileTree) -> MountPlan {
    let mut overlays = Vec::new();
    let structure = plan_level(tree, "", &mut overlays);
    MountPlan {
        structure,
        overlays,
    }
}

fn plan_level(tree: &FileTree, prefix: &str, overlays: &mut Vec<BinaryOverlay>) -> MountTree {
    let mut level = MountTree::new();
    for (name, node) in tree.entries() {
        let path = join_path(prefix, name);
        let mounted = match node {
            FileNode::File(FileContent::Text(text)) => MountNode::File {
                contents: text.clone(),
            },
            FileNode::File(FileContent::Binary(bytes)) => {
                overlays.push(BinaryOverlay {
                    path,
                    bytes: bytes.clone(),
                });
                MountNode::File {
                    contents: String::new(),
                }
            }
            FileNode::Directory(dir) => MountNode::Directory(plan_level(dir, &path, overlays)),
        };
        level.insert(name.clone(), mounted);
    }
    level
}

/// Check that every entry name is a single portable path segment.
///
/// Names built through `insert_file` never contain `/`, but trees loaded
/// from archives or foreign hosts may carry backslashes or NUL bytes that
/// an engine would interpret differently.
pub fn validate_tree(tree: &FileTree) -> Result<()> {
    let mut stack = vec![(String::new(), tree)];
    while let Some((prefix, level)) = stack.pop() {
        for (name, node) in level.entries() {
            let path = join_path(&prefix, name);
            let bad = name.is_empty()
                || name == "."
                || name == ".."
                || name.contains(['/', '\\', '\0']);
            if bad {
                return Err(LiveboxError::InvalidPath { path });
            }
            if let FileNode::Directory(dir) = node {
                stack.push((path, dir));
            }
        }
    }
    Ok(())
}

/// Mount a tree into the engine. Overlays start only after the structural
/// mount has completed.
pub async fn mount_tree(engine: &dyn SandboxEngine, tree: &FileTree) -> Result<MountReport> {
    validate_tree(tree).map_err(|e| LiveboxError::Mount(format!("invalid tree: {}", e)))?;
    let plan = plan_mount(tree);
    let report = MountReport {
        text_files: tree.len() - plan.overlays.len(),
        binary_files: plan.overlays.len(),
    };

    engine
        .mount(&plan.structure)
        .await
        .map_err(|e| LiveboxError::Mount(format!("structural mount failed: {}", e)))?;
    debug!(files = report.text_files, "Structural mount complete");

    for overlay in &plan.overlays {
        engine
            .write_file(&overlay.path, &overlay.bytes)
            .await
            .map_err(|e| {
                LiveboxError::Mount(format!("binary overlay {} failed: {}", overlay.path, e))
            })?;
    }

    info!(
        text_files = report.text_files,
        binary_files = report.binary_files,
        "Tree mounted"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::MemoryEngine;
    use crate::vfs::export_tree;

    #[test]
    fn binary_leaves_become_placeholders_plus_overlays() {
        let mut tree = FileTree::new();
        tree.insert_file("index.html", "<html/>").unwrap();
        tree.insert_file("img/logo.png", vec![0u8, 159, 146, 150])
            .unwrap();

        let plan = plan_mount(&tree);

        assert_eq!(
            plan.structure.get("index.html"),
            Some(&MountNode::File {
                contents: "<html/>".to_string()
            })
        );
        let Some(MountNode::Directory(img)) = plan.structure.get("img") else {
            panic!("img should be a directory");
        };
        assert_eq!(
            img.get("logo.png"),
            Some(&MountNode::File {
                contents: String::new()
            })
        );
        assert_eq!(
            plan.overlays,
            vec![BinaryOverlay {
                path: "img/logo.png".to_string(),
                bytes: vec![0, 159, 146, 150],
            }]
        );
    }

    #[test]
    fn empty_directories_survive_planning() {
        let mut tree = FileTree::new();
        tree.insert_dir("public/assets").unwrap();

        let plan = plan_mount(&tree);
        let Some(MountNode::Directory(public)) = plan.structure.get("public") else {
            panic!("public should be a directory");
        };
        assert_eq!(
            public.get("assets"),
            Some(&MountNode::Directory(MountTree::new()))
        );
        assert!(plan.overlays.is_empty());
    }

    #[test]
    fn backslashes_and_nul_bytes_fail_validation() {
        let mut tree = FileTree::new();
        tree.insert_file("src/App.tsx", "x").unwrap();
        assert!(validate_tree(&tree).is_ok());

        tree.insert_file("src/win\\path.ts", "x").unwrap();
        assert!(matches!(
            validate_tree(&tree),
            Err(LiveboxError::InvalidPath { path }) if path == "src/win\\path.ts"
        ));

        let mut tree = FileTree::new();
        tree.insert_file("bad\0name.js", "x").unwrap();
        assert!(validate_tree(&tree).is_err());
    }

    #[tokio::test]
    async fn invalid_tree_is_never_mounted() {
        let mut tree = FileTree::new();
        tree.insert_file("lib\\util.ts", "x").unwrap();
        let engine = MemoryEngine::new();

        let err = mount_tree(&engine, &tree).await.unwrap_err();
        assert!(matches!(err, LiveboxError::Mount(_)));
        assert!(engine.ops().is_empty());
    }

    #[tokio::test]
    async fn config_dotfiles_and_source_maps_round_trip_as_text() {
        let mut tree = FileTree::new();
        tree.insert_file(".prettierrc", "{ \"semi\": false }").unwrap();
        tree.insert_file(".nvmrc", "20\n").unwrap();
        tree.insert_file(".editorconfig", "root = true\n").unwrap();
        tree.insert_file(".gitkeep", "").unwrap();
        tree.insert_file("dist/index.js.map", "{\"version\":3}").unwrap();
        tree.insert_file("scripts/dev.ps1", "npm run dev").unwrap();
        tree.insert_file("logs/build.log", "ok").unwrap();
        tree.insert_file("public/icon.png", vec![137u8, 80, 78, 71])
            .unwrap();

        let engine = MemoryEngine::new();
        mount_tree(&engine, &tree).await.unwrap();
        let exported = export_tree(&engine, &[]).await.unwrap();

        assert_eq!(exported, tree);
    }
}
