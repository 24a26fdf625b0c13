use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::{LiveboxError, Result};
use crate::vfs::{split_path, DirEntry, MountNode, MountTree};

/// Sandbox filesystem rooted at a host directory.
#[derive(Debug, Clone)]
pub struct HostFs {
    root: PathBuf,
}

impl HostFs {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a sandbox path under the root; `..` never escapes it.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut resolved = self.root.clone();
        for segment in split_path(path)? {
            resolved.push(segment);
        }
        Ok(resolved)
    }

    /// Create the root and require it to be empty.
    pub async fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        let mut entries = fs::read_dir(&self.root).await?;
        if entries.next_entry().await?.is_some() {
            return Err(LiveboxError::SandboxInit(format!(
                "workdir {} is not empty",
                self.root.display()
            )));
        }
        Ok(())
    }

    pub async fn mount(&self, tree: &MountTree) -> Result<()> {
        let mut stack = vec![(self.root.clone(), tree)];
        while let Some((dir, level)) = stack.pop() {
            fs::create_dir_all(&dir).await?;
            for (name, node) in level {
                let target = dir.join(name);
                match node {
                    MountNode::File { contents } => fs::write(&target, contents).await?,
                    MountNode::Directory(children) => stack.push((target, children)),
                }
            }
        }
        Ok(())
    }

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let target = self.resolve(path)?;
        match fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(LiveboxError::FileNotFound {
                path: path.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write_file(&self, path: &str, contents: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, contents).await?;
        Ok(())
    }

    pub async fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let target = self.resolve(path)?;
        let mut entries = fs::read_dir(&target).await?;
        let mut listing = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().await?.is_dir();
            listing.push(DirEntry { name, is_dir });
        }
        listing.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listing)
    }
}
