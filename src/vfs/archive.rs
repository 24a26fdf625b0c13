//! `.tar.gz` snapshots of a tree, used to load and hand off whole apps.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use crate::error::{LiveboxError, Result};
use crate::vfs::{split_path, FileContent, FileTree};

/// Environment files that hold secrets and never leave the machine in a snapshot.
const SECRET_FILES: &[&str] = &[".env", ".env.local", ".env.development", ".env.production"];

/// Archiver droppings skipped on load regardless of the ignore list.
const ARCHIVE_JUNK: &[&str] = &["__MACOSX", ".DS_Store"];

fn is_secret(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    SECRET_FILES.contains(&name)
}

fn is_skipped(path: &str, ignore: &[String]) -> bool {
    split_path(path).map_or(true, |segments| {
        segments
            .iter()
            .any(|s| ARCHIVE_JUNK.contains(s) || ignore.iter().any(|i| i.as_str() == *s))
    })
}

/// Pack every file leaf of `tree` into a gzip-compressed tarball.
/// Environment files are left out.
pub fn write_archive<W: Write>(tree: &FileTree, writer: W) -> Result<W> {
    let mut builder = tar::Builder::new(GzEncoder::new(writer, Compression::default()));

    let mut skipped = 0;
    for (path, content) in tree.files() {
        if is_secret(&path) {
            skipped += 1;
            continue;
        }
        let bytes = content.as_bytes();
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, &path, bytes)
            .map_err(|e| LiveboxError::Archive(format!("failed to add {}: {}", path, e)))?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| LiveboxError::Archive(format!("failed to finish tarball: {}", e)))?;
    let writer = encoder
        .finish()
        .map_err(|e| LiveboxError::Archive(format!("failed to finish gzip stream: {}", e)))?;

    debug!(files = tree.len() - skipped, skipped = skipped, "Wrote tree archive");
    Ok(writer)
}

/// Load a tree from a gzip-compressed tarball, skipping entries under any
/// directory named in `ignore` and archiver metadata.
pub fn read_archive<R: Read>(reader: R, ignore: &[String]) -> Result<FileTree> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    let mut tree = FileTree::new();

    let entries = archive
        .entries()
        .map_err(|e| LiveboxError::Archive(format!("unreadable archive: {}", e)))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| LiveboxError::Archive(format!("corrupt entry: {}", e)))?;
        let path = entry
            .path()
            .map_err(|e| LiveboxError::Archive(format!("bad entry path: {}", e)))?
            .to_string_lossy()
            .into_owned();

        if is_skipped(&path, ignore) {
            debug!(path = %path, "Skipping archive entry");
            continue;
        }

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            tree.insert_dir(&path)?;
        } else if entry_type.is_file() {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            tree.insert_file(&path, FileContent::from_bytes(&path, bytes))?;
        }
    }

    debug!(files = tree.len(), "Read tree archive");
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_preserves_text_and_binary_leaves() {
        let mut tree = FileTree::new();
        tree.insert_file("src/main.tsx", "render(<App/>)").unwrap();
        tree.insert_file("public/favicon.ico", vec![0u8, 1, 2, 255])
            .unwrap();

        let bytes = write_archive(&tree, Vec::new()).unwrap();
        let restored = read_archive(bytes.as_slice(), &[]).unwrap();

        assert_eq!(restored, tree);
    }

    #[test]
    fn garbage_input_is_an_archive_error() {
        let err = read_archive(&b"definitely not gzip"[..], &[]).unwrap_err();
        assert!(matches!(err, LiveboxError::Archive(_) | LiveboxError::Io(_)));
    }

    #[test]
    fn environment_files_stay_out_of_snapshots() {
        let mut tree = FileTree::new();
        tree.insert_file(".env", "SECRET=1").unwrap();
        tree.insert_file("server/.env.production", "SECRET=2").unwrap();
        tree.insert_file(".env.example", "SECRET=").unwrap();
        tree.insert_file("src/main.ts", "main()").unwrap();

        let bytes = write_archive(&tree, Vec::new()).unwrap();
        let restored = read_archive(bytes.as_slice(), &[]).unwrap();

        assert!(restored.get_file(".env").is_none());
        assert!(restored.get_file("server/.env.production").is_none());
        assert!(restored.get_file(".env.example").is_some());
        assert!(restored.get_file("src/main.ts").is_some());
    }

    #[test]
    fn ignored_directories_and_archiver_junk_are_skipped_on_load() {
        let mut tree = FileTree::new();
        tree.insert_file("src/main.ts", "main()").unwrap();
        tree.insert_file("node_modules/react/index.js", "react").unwrap();
        tree.insert_file(".git/HEAD", "ref: main").unwrap();
        tree.insert_file("__MACOSX/src/._main.ts", vec![0u8, 5]).unwrap();
        tree.insert_file("src/.DS_Store", vec![0u8, 1]).unwrap();

        let bytes = write_archive(&tree, Vec::new()).unwrap();
        let ignore = vec!["node_modules".to_string(), ".git".to_string()];
        let restored = read_archive(bytes.as_slice(), &ignore).unwrap();

        let paths: Vec<String> = restored.files().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["src/main.ts"]);
    }
}
