//! Content fingerprints
//!
//! Fingerprints hash content only. Paths are hashed relative to the tree
//! root and timestamps are never read, so the same checkout produces the same
//! fingerprint on any machine.

use rollout_core::domain::cache::Fingerprint;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::Path;

/// Directory names never included in a source tree fingerprint
const IGNORED_DIRS: &[&str] = &[".git", "__pycache__", ".pytest_cache", "node_modules", "target"];

pub fn of_bytes(bytes: &[u8]) -> Fingerprint {
    Fingerprint::from_hex(hex::encode(Sha256::digest(bytes)))
}

pub fn of_file(path: &Path) -> io::Result<Fingerprint> {
    let bytes = fs::read(path)?;
    Ok(of_bytes(&bytes))
}

/// Fingerprint of every file below `root`
pub fn of_tree(root: &Path) -> io::Result<Fingerprint> {
    let mut files = Vec::new();
    collect_files(root, root, &mut files)?;
    files.sort();

    let mut hasher = Sha256::new();
    for relative in files {
        let content = of_file(&root.join(&relative))?;
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update(content.as_str().as_bytes());
        hasher.update([0u8]);
    }

    Ok(Fingerprint::from_hex(hex::encode(hasher.finalize())))
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            let name = entry.file_name();
            if IGNORED_DIRS.iter().any(|ignored| name == *ignored) {
                continue;
            }
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            let components: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect();
            out.push(components.join("/"));
        }
    }
    Ok(())
}
