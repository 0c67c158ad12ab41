use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Directories never included in a snapshot.
const IGNORE_DIRS: &[&str] = &[".git", "__pycache__", ".cache", ".venv", "node_modules"];
/// Files never included in a snapshot.
const IGNORE_FILES: &[&str] = &[".DS_Store", ".gitignore", "Thumbs.db"];

/// Relative path -> SHA-256 digest of every file under a tree.
pub type ChecksumMap = BTreeMap<String, String>;

/// Streaming SHA-256 of one file, hex encoded.
pub fn file_digest(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Snapshot an installed tree: every file keyed by its path relative to
/// `root`, with `/` separators regardless of platform.
pub fn snapshot_tree(root: &Path) -> Result<ChecksumMap> {
    let mut map = ChecksumMap::new();
    walk(root, root, &mut map)?;
    debug!("Snapshot of {} covers {} files", root.display(), map.len());
    Ok(map)
}

fn walk(root: &Path, dir: &Path, map: &mut ChecksumMap) -> Result<()> {
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if path.is_dir() {
            if !IGNORE_DIRS.contains(&name.as_ref()) {
                walk(root, &path, map)?;
            }
        } else if !IGNORE_FILES.contains(&name.as_ref()) {
            let rel = path
                .strip_prefix(root)
                .expect("walked paths are under root")
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let digest = file_digest(&path)
                .with_context(|| format!("Failed to hash {}", path.display()))?;
            map.insert(rel, digest);
        }
    }
    Ok(())
}

/// One way a tree diverges from its expected snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumMismatch {
    /// Expected file is absent.
    Missing(String),
    /// File present but contents differ.
    Digest {
        path: String,
        expected: String,
        actual: String,
    },
    /// File present that the snapshot does not know about.
    Unexpected(String),
}

impl std::fmt::Display for ChecksumMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumMismatch::Missing(path) => write!(f, "missing: {}", path),
            ChecksumMismatch::Digest { path, expected, actual } => {
                write!(f, "digest mismatch: {} (expected {}, got {})", path, expected, actual)
            }
            ChecksumMismatch::Unexpected(path) => write!(f, "unexpected: {}", path),
        }
    }
}

/// Compare a tree against an expected snapshot. Empty result means the tree
/// matches exactly.
pub fn verify_tree(root: &Path, expected: &ChecksumMap) -> Result<Vec<ChecksumMismatch>> {
    let actual = snapshot_tree(root)?;
    let mut mismatches = Vec::new();

    for (path, digest) in expected {
        match actual.get(path) {
            None => mismatches.push(ChecksumMismatch::Missing(path.clone())),
            Some(found) if found != digest => mismatches.push(ChecksumMismatch::Digest {
                path: path.clone(),
                expected: digest.clone(),
                actual: found.clone(),
            }),
            Some(_) => {}
        }
    }

    for path in actual.keys() {
        if !expected.contains_key(path) {
            mismatches.push(ChecksumMismatch::Unexpected(path.clone()));
        }
    }

    Ok(mismatches)
}

pub fn load_snapshot(path: &Path) -> Result<ChecksumMap> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    let map = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse snapshot {}", path.display()))?;
    Ok(map)
}

pub fn save_snapshot(path: &Path, map: &ChecksumMap) -> Result<()> {
    let contents = serde_json::to_string_pretty(map)?;
    std::fs::write(path, contents)
        .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
    Ok(())
}
