//! Per-task fingerprints and the up-to-date check.
//!
//! Each task persists one JSON record next to its outputs: a content hash and
//! mtime per declared input and output, plus a hash of the non-file inputs
//! (compiler, flags). A task is up to date when the stored record matches the
//! current files; mtime equality short-circuits the content hash, and an
//! mtime that drifted over unchanged content only refreshes the stored mtime.

use std::{collections::BTreeSet, io::Read, time::SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHash {
    pub name: Utf8PathBuf,
    pub hash: String,
    /// Nanoseconds since the unix epoch; zero when unreadable.
    pub mtime: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHashes {
    pub inputs: Vec<FileHash>,
    pub outputs: Vec<FileHash>,
    pub flags_hash: String,
}

pub struct HashChecker {
    hash_filename: Utf8PathBuf,
    inputs: BTreeSet<Utf8PathBuf>,
    outputs: BTreeSet<Utf8PathBuf>,
    flags_hash: String,
    up_to_date_hashes: Option<TaskHashes>,
}

/// Sha256 of a file's contents, hex encoded.
fn hash_file(path: &Utf8Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn hash_string(s: &str) -> String {
    hex::encode(Sha256::digest(s.as_bytes()))
}

fn file_mtime(path: &Utf8Path) -> std::io::Result<u64> {
    let mtime = std::fs::metadata(path)?.modified()?;
    Ok(mtime
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0))
}

fn compute_hashes(files: &BTreeSet<Utf8PathBuf>) -> Vec<FileHash> {
    files
        .iter()
        .map(|name| FileHash {
            name: name.clone(),
            hash: hash_file(name).unwrap_or_default(),
            mtime: file_mtime(name).unwrap_or(0),
        })
        .collect()
}

/// Compares a stored file list against the current set, refreshing stored
/// mtimes whose content still matches. Returns true on any difference.
fn any_file_changed(stored: &mut [FileHash], files: &BTreeSet<Utf8PathBuf>) -> bool {
    if stored.len() != files.len() {
        return true;
    }
    for cached in stored {
        if !files.contains(&cached.name) {
            return true;
        }
        let Ok(mtime) = file_mtime(&cached.name) else {
            return true;
        };
        if cached.mtime == mtime {
            continue;
        }
        let Ok(hash) = hash_file(&cached.name) else {
            return true;
        };
        if hash != cached.hash {
            return true;
        }
        // Content matched under a new mtime; remember the new one.
        cached.mtime = mtime;
    }
    false
}

impl HashChecker {
    pub fn new(
        hash_filename: Utf8PathBuf,
        inputs: BTreeSet<Utf8PathBuf>,
        outputs: BTreeSet<Utf8PathBuf>,
        non_file_inputs_key: &str,
    ) -> Self {
        Self {
            hash_filename,
            inputs,
            outputs,
            flags_hash: hash_string(non_file_inputs_key),
            up_to_date_hashes: None,
        }
    }

    /// True when the stored record matches the current inputs, outputs, and
    /// flags hash. Any read or parse problem counts as out of date.
    pub fn is_up_to_date(&mut self) -> bool {
        let Ok(text) = std::fs::read_to_string(&self.hash_filename) else {
            return false;
        };
        let Ok(mut cached) = serde_json::from_str::<TaskHashes>(&text) else {
            return false;
        };
        if cached.flags_hash != self.flags_hash {
            return false;
        }
        if any_file_changed(&mut cached.inputs, &self.inputs) {
            return false;
        }
        if any_file_changed(&mut cached.outputs, &self.outputs) {
            return false;
        }
        self.up_to_date_hashes = Some(cached);
        true
    }

    /// Serializes the current record. When the up-to-date check passed, the
    /// mtime-refreshed record is reused; otherwise hashes are recomputed
    /// from the files on disk. Failures are warned, never fatal.
    pub fn write_updated_hashes(&self) {
        let hashes = match &self.up_to_date_hashes {
            Some(hashes) => hashes.clone(),
            None => TaskHashes {
                inputs: compute_hashes(&self.inputs),
                outputs: compute_hashes(&self.outputs),
                flags_hash: self.flags_hash.clone(),
            },
        };
        if let Err(err) = self.try_write(&hashes) {
            warn!("failed to write hash cache {}: {err}", self.hash_filename);
        }
    }

    fn try_write(&self, hashes: &TaskHashes) -> std::io::Result<()> {
        if let Some(parent) = self.hash_filename.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(hashes)?;
        std::fs::write(&self.hash_filename, json)
    }
}
