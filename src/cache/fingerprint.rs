/// Fingerprints for parameters, files, maps and scopes
///
/// All digests are SHA-256, hex encoded. Parameter and scope fingerprints
/// hash a canonical JSON rendering (object keys sorted at every level) so
/// they are stable across processes and independent of declaration order.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

use crate::workspace::{Region, Scope};

/// How file resources are compared between runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashMethod {
    /// Modification time and size - fast, the default
    #[default]
    Mtime,
    /// SHA-256 of the contents - immune to touch/copy timestamp noise
    Content,
}

/// Who created a map, as far as this run can tell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "task", rename_all = "lowercase")]
pub enum Provenance {
    /// Produced by the task with this identity earlier in the run
    Task(String),
    /// Exists and is not an output of any task in the pipeline
    External,
    /// Cannot be attributed (missing, or a pipeline output with no producer yet)
    Unknown,
}

/// Comparable summary of one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Signature {
    File {
        exists: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mtime: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hash: Option<String>,
    },
    Map {
        exists: bool,
        provenance: Provenance,
    },
}

impl Signature {
    pub fn exists(&self) -> bool {
        match self {
            Signature::File { exists, .. } | Signature::Map { exists, .. } => *exists,
        }
    }

    fn missing_file() -> Self {
        Signature::File {
            exists: false,
            mtime: None,
            size: None,
            hash: None,
        }
    }
}

/// Sort object keys recursively
pub fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            serde_json::Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

fn digest_json(value: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonicalize(value).to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Fingerprint of a task's contributing fields
pub fn params_fingerprint(contributing: &serde_json::Value) -> String {
    digest_json(contributing)
}

/// Fingerprint of the active scope and its region settings
pub fn scope_fingerprint(scope: &Scope, region: &Region) -> String {
    digest_json(&serde_json::json!({
        "scope": scope,
        "region": region,
    }))
}

/// Signature of a file or directory; absence is a valid signature
pub fn file_signature(path: &Path, method: HashMethod) -> Result<Signature> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Signature::missing_file()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read metadata: {}", path.display()))
        }
    };

    if metadata.is_dir() {
        return directory_signature(path, method);
    }

    let mtime = match method {
        HashMethod::Mtime => metadata.modified().ok().map(DateTime::<Utc>::from),
        HashMethod::Content => None,
    };

    // Content hash when asked for, or when the platform has no mtime
    let hash = match mtime {
        Some(_) => None,
        None => Some(hex::encode(hash_file_content(path)?)),
    };

    Ok(Signature::File {
        exists: true,
        mtime,
        size: Some(metadata.len()),
        hash,
    })
}

/// Aggregate signature over every file below `path` (sorted walk)
fn directory_signature(path: &Path, method: HashMethod) -> Result<Signature> {
    let mut hasher = Sha256::new();
    let mut total = 0u64;
    let mut latest: Option<DateTime<Utc>> = None;

    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry =
            entry.with_context(|| format!("Failed to walk directory: {}", path.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = entry.path().strip_prefix(path).unwrap_or(entry.path());
        hasher.update(rel.to_string_lossy().as_bytes());

        let metadata = entry
            .metadata()
            .with_context(|| format!("Failed to read metadata: {}", entry.path().display()))?;
        total += metadata.len();
        hasher.update(metadata.len().to_le_bytes());

        let mtime = match method {
            HashMethod::Mtime => metadata.modified().ok().map(DateTime::<Utc>::from),
            HashMethod::Content => None,
        };
        match mtime {
            Some(mtime) => {
                hasher.update(mtime.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
                latest = latest.max(Some(mtime));
            }
            None => hasher.update(hash_file_content(entry.path())?),
        }
    }

    Ok(Signature::File {
        exists: true,
        mtime: latest,
        size: Some(total),
        hash: Some(hex::encode(hasher.finalize())),
    })
}

/// Hash file contents using SHA256 (streaming)
fn hash_file_content(path: &Path) -> Result<Vec<u8>> {
    let mut file =
        fs::File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 65536];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_vec())
}
