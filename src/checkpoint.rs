//! Checkpoints of manifest and lockfiles, and rollback to them.
//!
//! Layout under the project root:
//!
//! ```text
//! .lineage-tmp/checkpoints/<timestamp>/
//!     package.json
//!     package-lock.json
//!     meta.json          {timestamp, ecosystem, reason, files[]}
//! ```
//!
//! A checkpoint is assembled in a hidden staging directory and renamed into
//! place, so a failed copy never leaves a partial checkpoint behind. Restores
//! write each file through a temporary sibling and rename, and skip files that
//! already match, which makes rollback idempotent.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{info, warn};

use crate::model::Ecosystem;
use crate::resolve::{go, npm, pip};
use crate::TOOL_DIR;

pub const CHECKPOINT_DIR: &str = "checkpoints";
pub const META_FILE: &str = "meta.json";
/// Reason recorded for checkpoints whose metadata is missing or unreadable.
pub const UNKNOWN_REASON: &str = "unknown";

const ID_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3fZ";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("No checkpoint found{}", .0.as_deref().map(|id| format!(" with id '{}'", id)).unwrap_or_default())]
    NotFound(Option<String>),

    #[error("Project root {} is not a directory", .0.display())]
    InvalidRoot(PathBuf),

    #[error("No {ecosystem} manifest found to checkpoint")]
    NoManifest { ecosystem: Ecosystem },

    #[error("Failed to copy {file}: {source}")]
    Copy {
        file: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid checkpoint metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Checkpoint entry '{attempted}' escapes the project root")]
    PathTraversal { attempted: String },
}

impl CheckpointError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CheckpointError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Resolves a checkpoint entry against `base`, rejecting absolute paths and
/// `..` components.
fn safe_child(base: &Path, relative: &str) -> Result<PathBuf, CheckpointError> {
    let rel = Path::new(relative);
    let escapes = rel.as_os_str().is_empty()
        || rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(CheckpointError::PathTraversal {
            attempted: relative.to_string(),
        });
    }
    Ok(base.join(rel))
}

/// Ordering key for ids: the timestamp, then the numeric collision suffix.
fn id_order(id: &str) -> (&str, u64) {
    match id.split_once("Z-") {
        Some((stamp, suffix)) => (stamp, suffix.parse().unwrap_or(0)),
        None => (id.trim_end_matches('Z'), 0),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CheckpointMeta {
    timestamp: String,
    ecosystem: Option<Ecosystem>,
    reason: String,
    files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Checkpoint {
    /// Sortable timestamp id, also the directory name.
    pub id: String,
    /// `None` when the metadata record was unreadable.
    pub ecosystem: Option<Ecosystem>,
    pub reason: String,
    /// Paths relative to the project root, `/`-separated.
    pub files: Vec<String>,
    #[serde(skip)]
    pub path: PathBuf,
}

impl Checkpoint {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let naive = chrono::NaiveDateTime::parse_from_str(self.id.get(..23)?, "%Y-%m-%dT%H-%M-%S%.3f").ok()?;
        Some(Utc.from_utc_datetime(&naive))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RollbackOptions {
    /// Restore this checkpoint id instead of the newest one.
    pub checkpoint: Option<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    pub checkpoint: String,
    /// Files rewritten (or, in a dry run, that would be).
    pub restored: Vec<String>,
    /// Files already identical to the checkpoint.
    pub unchanged: Vec<String>,
    pub dry_run: bool,
}

/// Manifest and lockfiles snapshotted for `ecosystem`, relative to `root`.
pub fn tracked_files(root: &Path, ecosystem: Ecosystem) -> Vec<String> {
    let candidates: Vec<String> = match ecosystem {
        Ecosystem::Npm => vec![npm::MANIFEST, npm::LOCKFILE, npm::SHRINKWRAP]
            .into_iter()
            .map(str::to_string)
            .collect(),
        Ecosystem::Pip => {
            let mut files = vec![pip::PYPROJECT.to_string(), pip::REQUIREMENTS.to_string()];
            if let Ok(entries) = std::fs::read_dir(root.join("requirements")) {
                let mut extra: Vec<String> = entries
                    .flatten()
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .filter(|name| name.ends_with(".txt"))
                    .map(|name| format!("requirements/{}", name))
                    .collect();
                extra.sort();
                files.extend(extra);
            }
            files
        }
        Ecosystem::Go => vec![go::GO_MOD.to_string(), go::GO_SUM.to_string()],
    };
    candidates
        .into_iter()
        .filter(|rel| root.join(rel).is_file())
        .collect()
}

fn has_manifest(files: &[String], ecosystem: Ecosystem) -> bool {
    let required: &[&str] = match ecosystem {
        Ecosystem::Npm => &[npm::MANIFEST, npm::LOCKFILE, npm::SHRINKWRAP],
        Ecosystem::Pip => &[pip::PYPROJECT, pip::REQUIREMENTS],
        Ecosystem::Go => &[go::GO_MOD],
    };
    files.iter().any(|f| required.contains(&f.as_str()) || f.starts_with("requirements/"))
}

/// Replaces `path` with `bytes` through a temporary sibling and a rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    std::fs::create_dir_all(parent)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(
        ".{}.{}-{}.tmp",
        name,
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::write(&tmp, bytes)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

fn files_under(dir: &Path, prefix: &str, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let rel = if prefix.is_empty() { name.clone() } else { format!("{}/{}", prefix, name) };
        let path = entry.path();
        if path.is_dir() {
            files_under(&path, &rel, out);
        } else if rel != META_FILE {
            out.push(rel);
        }
    }
}

/// Checkpoints for one project root.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let dir = root.join(TOOL_DIR).join(CHECKPOINT_DIR);
        Self { root, dir }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshots the ecosystem's manifest and lockfiles.
    pub fn create(&self, ecosystem: Ecosystem, reason: &str) -> Result<Checkpoint, CheckpointError> {
        if !self.root.is_dir() {
            return Err(CheckpointError::InvalidRoot(self.root.clone()));
        }
        let files = tracked_files(&self.root, ecosystem);
        if !has_manifest(&files, ecosystem) {
            return Err(CheckpointError::NoManifest { ecosystem });
        }

        std::fs::create_dir_all(&self.dir).map_err(|e| CheckpointError::io(&self.dir, e))?;
        let id = self.fresh_id();
        let staging = self.dir.join(format!(".staging-{}", id));
        let target = self.dir.join(&id);

        let staged = self.stage(&staging, &id, ecosystem, reason, &files).and_then(|()| {
            std::fs::rename(&staging, &target).map_err(|e| CheckpointError::io(&target, e))
        });
        if let Err(e) = staged {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }

        info!(checkpoint = %id, %ecosystem, files = files.len(), "Created checkpoint");
        Ok(Checkpoint {
            id,
            ecosystem: Some(ecosystem),
            reason: reason.to_string(),
            files,
            path: target,
        })
    }

    fn fresh_id(&self) -> String {
        let base = Utc::now().format(ID_FORMAT).to_string();
        if !self.dir.join(&base).exists() {
            return base;
        }
        (1..)
            .map(|n| format!("{}-{}", base, n))
            .find(|candidate| !self.dir.join(candidate).exists())
            .unwrap_or(base)
    }

    fn stage(
        &self,
        staging: &Path,
        id: &str,
        ecosystem: Ecosystem,
        reason: &str,
        files: &[String],
    ) -> Result<(), CheckpointError> {
        std::fs::create_dir_all(staging).map_err(|e| CheckpointError::io(staging, e))?;
        for rel in files {
            let dest = staging.join(rel);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|e| CheckpointError::io(parent, e))?;
            }
            std::fs::copy(self.root.join(rel), &dest).map_err(|source| CheckpointError::Copy {
                file: rel.clone(),
                source,
            })?;
        }
        let meta = CheckpointMeta {
            timestamp: id.to_string(),
            ecosystem: Some(ecosystem),
            reason: reason.to_string(),
            files: files.to_vec(),
        };
        let meta_path = staging.join(META_FILE);
        std::fs::write(&meta_path, serde_json::to_vec_pretty(&meta)?)
            .map_err(|e| CheckpointError::io(&meta_path, e))
    }

    /// Every checkpoint, newest first.
    pub fn list(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CheckpointError::io(&self.dir, e)),
        };

        let mut checkpoints: Vec<Checkpoint> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let id = e.file_name().to_string_lossy().into_owned();
                (!id.starts_with('.')).then(|| self.load(id, e.path()))
            })
            .collect();
        checkpoints.sort_by(|a, b| id_order(&b.id).cmp(&id_order(&a.id)));
        Ok(checkpoints)
    }

    fn load(&self, id: String, path: PathBuf) -> Checkpoint {
        let meta = std::fs::read_to_string(path.join(META_FILE))
            .ok()
            .and_then(|text| serde_json::from_str::<CheckpointMeta>(&text).ok());
        match meta {
            Some(meta) => Checkpoint {
                id,
                ecosystem: meta.ecosystem,
                reason: meta.reason,
                files: meta.files,
                path,
            },
            None => {
                warn!(checkpoint = %id, "Checkpoint metadata missing or unreadable");
                let mut files = Vec::new();
                files_under(&path, "", &mut files);
                files.sort();
                Checkpoint {
                    id,
                    ecosystem: None,
                    reason: UNKNOWN_REASON.to_string(),
                    files,
                    path,
                }
            }
        }
    }

    pub fn latest(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.list()?.into_iter().next())
    }

    pub fn find(&self, id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.list()?.into_iter().find(|c| c.id == id))
    }

    /// Copies the selected checkpoint back over the live files. Never runs the
    /// package manager.
    pub fn rollback(&self, options: &RollbackOptions) -> Result<RollbackReport, CheckpointError> {
        let checkpoint = match &options.checkpoint {
            Some(id) => self.find(id)?,
            None => self.latest()?,
        }
        .ok_or_else(|| CheckpointError::NotFound(options.checkpoint.clone()))?;

        let mut report = RollbackReport {
            checkpoint: checkpoint.id.clone(),
            restored: Vec::new(),
            unchanged: Vec::new(),
            dry_run: options.dry_run,
        };

        // Validate every entry before anything is written.
        let entries = checkpoint
            .files
            .iter()
            .map(|rel| -> Result<_, CheckpointError> {
                Ok((rel, safe_child(&checkpoint.path, rel)?, safe_child(&self.root, rel)?))
            })
            .collect::<Result<Vec<_>, CheckpointError>>()?;

        for (rel, saved_path, live) in entries {
            let saved = std::fs::read(&saved_path).map_err(|source| CheckpointError::Copy {
                file: rel.clone(),
                source,
            })?;
            if std::fs::read(&live).map_or(false, |current| current == saved) {
                report.unchanged.push(rel.clone());
                continue;
            }
            if !options.dry_run {
                write_atomic(&live, &saved).map_err(|source| CheckpointError::Copy {
                    file: rel.clone(),
                    source,
                })?;
            }
            report.restored.push(rel.clone());
        }

        info!(
            checkpoint = %report.checkpoint,
            restored = report.restored.len(),
            dry_run = report.dry_run,
            "Rollback finished"
        );
        Ok(report)
    }
}
