//! Durable snapshot of pipeline progress.
//!
//! The checkpoint is one JSON file in the work directory holding the index
//! of the last completed step and the whole [`BuildContext`]. It is written
//! to a temporary file, synced, and renamed into place, so a reader sees
//! either the previous checkpoint or the new one. A payload whose digest
//! does not match is treated as corrupt.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;

use crate::context::BuildContext;
use crate::error::{BuildError, IoContext, Result};

pub const CHECKPOINT_FILE: &str = "image-builder.state.json";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("no checkpoint found at '{}'", .0.display())]
    Missing(PathBuf),

    #[error("checkpoint '{}' is unreadable: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("checkpoint '{}' is corrupt: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },
}

/// A loaded checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// Index of the last completed step; `None` if the run paused before
    /// the first one.
    pub step_index: Option<usize>,
    pub saved_at_utc: String,
    pub context: BuildContext,
}

impl Checkpoint {
    /// Index of the step a resumed run starts at.
    pub fn next_step(&self) -> usize {
        self.step_index.map_or(0, |i| i + 1)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    format_version: u32,
    step_index: Option<usize>,
    saved_at_utc: String,
    context_sha256: String,
    context: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn in_dir(work_dir: &Path) -> Self {
        Self {
            path: work_dir.join(CHECKPOINT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, step_index: Option<usize>, context: &BuildContext) -> Result<()> {
        let payload = serde_json::to_value(context).map_err(|source| BuildError::Serialization {
            context: "Error encoding checkpoint".into(),
            source,
        })?;
        let envelope = Envelope {
            format_version: FORMAT_VERSION,
            step_index,
            saved_at_utc: now_utc(),
            context_sha256: digest(&payload)?,
            context: payload,
        };
        let bytes =
            serde_json::to_vec_pretty(&envelope).map_err(|source| BuildError::Serialization {
                context: "Error encoding checkpoint".into(),
                source,
            })?;

        let tmp = self.path.with_extension("json.tmp");
        let write = || -> io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)?;
            if let Some(dir) = self.path.parent() {
                // Best effort: persist the rename itself.
                if let Ok(dir) = File::open(dir) {
                    let _ = dir.sync_all();
                }
            }
            Ok(())
        };
        write().io_context(|| format!("Error writing checkpoint '{}'", self.path.display()))?;

        tracing::debug!(path = %self.path.display(), ?step_index, "checkpoint saved");
        Ok(())
    }

    pub fn load(&self) -> std::result::Result<Checkpoint, CheckpointError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CheckpointError::Missing(self.path.clone()))
            }
            Err(source) => {
                return Err(CheckpointError::Unreadable {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let malformed = |reason: String| CheckpointError::Malformed {
            path: self.path.clone(),
            reason,
        };

        let envelope: Envelope =
            serde_json::from_slice(&bytes).map_err(|e| malformed(e.to_string()))?;
        if envelope.format_version != FORMAT_VERSION {
            return Err(malformed(format!(
                "format version {} is not supported (expected {})",
                envelope.format_version, FORMAT_VERSION
            )));
        }
        let actual = digest(&envelope.context).map_err(|e| malformed(e.to_string()))?;
        if actual != envelope.context_sha256 {
            return Err(malformed("context digest mismatch".into()));
        }
        let context: BuildContext =
            serde_json::from_value(envelope.context).map_err(|e| malformed(e.to_string()))?;

        Ok(Checkpoint {
            step_index: envelope.step_index,
            saved_at_utc: envelope.saved_at_utc,
            context,
        })
    }
}

/// Digest over the compact encoding of `value`. Object keys serialize in
/// sorted order, so the digest does not depend on struct field order.
fn digest(value: &serde_json::Value) -> Result<String> {
    let bytes = serde_json::to_vec(value).map_err(|source| BuildError::Serialization {
        context: "Error encoding checkpoint".into(),
        source,
    })?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

fn now_utc() -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}
