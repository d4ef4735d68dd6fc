//! Filesystem creation with initial content.

use std::fs;
use std::io;
use std::path::Path;

use super::ProcessRunner;
use crate::layout::FilesystemKind;
use crate::process::Cmd;

/// What to build and what to put in it.
#[derive(Debug, Clone)]
pub struct MkfsRequest<'a> {
    pub kind: FilesystemKind,
    /// Pre-sized staging image the filesystem is written into.
    pub image: &'a Path,
    pub label: Option<&'a str>,
    /// Directory whose contents become the filesystem's root.
    pub content_root: &'a Path,
    pub size: u64,
    pub sector_size: u64,
}

/// Builds a filesystem image. Any external tool goes through `runner`.
pub trait FilesystemMaker {
    fn make_with_content(&self, req: &MkfsRequest<'_>, runner: &dyn ProcessRunner)
        -> io::Result<()>;
}

/// Builds filesystems with the host's `mkfs.ext4`, `mkfs.vfat` and `mcopy`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MkfsTool;

/// FAT volume labels are at most 11 characters.
const FAT_LABEL_MAX: usize = 11;

impl MkfsTool {
    /// The command sequence for `req`, in execution order.
    pub fn commands(req: &MkfsRequest<'_>) -> io::Result<Vec<Cmd>> {
        match req.kind {
            FilesystemKind::Ext4 => {
                let mut cmd = Cmd::new("mkfs.ext4").args(["-q", "-F"]);
                if let Some(label) = req.label {
                    cmd = cmd.args(["-L", label]);
                }
                // -d populates the filesystem from a directory without mounting.
                if has_entries(req.content_root)? {
                    cmd = cmd.arg("-d").arg_path(req.content_root);
                }
                Ok(vec![cmd.arg_path(req.image)])
            }
            FilesystemKind::Vfat => {
                let mut mkfs = Cmd::new("mkfs.vfat")
                    .arg("-S")
                    .arg(req.sector_size.to_string());
                if let Some(label) = req.label {
                    let label: String = label.to_uppercase().chars().take(FAT_LABEL_MAX).collect();
                    mkfs = mkfs.args(["-n", label.as_str()]);
                }
                let mut cmds = vec![mkfs.arg_path(req.image)];

                if req.content_root.is_dir() {
                    let mut entries: Vec<_> = fs::read_dir(req.content_root)?
                        .map(|e| e.map(|e| e.path()))
                        .collect::<io::Result<_>>()?;
                    entries.sort();
                    for entry in entries {
                        cmds.push(
                            Cmd::new("mcopy")
                                .args(["-s", "-i"])
                                .arg_path(req.image)
                                .arg_path(&entry)
                                .arg("::"),
                        );
                    }
                }
                Ok(cmds)
            }
        }
    }
}

impl FilesystemMaker for MkfsTool {
    fn make_with_content(
        &self,
        req: &MkfsRequest<'_>,
        runner: &dyn ProcessRunner,
    ) -> io::Result<()> {
        for cmd in Self::commands(req)? {
            tracing::debug!(command = %cmd, "building filesystem");
            let output = runner.run(&cmd)?;
            if !output.success() {
                return Err(io::Error::other(format!(
                    "{} failed: {}",
                    cmd.program(),
                    output.failure_summary()
                )));
            }
        }
        Ok(())
    }
}

fn has_entries(dir: &Path) -> io::Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }
    Ok(fs::read_dir(dir)?.next().is_some())
}
