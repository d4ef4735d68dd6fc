//! Filesystem operations whose failures the pipeline reports by name.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// A directory entry as the pipeline needs to see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: OsString,
    pub path: PathBuf,
    pub is_dir: bool,
    /// Permission bits (`st_mode & 0o7777`).
    pub mode: u32,
}

impl DirEntryInfo {
    pub fn is_executable(&self) -> bool {
        !self.is_dir && self.mode & 0o111 != 0
    }
}

pub trait FileSystem {
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Create a single directory. Fails if it already exists.
    fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// List a directory, sorted by file name.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntryInfo>>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Copy one regular file, replacing `dst` if it exists.
    fn copy_file(&self, src: &Path, dst: &Path) -> io::Result<()>;

    /// Create or truncate `path` to `size` bytes of zeros. Nothing is written:
    /// the file is sparse where the filesystem supports it.
    fn create_sized(&self, path: &Path, size: u64) -> io::Result<()>;

    /// Copy `src` (file, directory, symlink, or special file) into
    /// `dest_dir`, keeping its name, ownership, and mode.
    fn copy_special(&self, src: &Path, dest_dir: &Path) -> io::Result<()>;

    /// Recursively copy the contents of `src` into `dst`, preserving
    /// symlinks.
    fn copy_tree(&self, src: &Path, dst: &Path) -> io::Result<()>;

    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFs;

impl FileSystem for RealFs {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntryInfo>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            // Follow symlinks so a linked hook script counts as executable.
            let meta = fs::metadata(entry.path()).or_else(|_| entry.metadata())?;
            entries.push(DirEntryInfo {
                name: entry.file_name(),
                path: entry.path(),
                is_dir: meta.is_dir(),
                mode: meta.permissions().mode() & 0o7777,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn copy_file(&self, src: &Path, dst: &Path) -> io::Result<()> {
        fs::copy(src, dst).map(|_| ())
    }

    fn create_sized(&self, path: &Path, size: u64) -> io::Result<()> {
        fs::File::create(path)?.set_len(size)
    }

    fn copy_special(&self, src: &Path, dest_dir: &Path) -> io::Result<()> {
        // cp -a is the only portable way to keep device nodes and fifos intact.
        let output = Command::new("cp")
            .arg("-a")
            .arg(src)
            .arg(dest_dir)
            .output()?;
        if output.status.success() {
            return Ok(());
        }
        Err(io::Error::other(format!(
            "cp -a {} {} failed: {}",
            src.display(),
            dest_dir.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }

    fn copy_tree(&self, src: &Path, dst: &Path) -> io::Result<()> {
        copy_dir_recursive(src, dst)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }
}

/// Recursively copy a directory, preserving symlinks and permissions.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    if !dst.exists() {
        fs::create_dir_all(dst)?;
    }

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let target = fs::read_link(&src_path)?;
            if dst_path.exists() || dst_path.is_symlink() {
                fs::remove_file(&dst_path)?;
            }
            std::os::unix::fs::symlink(&target, &dst_path)?;
        } else if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
            let perms = fs::metadata(&src_path)?.permissions();
            fs::set_permissions(&dst_path, perms)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }

    Ok(())
}

/// Move a file by renaming, falling back to copy+delete across filesystems.
pub fn atomic_move(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(src, dst)?;
            fs::remove_file(src)
        }
    }
}
