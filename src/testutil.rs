//! Fake host capabilities for unit tests.

use std::cell::Cell;
use std::fs;
use std::io;
use std::os::unix::fs::{FileExt, PermissionsExt};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::host::{
    BlobCopier, BlobCopy, DirEntryInfo, FileSystem, FilesystemMaker, MkfsRequest, NativeCopier,
    ProcessRunner, RealFs,
};
use crate::process::{Cmd, CommandOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsOp {
    CreateDirAll,
    CreateDir,
    ReadDir,
    Rename,
    CopyFile,
    CreateSized,
    CopySpecial,
    CopyTree,
    RemoveDirAll,
}

/// The real filesystem, except that one operation always fails.
pub struct FailingFs {
    op: FsOp,
}

impl FailingFs {
    pub fn on(op: FsOp) -> Self {
        Self { op }
    }

    fn check(&self, op: FsOp) -> io::Result<()> {
        if op == self.op {
            return Err(io::Error::other(format!("injected {:?} failure", op)));
        }
        Ok(())
    }
}

impl FileSystem for FailingFs {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.check(FsOp::CreateDirAll)?;
        RealFs.create_dir_all(path)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        self.check(FsOp::CreateDir)?;
        RealFs.create_dir(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntryInfo>> {
        self.check(FsOp::ReadDir)?;
        RealFs.read_dir(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.check(FsOp::Rename)?;
        RealFs.rename(from, to)
    }

    fn copy_file(&self, src: &Path, dst: &Path) -> io::Result<()> {
        self.check(FsOp::CopyFile)?;
        RealFs.copy_file(src, dst)
    }

    fn create_sized(&self, path: &Path, size: u64) -> io::Result<()> {
        self.check(FsOp::CreateSized)?;
        RealFs.create_sized(path, size)
    }

    fn copy_special(&self, src: &Path, dest_dir: &Path) -> io::Result<()> {
        self.check(FsOp::CopySpecial)?;
        RealFs.copy_special(src, dest_dir)
    }

    fn copy_tree(&self, src: &Path, dst: &Path) -> io::Result<()> {
        self.check(FsOp::CopyTree)?;
        RealFs.copy_tree(src, dst)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        self.check(FsOp::RemoveDirAll)?;
        RealFs.remove_dir_all(path)
    }
}

/// Native copies that start failing after `ok` successful calls.
pub struct FailingCopier {
    ok: usize,
    calls: Cell<usize>,
}

impl FailingCopier {
    pub fn always() -> Self {
        Self::after(0)
    }

    pub fn after(ok: usize) -> Self {
        Self {
            ok,
            calls: Cell::new(0),
        }
    }
}

impl BlobCopier for FailingCopier {
    fn copy(&self, request: &BlobCopy<'_>) -> io::Result<()> {
        let n = self.calls.get();
        self.calls.set(n + 1);
        if n >= self.ok {
            return Err(io::Error::other("injected copy failure"));
        }
        NativeCopier.copy(request)
    }
}

pub struct FailingMkfs;

impl FilesystemMaker for FailingMkfs {
    fn make_with_content(
        &self,
        _req: &MkfsRequest<'_>,
        _runner: &dyn ProcessRunner,
    ) -> io::Result<()> {
        Err(io::Error::other("injected mkfs failure"))
    }
}

/// Writes a marker at the start of the staging image instead of a real
/// filesystem.
pub struct MarkerMkfs;

impl MarkerMkfs {
    pub const MARKER: &'static [u8] = b"FAKEFS";
}

impl FilesystemMaker for MarkerMkfs {
    fn make_with_content(
        &self,
        req: &MkfsRequest<'_>,
        _runner: &dyn ProcessRunner,
    ) -> io::Result<()> {
        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(req.image)?;
        file.write_all_at(Self::MARKER, 0)
    }
}

/// Records every command and answers with a canned result.
#[derive(Clone)]
pub struct RecordingRunner {
    calls: Arc<Mutex<Vec<Cmd>>>,
    code: i32,
    stdout: String,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self {
            calls: Arc::default(),
            code: 0,
            stdout: String::new(),
        }
    }

    pub fn failing(code: i32) -> Self {
        Self {
            code,
            ..Self::new()
        }
    }

    pub fn with_stdout(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<Cmd> {
        self.calls.lock().unwrap().clone()
    }
}

impl ProcessRunner for RecordingRunner {
    fn run(&self, cmd: &Cmd) -> io::Result<CommandOutput> {
        self.calls.lock().unwrap().push(cmd.clone());
        Ok(CommandOutput {
            code: self.code,
            stdout: self.stdout.clone(),
            stderr: String::new(),
        })
    }
}

/// Write an executable `/bin/sh` script.
pub fn write_script(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}
