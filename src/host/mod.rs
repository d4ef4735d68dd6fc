//! Injected host capabilities.
//!
//! The pipeline never touches the filesystem, spawns a process, copies a
//! blob, or builds a filesystem directly for the operations whose failures it
//! has to report distinctly. It goes through a [`Host`] instead, whose
//! fields can be swapped one at a time in tests.

pub mod blob;
pub mod fs;
pub mod mkfs;
pub mod runner;

pub use blob::{BlobCopier, BlobCopy, BlobSource, NativeCopier};
pub use fs::{DirEntryInfo, FileSystem, RealFs};
pub use mkfs::{FilesystemMaker, MkfsRequest, MkfsTool};
pub use runner::{ProcessRunner, SystemRunner};

/// The set of primitives a pipeline run depends on.
pub struct Host {
    pub fs: Box<dyn FileSystem>,
    pub runner: Box<dyn ProcessRunner>,
    pub blobs: Box<dyn BlobCopier>,
    pub mkfs: Box<dyn FilesystemMaker>,
}

impl Host {
    /// Real filesystem, real processes, native blob copies, host mkfs tools.
    pub fn system() -> Self {
        Self {
            fs: Box::new(RealFs),
            runner: Box::new(SystemRunner),
            blobs: Box::new(NativeCopier),
            mkfs: Box::new(MkfsTool),
        }
    }

    pub fn with_fs(mut self, fs: impl FileSystem + 'static) -> Self {
        self.fs = Box::new(fs);
        self
    }

    pub fn with_runner(mut self, runner: impl ProcessRunner + 'static) -> Self {
        self.runner = Box::new(runner);
        self
    }

    pub fn with_blobs(mut self, blobs: impl BlobCopier + 'static) -> Self {
        self.blobs = Box::new(blobs);
        self
    }

    pub fn with_mkfs(mut self, mkfs: impl FilesystemMaker + 'static) -> Self {
        self.mkfs = Box::new(mkfs);
        self
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::system()
    }
}
