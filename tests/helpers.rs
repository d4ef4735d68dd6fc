//! Shared test utilities for pipeline tests.

#![allow(dead_code)]

use std::fs;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image_builder::host::{
    DirEntryInfo, FileSystem, FilesystemMaker, MkfsRequest, ProcessRunner, RealFs,
};
use image_builder::process::{Cmd, CommandOutput};
use image_builder::{Host, ImageConfig};
use tempfile::TempDir;

/// First bytes of every filesystem the fake mkfs builds.
pub const FS_MARKER: &[u8] = b"FAKEFS";

/// Boot sector content the fixture gadget ships.
pub const BOOT_CODE: [u8; 440] = [0xEB; 440];

pub const EFI_OFFSET: u64 = 1024 * 1024;
pub const EFI_SIZE: u64 = 2 * 1024 * 1024;

pub const PC_LAYOUT: &str = r#"
[volumes.pc]
schema = "gpt"
bootloader = "grub"

[[volumes.pc.structure]]
name = "mbr"
role = "mbr"
size = 440
content = [{ image = "pc-boot.img" }]

[[volumes.pc.structure]]
name = "EFI System"
role = "system-boot"
offset = 1048576
size = 2097152
filesystem = "vfat"
label = "system-boot"
type = "C12A7328-F81F-11D2-BA4B-00A0C93EC93B"
content = [{ source = "grubx64.efi", target = "EFI/boot/" }]

[[volumes.pc.structure]]
name = "writable"
role = "system-data"
filesystem = "ext4"
label = "writable"
type = "0FC63DAF-8483-4772-8E79-3D69D8477DE4"
"#;

/// Gadget, rootfs and output directories for one build.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub base: PathBuf,
    pub gadget: PathBuf,
    pub rootfs: PathBuf,
    pub output: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let gadget = base.join("gadget");
        let rootfs = base.join("rootfs");
        let output = base.join("out");

        fs::create_dir_all(gadget.join("boot-assets/grub")).unwrap();
        fs::write(gadget.join("layout.toml"), PC_LAYOUT).unwrap();
        fs::write(gadget.join("pc-boot.img"), BOOT_CODE).unwrap();
        fs::write(gadget.join("grubx64.efi"), b"grub efi binary").unwrap();
        fs::write(gadget.join("boot-assets/grub/grub.cfg"), "set timeout=0\n").unwrap();

        fs::create_dir_all(rootfs.join("etc")).unwrap();
        fs::create_dir_all(rootfs.join("usr/bin")).unwrap();
        fs::write(rootfs.join("etc/hostname"), "image\n").unwrap();
        fs::write(rootfs.join("usr/bin/init"), vec![0x7f; 10_000]).unwrap();

        Self {
            _temp_dir: temp_dir,
            base,
            gadget,
            rootfs,
            output,
        }
    }

    pub fn config(&self) -> ImageConfig {
        let mut config = ImageConfig::with_tree(
            &self.gadget.join("layout.toml"),
            &self.gadget,
            &self.rootfs,
            &self.output,
        );
        config.boot_assets = Some(self.gadget.join("boot-assets"));
        config
    }

    pub fn work_dir(&self, name: &str) -> PathBuf {
        self.base.join(name)
    }
}

/// A host that never runs a real tool: commands succeed and are recorded,
/// filesystems are a marker in an otherwise zeroed image.
pub fn fake_host() -> (Host, RecordingRunner) {
    let runner = RecordingRunner::default();
    let host = Host::system()
        .with_runner(runner.clone())
        .with_mkfs(MarkerMkfs);
    (host, runner)
}

#[derive(Clone, Default)]
pub struct RecordingRunner {
    calls: Arc<Mutex<Vec<Cmd>>>,
}

impl RecordingRunner {
    pub fn programs(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.program().to_string())
            .collect()
    }
}

impl ProcessRunner for RecordingRunner {
    fn run(&self, cmd: &Cmd) -> io::Result<CommandOutput> {
        self.calls.lock().unwrap().push(cmd.clone());
        Ok(CommandOutput::default())
    }
}

pub struct MarkerMkfs;

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
        file.write_all_at(FS_MARKER, 0)
    }
}

/// The real filesystem, except that nothing can be removed.
pub struct UndeletableFs;

impl FileSystem for UndeletableFs {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        RealFs.create_dir_all(path)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        RealFs.create_dir(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntryInfo>> {
        RealFs.read_dir(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        RealFs.rename(from, to)
    }

    fn copy_file(&self, src: &Path, dst: &Path) -> io::Result<()> {
        RealFs.copy_file(src, dst)
    }

    fn create_sized(&self, path: &Path, size: u64) -> io::Result<()> {
        RealFs.create_sized(path, size)
    }

    fn copy_special(&self, src: &Path, dest_dir: &Path) -> io::Result<()> {
        RealFs.copy_special(src, dest_dir)
    }

    fn copy_tree(&self, src: &Path, dst: &Path) -> io::Result<()> {
        RealFs.copy_tree(src, dst)
    }

    fn remove_dir_all(&self, _path: &Path) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::PermissionDenied))
    }
}

/// Read `len` bytes of `path` starting at `offset`.
pub fn read_at(path: &Path, offset: u64, len: usize) -> Vec<u8> {
    let file = fs::File::open(path).unwrap();
    let mut buf = vec![0u8; len];
    file.read_exact_at(&mut buf, offset).unwrap();
    buf
}
