//! Per-structure content materialization.
//!
//! A structure without a filesystem is a raw region: its byte window in the
//! volume image is zeroed and then overwritten with its blob. A structure
//! with a filesystem is built in a separate staging image that is then
//! merged into the volume image at the structure's offset.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{BuildError, IoContext, Result};
use crate::host::{BlobCopier, BlobCopy, Host, MkfsRequest};
use crate::layout::{reconcile_rootfs_size, Volume, MIB};
use crate::output::Output;

/// Block size for zero-filling a region of the volume image, independent of
/// the tunable copy block size.
pub const ZERO_BLOCK_SIZE: u64 = MIB;

pub const DEFAULT_BLOCK_SIZE: u64 = MIB;

pub const DEFAULT_SECTOR_SIZE: u64 = 512;

/// Folds a built staging image back into its volume image.
pub trait StagingMerge {
    fn merge(
        &self,
        blobs: &dyn BlobCopier,
        staging: &Path,
        image: &Path,
        offset: u64,
        block_size: u64,
    ) -> io::Result<()>;
}

/// Copies the staging image byte for byte into the volume image.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteCopyMerge;

impl StagingMerge for ByteCopyMerge {
    fn merge(
        &self,
        blobs: &dyn BlobCopier,
        staging: &Path,
        image: &Path,
        offset: u64,
        block_size: u64,
    ) -> io::Result<()> {
        blobs.copy(&BlobCopy::file(staging, image, offset, block_size))
    }
}

/// Where one structure's inputs and outputs live.
#[derive(Debug, Clone, Copy)]
pub struct StructurePaths<'a> {
    /// Directory that becomes the root of the structure's filesystem.
    pub content_root: &'a Path,
    /// Image blobs are resolved against this directory.
    pub gadget_dir: &'a Path,
    /// Per-volume directory holding staging images.
    pub staging_dir: &'a Path,
    /// The volume image being assembled.
    pub image: &'a Path,
}

impl StructurePaths<'_> {
    pub fn staging_image(&self, index: usize) -> PathBuf {
        self.staging_dir.join(format!("part{}.img", index))
    }
}

pub struct ContentWriter<'h> {
    host: &'h Host,
    pub block_size: u64,
    pub sector_size: u64,
    /// Measured rootfs footprint the rootfs structure is reconciled against.
    pub rootfs_size: u64,
    merge: Box<dyn StagingMerge>,
}

impl<'h> ContentWriter<'h> {
    pub fn new(host: &'h Host) -> Self {
        Self {
            host,
            block_size: DEFAULT_BLOCK_SIZE,
            sector_size: DEFAULT_SECTOR_SIZE,
            rootfs_size: 0,
            merge: Box::new(ByteCopyMerge),
        }
    }

    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_sector_size(mut self, sector_size: u64) -> Self {
        self.sector_size = sector_size;
        self
    }

    pub fn with_rootfs_size(mut self, rootfs_size: u64) -> Self {
        self.rootfs_size = rootfs_size;
        self
    }

    pub fn with_merge(mut self, merge: impl StagingMerge + 'static) -> Self {
        self.merge = Box::new(merge);
        self
    }

    /// Materialize structure `index` of `volume` into `paths.image`.
    ///
    /// For the rootfs structure this may grow its recorded size, in which
    /// case the volume's offsets are resolved again.
    pub fn copy_structure_content(
        &self,
        volume: &mut Volume,
        index: usize,
        paths: &StructurePaths<'_>,
        output: &mut Output,
    ) -> Result<()> {
        let Some(structure) = volume.structures.get(index) else {
            return Err(BuildError::Geometry(format!(
                "structure index {} out of range ({} structures)",
                index,
                volume.structures.len()
            )));
        };
        if structure.filesystem.is_none() {
            self.copy_raw(volume, index, paths)
        } else {
            self.build_filesystem(volume, index, paths, output)
        }
    }

    /// Grow the volume's rootfs structure to the measured rootfs size if it
    /// was declared smaller, warning about it. Returns whether it grew.
    pub fn reconcile_rootfs(&self, volume: &mut Volume, output: &mut Output) -> Result<bool> {
        let Some(structure) = volume.structures.iter_mut().find(|s| s.is_rootfs()) else {
            return Ok(false);
        };
        let Some(bump) = reconcile_rootfs_size(structure, self.rootfs_size) else {
            return Ok(false);
        };
        output.warn(bump.warning());
        volume.resolve_offsets()?;
        Ok(true)
    }

    fn copy_raw(&self, volume: &Volume, index: usize, paths: &StructurePaths<'_>) -> Result<()> {
        let structure = &volume.structures[index];
        let offset = effective_offset(volume, index)?;

        self.host
            .blobs
            .copy(&BlobCopy::zeros(
                paths.image,
                offset,
                structure.size,
                ZERO_BLOCK_SIZE,
            ))
            .io_context(|| format!("Error zeroing partition '{}'", structure.name))?;

        let Some(blob) = structure.image_content() else {
            return Ok(());
        };
        let source = paths.gadget_dir.join(blob);
        let blob_len = fs::metadata(&source)
            .io_context(|| format!("Error copying image blob '{}'", source.display()))?
            .len();
        if blob_len > structure.size {
            return Err(BuildError::Geometry(format!(
                "image blob '{}' ({} bytes) does not fit structure '{}' ({} bytes)",
                source.display(),
                blob_len,
                structure.name,
                structure.size
            )));
        }
        self.host
            .blobs
            .copy(&BlobCopy::file(&source, paths.image, offset, self.block_size))
            .io_context(|| format!("Error copying image blob '{}'", source.display()))
    }

    fn build_filesystem(
        &self,
        volume: &mut Volume,
        index: usize,
        paths: &StructurePaths<'_>,
        output: &mut Output,
    ) -> Result<()> {
        if volume.structures[index].is_rootfs() {
            self.reconcile_rootfs(volume, output)?;
        }

        let structure = &volume.structures[index];
        let Some(kind) = structure.filesystem else {
            return Err(BuildError::Geometry(format!(
                "structure '{}' has no filesystem",
                structure.name
            )));
        };
        let offset = effective_offset(volume, index)?;
        let staging = paths.staging_image(index);

        if structure.size > 0 {
            self.host
                .fs
                .create_sized(&staging, structure.size)
                .io_context(|| format!("Error zeroing image file '{}'", staging.display()))?;
        }

        let request = MkfsRequest {
            kind,
            image: &staging,
            label: structure.label.as_deref(),
            content_root: paths.content_root,
            size: structure.size,
            sector_size: self.sector_size,
        };
        self.host
            .mkfs
            .make_with_content(&request, self.host.runner.as_ref())
            .map_err(|e| BuildError::FilesystemBuild(format!("{}: {}", structure.name, e)))?;

        self.merge
            .merge(
                self.host.blobs.as_ref(),
                &staging,
                paths.image,
                offset,
                self.block_size,
            )
            .io_context(|| {
                format!(
                    "Error merging staging image '{}' into '{}'",
                    staging.display(),
                    paths.image.display()
                )
            })?;
        tracing::debug!(structure = %structure.name, %kind, offset, "filesystem structure written");
        Ok(())
    }
}

fn effective_offset(volume: &Volume, index: usize) -> Result<u64> {
    let structure = &volume.structures[index];
    structure.effective_offset.ok_or_else(|| {
        BuildError::Geometry(format!(
            "offset of structure '{}' has not been resolved",
            structure.name
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Content, FilesystemKind, Role, Structure};
    use crate::testutil::{FailingCopier, FailingFs, FailingMkfs, FsOp, MarkerMkfs};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        gadget: PathBuf,
        staging: PathBuf,
        content: PathBuf,
        image: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let gadget = temp.path().join("gadget");
            let staging = temp.path().join("volumes/pc");
            let content = temp.path().join("content");
            fs::create_dir_all(&gadget).unwrap();
            fs::create_dir_all(&staging).unwrap();
            fs::create_dir_all(&content).unwrap();
            let image = temp.path().join("pc.img");
            fs::write(&image, b"").unwrap();
            Self {
                _temp: temp,
                gadget,
                staging,
                content,
                image,
            }
        }

        fn paths(&self) -> StructurePaths<'_> {
            StructurePaths {
                content_root: &self.content,
                gadget_dir: &self.gadget,
                staging_dir: &self.staging,
                image: &self.image,
            }
        }
    }

    fn pc_volume() -> Volume {
        let mut mbr = Structure::new("mbr", 440);
        mbr.role = Some(Role::Mbr);
        mbr.offset = Some(0);

        let mut efi = Structure::new("EFI System", 0);
        efi.filesystem = Some(FilesystemKind::Vfat);
        efi.role = Some(Role::SystemBoot);

        let mut volume = Volume {
            structures: vec![mbr, efi],
            ..Default::default()
        };
        volume.resolve_offsets().unwrap();
        volume
    }

    #[test]
    fn test_failed_copy_structure_content_mbr_zeroing() {
        let fx = Fixture::new();
        let mut volume = pc_volume();
        let host = Host::system().with_blobs(FailingCopier::always());
        let (mut out, _) = Output::buffer();

        let err = ContentWriter::new(&host)
            .copy_structure_content(&mut volume, 0, &fx.paths(), &mut out)
            .unwrap_err();
        assert!(err.to_string().contains("Error zeroing partition"), "{}", err);
    }

    #[test]
    fn test_failed_copy_structure_content_efi_mkfs() {
        let fx = Fixture::new();
        let mut volume = pc_volume();
        let host = Host::system().with_mkfs(FailingMkfs);
        let (mut out, _) = Output::buffer();

        let err = ContentWriter::new(&host)
            .copy_structure_content(&mut volume, 1, &fx.paths(), &mut out)
            .unwrap_err();
        assert!(matches!(err, BuildError::FilesystemBuild(_)));
        assert!(err.to_string().contains("Error running mkfs"));
    }

    #[test]
    fn test_failed_copy_structure_content_efi_zeroing() {
        let fx = Fixture::new();
        let mut volume = pc_volume();
        volume.structures[1].size = MIB;
        let host = Host::system().with_fs(FailingFs::on(FsOp::CreateSized));
        let (mut out, _) = Output::buffer();

        let err = ContentWriter::new(&host)
            .copy_structure_content(&mut volume, 1, &fx.paths(), &mut out)
            .unwrap_err();
        assert!(err.to_string().contains("Error zeroing image file"), "{}", err);
    }

    #[test]
    fn test_failed_copy_structure_content_blob_copy() {
        let fx = Fixture::new();
        fs::write(fx.gadget.join("pc-boot.img"), vec![0xEB; 440]).unwrap();
        let mut volume = pc_volume();
        volume.structures[0].content = vec![Content::Image {
            image: PathBuf::from("pc-boot.img"),
        }];
        // Zeroing succeeds, the blob copy is the second call.
        let host = Host::system().with_blobs(FailingCopier::after(1));
        let (mut out, _) = Output::buffer();

        let err = ContentWriter::new(&host)
            .copy_structure_content(&mut volume, 0, &fx.paths(), &mut out)
            .unwrap_err();
        assert!(err.to_string().contains("Error copying image blob"), "{}", err);
    }

    #[test]
    fn test_raw_region_copies_blob_at_offset() {
        let fx = Fixture::new();
        fs::write(fx.gadget.join("pc-boot.img"), vec![0xEB; 440]).unwrap();
        fs::write(&fx.image, vec![0xFF; 1024]).unwrap();
        let mut mbr = Structure::new("mbr", 440);
        mbr.content = vec![Content::Image {
            image: PathBuf::from("pc-boot.img"),
        }];
        let mut raw = Structure::new("raw", 100);
        raw.offset = Some(512);
        let mut volume = Volume {
            structures: vec![mbr, raw],
            ..Default::default()
        };
        volume.resolve_offsets().unwrap();
        let host = Host::system();
        let (mut out, _) = Output::buffer();
        let writer = ContentWriter::new(&host);

        writer
            .copy_structure_content(&mut volume, 0, &fx.paths(), &mut out)
            .unwrap();
        writer
            .copy_structure_content(&mut volume, 1, &fx.paths(), &mut out)
            .unwrap();

        let bytes = fs::read(&fx.image).unwrap();
        assert_eq!(bytes.len(), 1024);
        assert!(bytes[..440].iter().all(|&b| b == 0xEB));
        assert!(bytes[440..512].iter().all(|&b| b == 0xFF));
        assert!(bytes[512..612].iter().all(|&b| b == 0));
        assert!(bytes[612..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_raw_region_rejects_oversized_blob() {
        let fx = Fixture::new();
        fs::write(fx.gadget.join("big.img"), vec![1u8; 1000]).unwrap();
        let mut blob = Structure::new("blob", 16);
        blob.content = vec![Content::Image {
            image: PathBuf::from("big.img"),
        }];
        let mut volume = Volume {
            structures: vec![blob],
            ..Default::default()
        };
        volume.resolve_offsets().unwrap();
        let host = Host::system();
        let (mut out, _) = Output::buffer();

        let err = ContentWriter::new(&host)
            .copy_structure_content(&mut volume, 0, &fx.paths(), &mut out)
            .unwrap_err();
        assert!(matches!(err, BuildError::Geometry(_)));
    }

    #[test]
    fn test_rootfs_size_bump_warns_and_grows() {
        let fx = Fixture::new();
        let mut rootfs = Structure::new("writable", 0);
        rootfs.role = Some(Role::SystemData);
        rootfs.filesystem = Some(FilesystemKind::Ext4);
        let mut volume = Volume {
            structures: vec![rootfs],
            ..Default::default()
        };
        volume.resolve_offsets().unwrap();
        let host = Host::system().with_mkfs(MarkerMkfs);
        let (mut out, buf) = Output::buffer();

        ContentWriter::new(&host)
            .with_rootfs_size(8 * MIB)
            .copy_structure_content(&mut volume, 0, &fx.paths(), &mut out)
            .unwrap();

        assert_eq!(volume.structures[0].size, 8 * MIB);
        assert!(buf
            .contents()
            .contains("WARNING: rootfs structure size 0 B smaller than actual rootfs contents 8 MiB"));
        assert!(fx.staging.join("part0.img").exists());
    }

    #[test]
    fn test_rootfs_declared_large_enough_is_untouched() {
        let fx = Fixture::new();
        let mut rootfs = Structure::new("writable", 16 * MIB);
        rootfs.role = Some(Role::SystemData);
        rootfs.filesystem = Some(FilesystemKind::Ext4);
        let mut volume = Volume {
            structures: vec![rootfs],
            ..Default::default()
        };
        volume.resolve_offsets().unwrap();
        let host = Host::system().with_mkfs(MarkerMkfs);
        let (mut out, buf) = Output::buffer();

        ContentWriter::new(&host)
            .with_rootfs_size(8 * MIB)
            .copy_structure_content(&mut volume, 0, &fx.paths(), &mut out)
            .unwrap();

        assert_eq!(volume.structures[0].size, 16 * MIB);
        assert!(!buf.contents().contains("WARNING"));
    }

    #[test]
    fn test_filesystem_region_is_merged_at_offset() {
        let fx = Fixture::new();
        let mut efi = Structure::new("EFI System", 4096);
        efi.offset = Some(8192);
        efi.filesystem = Some(FilesystemKind::Vfat);
        let mut volume = Volume {
            structures: vec![efi],
            ..Default::default()
        };
        volume.resolve_offsets().unwrap();
        let host = Host::system().with_mkfs(MarkerMkfs);
        let (mut out, _) = Output::buffer();

        ContentWriter::new(&host)
            .copy_structure_content(&mut volume, 0, &fx.paths(), &mut out)
            .unwrap();

        let bytes = fs::read(&fx.image).unwrap();
        assert_eq!(bytes.len(), 8192 + 4096);
        assert_eq!(&bytes[8192..8192 + MarkerMkfs::MARKER.len()], MarkerMkfs::MARKER);
    }

    #[test]
    fn test_stale_staging_image_is_reset() {
        let fx = Fixture::new();
        fs::write(fx.staging.join("part0.img"), vec![0xAA; 8192]).unwrap();
        let mut efi = Structure::new("EFI System", 4096);
        efi.filesystem = Some(FilesystemKind::Vfat);
        let mut volume = Volume {
            structures: vec![efi],
            ..Default::default()
        };
        volume.resolve_offsets().unwrap();
        let host = Host::system().with_mkfs(MarkerMkfs);
        let (mut out, _) = Output::buffer();

        ContentWriter::new(&host)
            .copy_structure_content(&mut volume, 0, &fx.paths(), &mut out)
            .unwrap();

        let staging = fs::read(fx.staging.join("part0.img")).unwrap();
        assert_eq!(staging.len(), 4096);
        assert!(staging[MarkerMkfs::MARKER.len()..].iter().all(|&b| b == 0));
    }
}
