//! State threaded through the pipeline steps.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::ImageConfig;
use crate::layout::Layout;

/// Named subdirectories of the work directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempDirs {
    /// Gadget tree and unpacked boot assets.
    pub unpack: PathBuf,
    /// The populated root filesystem.
    pub rootfs: PathBuf,
    /// Per-volume staging images, content roots, and volume images.
    pub volumes: PathBuf,
    /// live-build's working root.
    pub chroot: PathBuf,
}

impl TempDirs {
    pub fn under(work_dir: &Path) -> Self {
        Self {
            unpack: work_dir.join("unpack"),
            rootfs: work_dir.join("root"),
            volumes: work_dir.join("volumes"),
            chroot: work_dir.join("chroot"),
        }
    }

    pub fn all(&self) -> [&Path; 4] {
        [&self.unpack, &self.rootfs, &self.volumes, &self.chroot]
    }

    pub fn gadget(&self) -> PathBuf {
        self.unpack.join("gadget")
    }

    pub fn volume_dir(&self, volume: &str) -> PathBuf {
        self.volumes.join(volume)
    }

    /// Content root for a non-rootfs filesystem structure.
    pub fn structure_root(&self, volume: &str, index: usize) -> PathBuf {
        self.volume_dir(volume).join(format!("part{}", index))
    }

    pub fn volume_image(&self, volume: &str) -> PathBuf {
        self.volumes.join(format!("{}.img", volume))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContext {
    pub work_dir: PathBuf,
    pub dirs: TempDirs,
    pub config: ImageConfig,
    pub layout: Option<Layout>,
    /// Tree produced by the rootfs build, before it is copied into place.
    pub built_tree: Option<PathBuf>,
    /// Measured rootfs footprint plus headroom.
    pub rootfs_size: u64,
    /// Volume name to image size in bytes.
    pub image_sizes: BTreeMap<String, u64>,
    /// Volume name to image path; rewritten when images are published.
    pub images: BTreeMap<String, PathBuf>,
}

impl BuildContext {
    pub fn new(work_dir: &Path, config: ImageConfig) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            dirs: TempDirs::under(work_dir),
            config,
            layout: None,
            built_tree: None,
            rootfs_size: 0,
            image_sizes: BTreeMap::new(),
            images: BTreeMap::new(),
        }
    }
}
