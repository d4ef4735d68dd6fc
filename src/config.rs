//! Build configuration.
//!
//! ```toml
//! layout = "gadget/layout.toml"
//! gadget_dir = "gadget"
//! boot_assets = "boot"
//! output_dir = "out"
//! hook_dirs = ["hooks"]
//!
//! [rootfs.live_build]
//! arch = "arm64"
//! extra_args = ["--mode", "ubuntu"]
//! env = { PROJECT = "ubuntu-cpc", SUITE = "noble" }
//! ```
//!
//! A prebuilt tree can stand in for live-build:
//!
//! ```toml
//! [rootfs.tree]
//! path = "rootfs"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::content::{DEFAULT_BLOCK_SIZE, DEFAULT_SECTOR_SIZE};

/// Resolved configuration. Every path is absolute or relative to the
/// process's working directory, never to the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub layout: PathBuf,
    pub gadget_dir: PathBuf,
    /// Per-family boot assets (`grub/`, `uboot/`, `lk/`, ...), unpacked to
    /// `<unpack>/image/boot`.
    pub boot_assets: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub hook_dirs: Vec<PathBuf>,
    pub block_size: u64,
    pub sector_size: u64,
    pub rootfs: RootfsSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootfsSource {
    /// Use an already populated tree.
    Tree(PathBuf),
    LiveBuild(LiveBuildConfig),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LiveBuildConfig {
    pub arch: String,
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Extra environment for both lb invocations.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub cross_build: bool,
}

fn default_true() -> bool {
    true
}

impl ImageConfig {
    /// A config using a prebuilt rootfs tree and default tunables.
    pub fn with_tree(layout: &Path, gadget_dir: &Path, rootfs: &Path, output_dir: &Path) -> Self {
        Self {
            layout: layout.to_path_buf(),
            gadget_dir: gadget_dir.to_path_buf(),
            boot_assets: None,
            output_dir: output_dir.to_path_buf(),
            hook_dirs: Vec::new(),
            block_size: DEFAULT_BLOCK_SIZE,
            sector_size: DEFAULT_SECTOR_SIZE,
            rootfs: RootfsSource::Tree(rootfs.to_path_buf()),
        }
    }

    pub fn uses_live_build(&self) -> bool {
        matches!(self.rootfs, RootfsSource::LiveBuild(_))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ImageConfigToml {
    layout: PathBuf,
    gadget_dir: PathBuf,
    boot_assets: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    #[serde(default)]
    hook_dirs: Vec<PathBuf>,
    block_size: Option<u64>,
    sector_size: Option<u64>,
    rootfs: RootfsToml,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RootfsToml {
    tree: Option<TreeToml>,
    live_build: Option<LiveBuildConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TreeToml {
    path: PathBuf,
}

pub fn load_config(path: &Path) -> Result<ImageConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading build config '{}'", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    parse_config(&text, base).with_context(|| format!("parsing build config '{}'", path.display()))
}

/// Parse `text`, resolving relative paths against `base`.
pub fn parse_config(text: &str, base: &Path) -> Result<ImageConfig> {
    let parsed: ImageConfigToml = toml::from_str(text)?;

    let rootfs = match (parsed.rootfs.tree, parsed.rootfs.live_build) {
        (Some(tree), None) => RootfsSource::Tree(resolve(base, &tree.path)),
        (None, Some(lb)) => {
            if lb.arch.trim().is_empty() {
                bail!("rootfs.live_build.arch must not be empty");
            }
            RootfsSource::LiveBuild(lb)
        }
        (Some(_), Some(_)) => bail!("rootfs: set either 'tree' or 'live_build', not both"),
        (None, None) => bail!("rootfs: one of 'tree' or 'live_build' is required"),
    };

    let block_size = parsed.block_size.unwrap_or(DEFAULT_BLOCK_SIZE);
    if block_size == 0 {
        bail!("block_size must be non-zero");
    }
    let sector_size = parsed.sector_size.unwrap_or(DEFAULT_SECTOR_SIZE);
    if sector_size == 0 || !sector_size.is_power_of_two() {
        bail!("sector_size must be a power of two, got {}", sector_size);
    }

    Ok(ImageConfig {
        layout: resolve(base, &parsed.layout),
        gadget_dir: resolve(base, &parsed.gadget_dir),
        boot_assets: parsed.boot_assets.as_deref().map(|p| resolve(base, p)),
        output_dir: resolve(
            base,
            parsed.output_dir.as_deref().unwrap_or_else(|| Path::new(".")),
        ),
        hook_dirs: parsed.hook_dirs.iter().map(|d| resolve(base, d)).collect(),
        block_size,
        sector_size,
        rootfs,
    })
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
