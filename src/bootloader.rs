//! Bootloader-family file placement.
//!
//! Earlier steps unpack boot assets under `<unpack>/image/boot/<family>`.
//! Each family then needs those files somewhere specific: inside the boot
//! structure for the secure-boot capable loaders, or in the gadget
//! directory (as raw partition content) for lk.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IoContext, Result};
use crate::host::Host;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bootloader {
    #[serde(rename = "grub")]
    Grub,
    #[serde(rename = "u-boot")]
    UBoot,
    #[serde(rename = "piboot")]
    PiBoot,
    #[serde(rename = "lk")]
    Lk,
    #[serde(rename = "android-boot")]
    AndroidBoot,
}

/// Where a secure-boot capable loader's assets come from and go to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureBootLayout {
    /// Relative to `<unpack>/image`.
    pub source: PathBuf,
    /// Relative to the boot structure's content root.
    pub target: PathBuf,
}

impl Bootloader {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grub => "grub",
            Self::UBoot => "u-boot",
            Self::PiBoot => "piboot",
            Self::Lk => "lk",
            Self::AndroidBoot => "android-boot",
        }
    }

    pub fn secure_boot_layout(&self) -> Option<SecureBootLayout> {
        match self {
            Self::Grub => Some(SecureBootLayout {
                source: PathBuf::from("boot/grub"),
                target: PathBuf::from("EFI/ubuntu"),
            }),
            Self::UBoot => Some(SecureBootLayout {
                source: PathBuf::from("boot/uboot"),
                target: PathBuf::new(),
            }),
            Self::PiBoot => Some(SecureBootLayout {
                source: PathBuf::from("boot/piboot"),
                target: PathBuf::new(),
            }),
            Self::Lk | Self::AndroidBoot => None,
        }
    }

    /// Directory the family's assets are unpacked into.
    pub fn asset_dir(&self, unpack_dir: &Path) -> PathBuf {
        match self {
            Self::Lk => unpack_dir.join("image/boot/lk"),
            Self::AndroidBoot => unpack_dir.join("image/boot/android"),
            other => match other.secure_boot_layout() {
                Some(layout) => unpack_dir.join("image").join(layout.source),
                None => unpack_dir.join("image/boot"),
            },
        }
    }
}

impl fmt::Display for Bootloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run the placement for `bootloader`.
///
/// `boot_target` is the content root of the volume's boot structure; it is
/// only needed by the secure-boot capable families.
pub fn prepare_bootloader(
    host: &Host,
    bootloader: Bootloader,
    unpack_dir: &Path,
    boot_target: Option<&Path>,
) -> Result<()> {
    match bootloader {
        Bootloader::Grub | Bootloader::UBoot | Bootloader::PiBoot => match boot_target {
            Some(target) => handle_secure_boot(host, bootloader, unpack_dir, target),
            None => {
                tracing::debug!(%bootloader, "volume has no boot structure; skipping asset move");
                Ok(())
            }
        },
        Bootloader::Lk => handle_lk_bootloader(host, bootloader, unpack_dir),
        Bootloader::AndroidBoot => Ok(()),
    }
}

/// Move the unpacked boot assets into the boot structure's content root.
pub fn handle_secure_boot(
    host: &Host,
    bootloader: Bootloader,
    unpack_dir: &Path,
    target_dir: &Path,
) -> Result<()> {
    let Some(layout) = bootloader.secure_boot_layout() else {
        return Ok(());
    };
    let boot_dir = unpack_dir.join("image").join(&layout.source);
    let ubuntu_dir = target_dir.join(&layout.target);

    host.fs
        .create_dir_all(&ubuntu_dir)
        .io_context(|| format!("Error creating ubuntu dir '{}'", ubuntu_dir.display()))?;

    let entries = host
        .fs
        .read_dir(&boot_dir)
        .io_context(|| format!("Error reading boot dir '{}'", boot_dir.display()))?;

    for entry in entries {
        let dest = ubuntu_dir.join(&entry.name);
        host.fs
            .rename(&entry.path, &dest)
            .io_context(|| format!("Error copying boot dir entry '{}'", entry.path.display()))?;
    }
    tracing::debug!(%bootloader, target = %ubuntu_dir.display(), "moved boot assets");
    Ok(())
}

/// Copy lk assets into the gadget directory so structures can use them as
/// raw content.
pub fn handle_lk_bootloader(host: &Host, bootloader: Bootloader, unpack_dir: &Path) -> Result<()> {
    if bootloader != Bootloader::Lk {
        return Ok(());
    }
    let gadget_dir = unpack_dir.join("gadget");
    match host.fs.create_dir(&gadget_dir) {
        Ok(()) => {}
        // A previous partial run may have created it already.
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => {
            return Err(e).io_context(|| {
                format!("Failed to create gadget dir '{}'", gadget_dir.display())
            })
        }
    }

    let boot_dir = bootloader.asset_dir(unpack_dir);
    let entries = host
        .fs
        .read_dir(&boot_dir)
        .io_context(|| format!("Error reading lk bootloader dir '{}'", boot_dir.display()))?;

    for entry in entries {
        host.fs.copy_special(&entry.path, &gadget_dir).io_context(|| {
            format!("Error copying lk bootloader dir entry '{}'", entry.path.display())
        })?;
    }
    Ok(())
}
