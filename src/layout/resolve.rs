//! Offset resolution, image sizing, rootfs measurement, and offset patching.

use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::Path;

use walkdir::WalkDir;

use super::model::{Layout, Structure, Volume};
use super::size::{iec, round_up};
use crate::error::{display, BuildError, IoContext, Result};

/// Block size used to measure the rootfs footprint (ext4 default).
pub const ROOTFS_BLOCK_SIZE: u64 = 4096;

/// Explicit offset of a structure, or 0 if it has none.
pub fn structure_offset(structure: &Structure) -> u64 {
    structure.offset.unwrap_or(0)
}

pub fn max_offset(a: u64, b: u64) -> u64 {
    if a > b {
        a
    } else {
        b
    }
}

impl Volume {
    /// Compute every structure's effective offset in declaration order.
    ///
    /// An explicit offset is kept as-is. Otherwise a structure starts where
    /// the previous one ended, or at 0 (or its role's fixed offset) when it
    /// is first. Overlapping regions are rejected.
    pub fn resolve_offsets(&mut self) -> Result<()> {
        let mut previous_end = 0u64;
        let mut previous_name: Option<String> = None;

        for (index, structure) in self.structures.iter_mut().enumerate() {
            let start = match (structure.offset, structure.role.and_then(|r| r.fixed_offset())) {
                (Some(explicit), Some(fixed)) if explicit != fixed => {
                    return Err(BuildError::Geometry(format!(
                        "structure '{}' must be at offset {} but declares offset {}",
                        structure.name, fixed, explicit
                    )));
                }
                (Some(explicit), _) => explicit,
                (None, Some(fixed)) if index == 0 => fixed,
                (None, Some(fixed)) => {
                    return Err(BuildError::Geometry(format!(
                        "structure '{}' must be the first structure (offset {})",
                        structure.name, fixed
                    )));
                }
                (None, None) => previous_end,
            };

            if start < previous_end {
                return Err(BuildError::Geometry(format!(
                    "structure '{}' at offset {} overlaps structure '{}' ending at {}",
                    structure.name,
                    start,
                    previous_name.as_deref().unwrap_or("<none>"),
                    previous_end
                )));
            }

            let end = start.checked_add(structure.size).ok_or_else(|| {
                BuildError::Geometry(format!(
                    "structure '{}' overflows: offset {} + size {}",
                    structure.name, start, structure.size
                ))
            })?;
            structure.effective_offset = Some(start);
            previous_end = end;
            previous_name = Some(structure.name.clone());
        }
        Ok(())
    }

    /// Bytes needed to hold every structure: max(effective offset + size).
    pub fn extent(&self) -> Result<u64> {
        let mut extent = 0u64;
        for structure in &self.structures {
            let start = structure.effective_offset.ok_or_else(not_initialized)?;
            extent = max_offset(extent, start + structure.size);
        }
        Ok(extent)
    }

    pub fn structure(&self, name: &str) -> Option<&Structure> {
        self.structures.iter().find(|s| s.name == name)
    }
}

impl Layout {
    pub fn resolve_offsets(&mut self) -> Result<()> {
        for (name, volume) in self.volumes.iter_mut() {
            volume.resolve_offsets().map_err(|e| match e {
                BuildError::Geometry(msg) => {
                    BuildError::Geometry(format!("volume '{}': {}", name, msg))
                }
                other => other,
            })?;
        }
        Ok(())
    }
}

fn not_initialized() -> BuildError {
    BuildError::Geometry("Cannot calculate image size before initializing the layout".into())
}

/// Size of the largest volume image the layout describes.
///
/// Fails if the layout is absent or has not been resolved yet.
pub fn calculate_image_size(layout: Option<&Layout>) -> Result<u64> {
    let layout = layout.ok_or_else(not_initialized)?;
    if !layout.is_resolved() {
        return Err(not_initialized());
    }
    let mut size = 0u64;
    for volume in layout.volumes.values() {
        size = max_offset(size, volume.extent()?);
    }
    Ok(size)
}

/// On-disk footprint of a populated rootfs tree.
///
/// Symlinks are not followed. Regular files are rounded up to whole
/// blocks; directories, symlinks, and special files cost one block each.
pub fn calculate_rootfs_size(rootfs: &Path) -> Result<u64> {
    let mut total = 0u64;
    for entry in WalkDir::new(rootfs).follow_links(false) {
        let entry = entry.map_err(|e| {
            let msg = e.to_string();
            BuildError::io(
                format!("Error measuring rootfs '{}'", display(rootfs)),
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other(msg)),
            )
        })?;
        let file_type = entry.file_type();
        if file_type.is_file() {
            let len = entry
                .metadata()
                .map_err(|e| {
                    BuildError::io(
                        format!("Error reading metadata of '{}'", entry.path().display()),
                        std::io::Error::other(e.to_string()),
                    )
                })?
                .len();
            total += round_up(len, ROOTFS_BLOCK_SIZE);
        } else {
            total += ROOTFS_BLOCK_SIZE;
        }
    }
    Ok(total)
}

/// Outcome of reconciling a declared rootfs size against the measured one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeBump {
    pub declared: u64,
    pub measured: u64,
}

impl SizeBump {
    pub fn warning(&self) -> String {
        format!(
            "WARNING: rootfs structure size {} smaller than actual rootfs contents {}",
            iec(self.declared),
            iec(self.measured)
        )
    }
}

/// Grow `structure` to `measured` if it was declared smaller. Sizes are
/// never shrunk.
pub fn reconcile_rootfs_size(structure: &mut Structure, measured: u64) -> Option<SizeBump> {
    if structure.size >= measured {
        return None;
    }
    let bump = SizeBump {
        declared: structure.size,
        measured,
    };
    structure.size = measured;
    Some(bump)
}

/// Patch a little-endian `u32` at byte `at` of an existing image.
///
/// The image is never grown: all four bytes must lie inside the current file.
pub fn patch_offset(image: &Path, at: u64, value: u32) -> Result<()> {
    let bytes = value.to_le_bytes();
    let file = OpenOptions::new()
        .write(true)
        .open(image)
        .io_context(|| format!("Failed to open image '{}'", display(image)))?;
    let len = file
        .metadata()
        .io_context(|| format!("Failed to stat image '{}'", display(image)))?
        .len();
    if at.checked_add(bytes.len() as u64).map_or(true, |end| end > len) {
        return Err(BuildError::Geometry(format!(
            "write offset beyond end of file: offset {} but '{}' is {} bytes",
            at,
            display(image),
            len
        )));
    }
    file.write_all_at(&bytes, at)
        .io_context(|| "Failed to write offset to disk")?;
    Ok(())
}

/// Write each structure's offset (in sectors) wherever its `offset_write`
/// points.
pub fn write_offset_values(volume: &Volume, image: &Path, sector_size: u64) -> Result<()> {
    if sector_size == 0 {
        return Err(BuildError::Geometry("sector size must be non-zero".into()));
    }
    for structure in &volume.structures {
        let Some(ref target) = structure.offset_write else {
            continue;
        };
        let base = match target.relative_to.as_deref() {
            None => 0,
            Some(name) => volume
                .structure(name)
                .and_then(|s| s.effective_offset)
                .ok_or_else(|| {
                    BuildError::Geometry(format!(
                        "offset-write of '{}' is relative to unknown structure '{}'",
                        structure.name, name
                    ))
                })?,
        };
        let start = structure.effective_offset.ok_or_else(not_initialized)?;
        let sectors = u32::try_from(start / sector_size).map_err(|_| {
            BuildError::Geometry(format!(
                "offset of '{}' does not fit in 32 bits of sectors",
                structure.name
            ))
        })?;
        let at = base.checked_add(target.offset).ok_or_else(|| {
            BuildError::Geometry(format!(
                "offset-write of '{}' overflows a 64-bit offset",
                structure.name
            ))
        })?;
        patch_offset(image, at, sectors)?;
    }
    Ok(())
}
