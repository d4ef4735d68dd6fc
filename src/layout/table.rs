//! Partition tables.
//!
//! Volumes with a schema get an MBR or GPT table written by `sfdisk`, fed a
//! script on stdin. Every structure that [`Structure::is_partition`] becomes
//! one entry at its effective offset.

use std::path::Path;

use super::model::{FilesystemKind, Role, Schema, Structure, Volume};
use super::size::round_up;
use crate::error::{BuildError, IoContext, Result};
use crate::host::Host;
use crate::process::Cmd;

/// Sectors GPT keeps at the end of the disk for the backup header and
/// partition entries.
const GPT_BACKUP_SECTORS: u64 = 33;

/// Bytes a volume image needs: its extent, rounded to whole sectors, plus
/// room for the backup GPT.
pub fn volume_image_size(volume: &Volume, sector_size: u64) -> Result<u64> {
    let extent = round_up(volume.extent()?, sector_size);
    let tail = match volume.schema {
        Some(Schema::Gpt) => GPT_BACKUP_SECTORS * sector_size,
        _ => 0,
    };
    Ok(extent + tail)
}

/// The `sfdisk` input describing `volume`, or `None` for schemaless volumes.
pub fn partition_table_script(volume: &Volume, sector_size: u64) -> Result<Option<String>> {
    let Some(schema) = volume.schema else {
        return Ok(None);
    };
    let label = match schema {
        Schema::Mbr => "dos",
        Schema::Gpt => "gpt",
    };

    let mut script = format!(
        "label: {}\nunit: sectors\nsector-size: {}\n\n",
        label, sector_size
    );
    for structure in volume.structures.iter().filter(|s| s.is_partition()) {
        let offset = structure.effective_offset.ok_or_else(|| {
            BuildError::Geometry(format!(
                "offset of structure '{}' has not been resolved",
                structure.name
            ))
        })?;
        if structure.size == 0 {
            return Err(BuildError::Geometry(format!(
                "partition '{}' has no size",
                structure.name
            )));
        }
        if offset % sector_size != 0 || structure.size % sector_size != 0 {
            return Err(BuildError::Geometry(format!(
                "partition '{}' is not aligned to {}-byte sectors",
                structure.name, sector_size
            )));
        }

        let mut entry = format!(
            "start={}, size={}, type={}",
            offset / sector_size,
            structure.size / sector_size,
            partition_type(structure, schema)
        );
        match schema {
            Schema::Gpt => entry.push_str(&format!(", name=\"{}\"", structure.name)),
            Schema::Mbr if structure.has_role(Role::SystemBoot) => entry.push_str(", bootable"),
            Schema::Mbr => {}
        }
        script.push_str(&entry);
        script.push('\n');
    }
    Ok(Some(script))
}

/// Type code for one entry. A declared `mbr,gpt` pair such as
/// `EF,C12A7328-F81F-11D2-BA4B-00A0C93EC93B` is split by schema; without a
/// declared type the filesystem picks an sfdisk alias.
fn partition_type(structure: &Structure, schema: Schema) -> String {
    if let Some(declared) = structure.partition_type.as_deref() {
        return match (declared.split_once(','), schema) {
            (Some((mbr, _)), Schema::Mbr) => mbr.trim().to_string(),
            (Some((_, gpt)), Schema::Gpt) => gpt.trim().to_string(),
            (None, _) => declared.trim().to_string(),
        };
    }
    match structure.filesystem {
        Some(FilesystemKind::Vfat) => "U".to_string(),
        _ => "L".to_string(),
    }
}

/// Write `volume`'s partition table into `image`.
pub fn write_partition_table(
    host: &Host,
    volume: &Volume,
    image: &Path,
    sector_size: u64,
) -> Result<()> {
    let Some(script) = partition_table_script(volume, sector_size)? else {
        return Ok(());
    };
    let cmd = Cmd::new("sfdisk")
        .args(["--quiet", "--no-reread", "--no-tell-kernel"])
        .arg_path(image)
        .stdin(script);
    let output = host
        .runner
        .run(&cmd)
        .io_context(|| "Failed to run sfdisk")?;
    if !output.success() {
        return Err(BuildError::tool(
            format!("sfdisk failed to create partition table on '{}'", image.display()),
            output.failure_summary(),
        ));
    }
    Ok(())
}
