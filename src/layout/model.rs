//! Volumes → Structures model.
//!
//! The descriptor parser hands us this model; we re-validate geometry
//! ourselves in [`super::resolve`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::bootloader::Bootloader;

/// The whole device layout: named volumes in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub volumes: BTreeMap<String, Volume>,
    /// Volume names in declaration order (BTreeMap iteration is alphabetical).
    pub volume_order: Vec<String>,
}

impl Layout {
    pub fn volume(&self, name: &str) -> Option<&Volume> {
        self.volumes.get(name)
    }

    /// Volumes in declaration order.
    pub fn ordered(&self) -> impl Iterator<Item = (&str, &Volume)> {
        self.volume_order
            .iter()
            .filter_map(|name| self.volumes.get(name).map(|v| (name.as_str(), v)))
    }

    /// True once every structure of every volume has an effective offset.
    pub fn is_resolved(&self) -> bool {
        self.volumes
            .values()
            .all(|v| v.structures.iter().all(|s| s.effective_offset.is_some()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schema {
    Mbr,
    Gpt,
}

impl Schema {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mbr => "mbr",
            Self::Gpt => "gpt",
        }
    }
}

/// One disk image target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Volume {
    #[serde(default)]
    pub schema: Option<Schema>,
    #[serde(default)]
    pub bootloader: Option<Bootloader>,
    #[serde(default, rename = "structure")]
    pub structures: Vec<Structure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Boot sector code; pinned to the start of the disk.
    Mbr,
    SystemBoot,
    /// The root-filesystem region.
    SystemData,
    SystemSeed,
}

impl Role {
    /// Offset the role pins its structure to, if any.
    pub fn fixed_offset(&self) -> Option<u64> {
        match self {
            Self::Mbr => Some(0),
            _ => None,
        }
    }

    /// Roles whose content root is the populated rootfs.
    pub fn uses_rootfs(&self) -> bool {
        matches!(self, Self::SystemData | Self::SystemSeed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilesystemKind {
    Ext4,
    Vfat,
}

impl FilesystemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ext4 => "ext4",
            Self::Vfat => "vfat",
        }
    }
}

impl fmt::Display for FilesystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content placed into a structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// A raw blob, relative to the gadget directory.
    Image { image: PathBuf },
    /// A file or directory from the gadget directory, copied to `target`
    /// inside the structure's filesystem.
    Tree { source: PathBuf, target: PathBuf },
}

/// Location patched with a structure's offset once the image exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OffsetWrite {
    /// Name of the structure `offset` is relative to; absolute if unset.
    #[serde(default)]
    pub relative_to: Option<String>,
    pub offset: u64,
}

/// One partition or raw region of a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Structure {
    pub name: String,
    #[serde(default)]
    pub role: Option<Role>,
    /// Explicit byte offset from the start of the volume.
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub offset_write: Option<OffsetWrite>,
    #[serde(default)]
    pub size: u64,
    /// Absent for raw regions.
    #[serde(default)]
    pub filesystem: Option<FilesystemKind>,
    #[serde(default)]
    pub label: Option<String>,
    /// Partition type code (`83`, `EF`, or a GPT type GUID); raw regions
    /// without one are not listed in the partition table.
    #[serde(default, rename = "type")]
    pub partition_type: Option<String>,
    #[serde(default)]
    pub content: Vec<Content>,
    /// Computed by offset resolution; overwritten whenever it runs.
    #[serde(default)]
    pub effective_offset: Option<u64>,
}

impl Structure {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            role: None,
            offset: None,
            offset_write: None,
            size,
            filesystem: None,
            label: None,
            partition_type: None,
            content: Vec::new(),
            effective_offset: None,
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.role == Some(role)
    }

    pub fn is_rootfs(&self) -> bool {
        self.has_role(Role::SystemData)
    }

    /// Listed in the partition table: has a filesystem or a type code, and
    /// is not the boot sector.
    pub fn is_partition(&self) -> bool {
        !self.has_role(Role::Mbr) && (self.filesystem.is_some() || self.partition_type.is_some())
    }

    /// First blob listed in the structure's content, if any.
    pub fn image_content(&self) -> Option<&PathBuf> {
        self.content.iter().find_map(|c| match c {
            Content::Image { image } => Some(image),
            Content::Tree { .. } => None,
        })
    }

    pub fn tree_content(&self) -> impl Iterator<Item = (&PathBuf, &PathBuf)> {
        self.content.iter().filter_map(|c| match c {
            Content::Tree { source, target } => Some((source, target)),
            Content::Image { .. } => None,
        })
    }
}
