//! Device layout: the Volumes → Structures model and the geometry rules
//! applied to it.
//!
//! - [`model`] - volumes, structures, roles, content
//! - [`resolve`] - offsets, image sizes, rootfs measurement, offset patching
//! - [`size`] - byte units and IEC rendering
//! - [`table`] - MBR/GPT partition tables via sfdisk
//! - [`loader`] - TOML descriptor loading

pub mod loader;
pub mod model;
pub mod resolve;
pub mod size;
pub mod table;

pub use loader::load_layout;
pub use model::{Content, FilesystemKind, Layout, OffsetWrite, Role, Schema, Structure, Volume};
pub use resolve::{
    calculate_image_size, calculate_rootfs_size, max_offset, patch_offset, reconcile_rootfs_size,
    structure_offset, write_offset_values, SizeBump,
};
pub use size::{iec, round_up, GIB, KIB, MIB};
pub use table::{partition_table_script, volume_image_size, write_partition_table};
