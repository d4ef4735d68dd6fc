//! Descriptor loading.
//!
//! The descriptor is a TOML rendering of the [`Layout`] model:
//!
//! ```toml
//! [volumes.pc]
//! schema = "gpt"
//! bootloader = "grub"
//!
//! [[volumes.pc.structure]]
//! name = "mbr"
//! role = "mbr"
//! size = 440
//! content = [{ image = "pc-boot.img" }]
//! ```
//!
//! Volume order is the order the tables appear in the file.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

use super::model::{Layout, Volume};

pub fn load_layout(path: &Path) -> Result<Layout> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading layout descriptor '{}'", path.display()))?;
    parse_layout(&text).with_context(|| format!("parsing layout descriptor '{}'", path.display()))
}

pub fn parse_layout(text: &str) -> Result<Layout> {
    let mut doc: toml::Table = toml::from_str(text)?;
    let Some(volumes) = doc.remove("volumes") else {
        bail!("descriptor has no [volumes] table");
    };
    if let Some(key) = doc.keys().next() {
        bail!("unknown top-level key '{}'", key);
    }
    let toml::Value::Table(volumes) = volumes else {
        bail!("'volumes' must be a table");
    };
    if volumes.is_empty() {
        bail!("descriptor declares no volumes");
    }

    let mut layout = Layout::default();
    for (name, value) in volumes {
        let volume = value
            .try_into::<Volume>()
            .with_context(|| format!("invalid volume '{}'", name))?;
        if volume.structures.is_empty() {
            bail!("volume '{}' has no structures", name);
        }
        layout.volume_order.push(name.clone());
        layout.volumes.insert(name, volume);
    }
    Ok(layout)
}
