//! Preflight checks for build validation.
//!
//! Validates that the host system has required tools before building.
//! This prevents cryptic errors halfway through a long pipeline run.
//!
//! # Example
//!
//! ```rust
//! use image_builder::preflight::{command_exists, check_required_tools};
//!
//! // Check a single command
//! if !command_exists("sfdisk") {
//!     println!("util-linux not installed");
//! }
//!
//! // Check multiple tools
//! let tools = &[("mkfs.ext4", "e2fsprogs"), ("mcopy", "mtools")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Result};

use crate::config::ImageConfig;

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Required host tools for building disk images.
///
/// Each tuple is (command_name, package_name).
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("mkfs.ext4", "e2fsprogs"),
    ("mkfs.vfat", "dosfstools"),
    ("mcopy", "mtools"),
    ("sfdisk", "util-linux"),
];

/// Extra tools needed when the rootfs is produced by live-build.
pub const LIVE_BUILD_TOOLS: &[(&str, &str)] = &[("lb", "live-build"), ("dpkg", "dpkg")];

/// Tools a build with `config` needs.
pub fn required_tools(config: &ImageConfig) -> Vec<(&'static str, &'static str)> {
    let mut tools = REQUIRED_TOOLS.to_vec();
    if config.uses_live_build() {
        tools.extend_from_slice(LIVE_BUILD_TOOLS);
    }
    tools
}

/// Check that specific tools are available.
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err` with list of missing tools and their packages
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Check every tool a build with `config` needs.
pub fn check_host_tools(config: &ImageConfig) -> Result<()> {
    check_required_tools(&required_tools(config))
}
