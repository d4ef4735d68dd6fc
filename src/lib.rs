//! Resumable builder for bootable disk images.
//!
//! An image is described by a volume layout (structures, roles, offsets,
//! filesystems and content) plus a root filesystem, either an existing
//! tree or one produced by live-build. The crate turns the two into one
//! raw image per volume:
//!
//! - **Layout** - Loading, offset resolution, sizing and partition tables
//! - **Content** - Raw blobs, filesystem structures and offset patching
//! - **Pipeline** - Ten named steps with pause, resume and checkpoints
//! - **Host** - Injected filesystem, process, blob-copy and mkfs primitives
//! - **Preflight checks** - Host tool validation before builds
//!
//! # Architecture
//!
//! ```text
//! image-builder (binary)
//!     │
//!     ├── Loads: ImageConfig (TOML)
//!     ├── Checks: preflight tools
//!     └── Drives: Pipeline
//!                    │
//!                    ├── registry: STEPS, in order
//!                    ├── steps ──► layout / content / bootloader / hooks / livebuild
//!                    ├── checkpoint: <work_dir>/image-builder.state.json
//!                    └── host: fs, runner, blobs, mkfs
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use image_builder::{Host, ImageConfig, Output, Pipeline, RunOptions};
//!
//! let config = ImageConfig::with_tree(
//!     "gadget/layout.toml".as_ref(),
//!     "gadget".as_ref(),
//!     "rootfs".as_ref(),
//!     "out".as_ref(),
//! );
//! let options = RunOptions {
//!     until: Some("make_disk".into()),
//!     work_dir: Some("work".into()),
//!     ..Default::default()
//! };
//! let mut pipeline = Pipeline::new(options, config, Host::system(), Output::stdout());
//! pipeline.execute()?;
//! ```

pub mod bootloader;
pub mod checkpoint;
pub mod config;
pub mod content;
pub mod context;
pub mod error;
pub mod hooks;
pub mod host;
pub mod layout;
pub mod livebuild;
pub mod output;
pub mod pipeline;
pub mod preflight;
pub mod process;

#[cfg(test)]
mod testutil;

pub use config::{load_config, ImageConfig, RootfsSource};
pub use context::BuildContext;
pub use error::{BuildError, Result};
pub use host::Host;
pub use output::Output;
pub use pipeline::{Pipeline, RunOptions, RunState};
