//! The resumable build pipeline.
//!
//! A run executes a contiguous slice of the step registry against one
//! [`BuildContext`](crate::context::BuildContext):
//!
//! ```text
//!  make_temporary_directories → load_layout → prepare_gadget_tree
//!    → build_rootfs → populate_rootfs_contents → calculate_rootfs_size
//!    → populate_bootfs_contents → populate_prepare_partitions
//!    → make_disk → finish
//! ```
//!
//! `until` stops before a step, `thru` stops after it, and `resume` picks up
//! after the last completed step recorded in the work directory's
//! checkpoint. A run that stops without failing always leaves a checkpoint
//! behind; a failed step never overwrites it.
//!
//! Runs are strictly sequential. Two runs sharing one work directory are
//! not supported.

mod engine;
pub mod registry;
pub mod state;
pub mod steps;

pub use engine::Pipeline;
pub use registry::{Step, STEPS};
pub use state::{RunOptions, RunPlan, RunState, Stop};

use crate::context::BuildContext;
use crate::host::Host;
use crate::output::Output;

/// What a step gets to work with.
pub struct StepContext<'a> {
    pub host: &'a Host,
    pub output: &'a mut Output,
    pub build: &'a mut BuildContext,
    pub debug: bool,
}
