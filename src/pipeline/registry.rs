//! The ordered step registry.

use super::steps;
use super::StepContext;
use crate::error::Result;

pub type StepFn = fn(&mut StepContext<'_>) -> Result<()>;

/// One named unit of pipeline work.
#[derive(Clone, Copy)]
pub struct Step {
    pub name: &'static str,
    pub run: StepFn,
}

impl Step {
    /// Run the step. In debug mode its 1-based index and name are printed
    /// first, whether or not it then succeeds.
    pub fn invoke(&self, index: usize, cx: &mut StepContext<'_>) -> Result<()> {
        if cx.debug {
            cx.output.step(index + 1, self.name);
        }
        tracing::info!(step = self.name, index = index + 1, "running step");
        (self.run)(cx)
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish()
    }
}

pub static STEPS: &[Step] = &[
    Step {
        name: "make_temporary_directories",
        run: steps::make_temporary_directories,
    },
    Step {
        name: "load_layout",
        run: steps::load_layout,
    },
    Step {
        name: "prepare_gadget_tree",
        run: steps::prepare_gadget_tree,
    },
    Step {
        name: "build_rootfs",
        run: steps::build_rootfs,
    },
    Step {
        name: "populate_rootfs_contents",
        run: steps::populate_rootfs_contents,
    },
    Step {
        name: "calculate_rootfs_size",
        run: steps::calculate_rootfs_size,
    },
    Step {
        name: "populate_bootfs_contents",
        run: steps::populate_bootfs_contents,
    },
    Step {
        name: "populate_prepare_partitions",
        run: steps::populate_prepare_partitions,
    },
    Step {
        name: "make_disk",
        run: steps::make_disk,
    },
    Step {
        name: "finish",
        run: steps::finish,
    },
];

/// 0-based position of a step given by name or 1-based index.
pub fn index_of(step: &str) -> Option<usize> {
    if let Ok(n) = step.parse::<usize>() {
        return (1..=STEPS.len()).contains(&n).then(|| n - 1);
    }
    STEPS.iter().position(|s| s.name == step)
}
