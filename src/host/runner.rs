use std::io;

use crate::process::{Cmd, CommandOutput};

/// Runs an external command to completion.
///
/// `Err` means the command could not be run at all. A command that ran and
/// exited non-zero is an `Ok` with a failing [`CommandOutput`].
pub trait ProcessRunner {
    fn run(&self, cmd: &Cmd) -> io::Result<CommandOutput>;
}

/// Spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, cmd: &Cmd) -> io::Result<CommandOutput> {
        tracing::debug!(command = %cmd, "running command");
        let output = cmd.spawn_and_wait()?;
        if !output.success() {
            tracing::debug!(command = %cmd, code = output.code, "command failed");
        }
        Ok(output)
    }
}
