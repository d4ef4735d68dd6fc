use std::env;
use std::io;
use std::path::{Path, PathBuf};

use super::registry::STEPS;
use super::state::{RunOptions, RunPlan, RunState};
use super::StepContext;
use crate::checkpoint::CheckpointStore;
use crate::config::ImageConfig;
use crate::context::BuildContext;
use crate::error::{display, BuildError, IoContext, Result};
use crate::host::Host;
use crate::output::Output;

/// Drives the step registry for one run.
pub struct Pipeline {
    options: RunOptions,
    config: Option<ImageConfig>,
    host: Host,
    output: Output,
    context: Option<BuildContext>,
    state: RunState,
    clean_work_dir: bool,
}

impl Pipeline {
    /// `config` is ignored when resuming; the checkpoint carries its own.
    pub fn new(options: RunOptions, config: ImageConfig, host: Host, output: Output) -> Self {
        Self::with_config(options, Some(config), host, output)
    }

    /// A run that continues the checkpoint in `options.work_dir`.
    pub fn resume(mut options: RunOptions, host: Host, output: Output) -> Self {
        options.resume = true;
        Self::with_config(options, None, host, output)
    }

    fn with_config(
        options: RunOptions,
        config: Option<ImageConfig>,
        host: Host,
        output: Output,
    ) -> Self {
        let clean_work_dir = options.clean_work_dir;
        Self {
            options,
            config,
            host,
            output,
            context: None,
            state: RunState::Pending,
            clean_work_dir,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn context(&self) -> Option<&BuildContext> {
        self.context.as_ref()
    }

    pub fn work_dir(&self) -> Option<&Path> {
        self.context.as_ref().map(|c| c.work_dir.as_path())
    }

    /// Run and report any error on the output channel.
    pub fn run(&mut self) -> bool {
        match self.execute() {
            Ok(_) => true,
            Err(err) => {
                self.output.error(&err);
                false
            }
        }
    }

    /// Validate the run mode, set up or restore the work directory, and run
    /// the selected steps.
    pub fn execute(&mut self) -> Result<RunState> {
        let plan = RunPlan::from_options(&self.options)?;
        let (mut context, start) = self.prepare(&plan)?;
        let end = plan.end(STEPS.len());
        let mut last_completed = start.checked_sub(1);

        for index in start..end {
            self.state = RunState::Running(index);
            let step = &STEPS[index];
            let mut cx = StepContext {
                host: &self.host,
                output: &mut self.output,
                build: &mut context,
                debug: self.options.debug,
            };
            if let Err(err) = step.invoke(index, &mut cx) {
                tracing::error!(step = step.name, kind = err.kind(), error = %err, "step failed");
                self.state = RunState::Failed(index);
                self.context = Some(context);
                return Err(err);
            }
            last_completed = Some(index);
        }

        self.state = plan.final_state(STEPS.len());
        let context = self.context.insert(context);
        CheckpointStore::in_dir(&context.work_dir).save(last_completed, context)?;
        tracing::info!(state = %self.state, work_dir = %context.work_dir.display(), "run stopped");
        Ok(self.state)
    }

    /// Delete the work directory if the run completed and cleanup was
    /// requested. A paused or failed run keeps it so it can be resumed.
    pub fn teardown(&mut self) -> Result<()> {
        if self.state != RunState::Completed || !self.clean_work_dir {
            return Ok(());
        }
        let Some(context) = &self.context else {
            return Ok(());
        };
        self.host
            .fs
            .remove_dir_all(&context.work_dir)
            .map_err(|source| BuildError::Cleanup {
                path: display(&context.work_dir),
                source,
            })?;
        tracing::info!(work_dir = %context.work_dir.display(), "removed work directory");
        Ok(())
    }

    /// The context to run with and the index of the first step.
    fn prepare(&mut self, plan: &RunPlan) -> Result<(BuildContext, usize)> {
        if plan.resume {
            let work_dir = self.options.work_dir.clone().ok_or_else(|| {
                BuildError::Resume("must specify a work directory when resuming".into())
            })?;
            if !work_dir.is_dir() {
                return Err(BuildError::Resume(format!(
                    "Error resuming: work directory '{}' does not exist",
                    work_dir.display()
                )));
            }
            let checkpoint = CheckpointStore::in_dir(&work_dir)
                .load()
                .map_err(|e| BuildError::Resume(format!("Error resuming: {}", e)))?;
            tracing::info!(
                work_dir = %work_dir.display(),
                next_step = checkpoint.next_step() + 1,
                saved_at = %checkpoint.saved_at_utc,
                "resuming"
            );
            let start = checkpoint.next_step();
            return Ok((checkpoint.context, start));
        }

        let config = self.config.clone().ok_or_else(|| {
            BuildError::Validation("a build config is required unless resuming".into())
        })?;
        let work_dir = match &self.options.work_dir {
            Some(dir) => {
                // Only the last component is created; a missing parent is an error.
                match self.host.fs.create_dir(dir) {
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => {}
                    result => result
                        .io_context(|| format!("Error creating workDir '{}'", dir.display()))?,
                }
                dir.clone()
            }
            None => {
                let parent = self
                    .options
                    .temp_location
                    .clone()
                    .unwrap_or_else(env::temp_dir);
                let dir = create_temp_work_dir(&parent)?;
                // Auto-created work directories are always removed on completion.
                self.clean_work_dir = true;
                dir
            }
        };
        tracing::debug!(work_dir = %work_dir.display(), "work directory ready");
        Ok((BuildContext::new(&work_dir, config), 0))
    }
}

fn create_temp_work_dir(parent: &Path) -> Result<PathBuf> {
    let dir = tempfile::Builder::new()
        .prefix("image-builder-")
        .tempdir_in(parent)
        .io_context(|| format!("Error creating workDir in '{}'", parent.display()))?;
    Ok(dir.keep())
}
