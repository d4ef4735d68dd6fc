//! User hook scripts.
//!
//! A hook point named `post-populate-rootfs` runs, for each configured hook
//! directory in order:
//!
//! 1. every executable in `<dir>/post-populate-rootfs.d/`, sorted by name
//! 2. `<dir>/post-populate-rootfs` itself, if present and executable
//!
//! Each script sees the directory it may modify in one environment variable.

use std::io;
use std::path::{Path, PathBuf};

use crate::error::{BuildError, IoContext, Result};
use crate::host::Host;
use crate::output::Output;
use crate::process::Cmd;

/// A named point in the pipeline where hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookPoint {
    pub name: &'static str,
    pub env_var: &'static str,
}

pub const POST_POPULATE_ROOTFS: HookPoint = HookPoint {
    name: "post-populate-rootfs",
    env_var: "IMAGE_BUILDER_HOOK_ROOTFS",
};

pub const POST_POPULATE_VOLUMES: HookPoint = HookPoint {
    name: "post-populate-volumes",
    env_var: "IMAGE_BUILDER_HOOK_VOLUMES",
};

/// Run every script for `hook_name` found under `hook_dirs`.
///
/// Stops at the first script that fails. No scripts at all is fine.
pub fn run_hooks(
    host: &Host,
    hook_dirs: &[PathBuf],
    hook_name: &str,
    env_var: &str,
    target_dir: &Path,
    output: &mut Output,
    debug: bool,
) -> Result<()> {
    for dir in hook_dirs {
        let scripts = collect_scripts(host, dir, hook_name)?;
        for script in scripts {
            if debug {
                output.line(format_args!("Running hook script: {}", script.display()));
            }
            run_script(host, &script, env_var, target_dir)?;
        }
    }
    Ok(())
}

/// Run every script registered for `point`.
pub fn run_hook_point(
    host: &Host,
    hook_dirs: &[PathBuf],
    point: HookPoint,
    target_dir: &Path,
    output: &mut Output,
    debug: bool,
) -> Result<()> {
    run_hooks(
        host,
        hook_dirs,
        point.name,
        point.env_var,
        target_dir,
        output,
        debug,
    )
}

fn collect_scripts(host: &Host, dir: &Path, hook_name: &str) -> Result<Vec<PathBuf>> {
    let mut scripts = Vec::new();

    let hook_dir = dir.join(format!("{}.d", hook_name));
    match host.fs.read_dir(&hook_dir) {
        Ok(entries) => {
            for entry in entries {
                if entry.is_executable() {
                    scripts.push(entry.path);
                } else {
                    tracing::debug!(path = %entry.path.display(), "skipping non-executable hook entry");
                }
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).io_context(|| {
                format!("Error reading hooks directory '{}'", hook_dir.display())
            })
        }
    }

    match host.fs.read_dir(dir) {
        Ok(entries) => {
            if let Some(entry) = entries.into_iter().find(|e| e.name == hook_name) {
                if entry.is_executable() {
                    scripts.push(entry.path);
                } else if !entry.is_dir {
                    tracing::debug!(path = %entry.path.display(), "skipping non-executable hook");
                }
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e)
                .io_context(|| format!("Error reading hooks directory '{}'", dir.display()))
        }
    }
    Ok(scripts)
}

fn run_script(host: &Host, script: &Path, env_var: &str, target_dir: &Path) -> Result<()> {
    let context = || format!("Error running hook {}", script.display());
    let cmd = Cmd::new(script.to_string_lossy()).env(env_var, target_dir.as_os_str());

    tracing::info!(hook = %script.display(), "running hook");
    let output = host
        .runner
        .run(&cmd)
        .map_err(|e| BuildError::hook(context(), e))?;
    if !output.success() {
        return Err(BuildError::hook(context(), output.failure_summary()));
    }
    Ok(())
}
