use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use image_builder::pipeline::STEPS;
use image_builder::preflight::{check_host_tools, check_required_tools, REQUIRED_TOOLS};
use image_builder::{load_config, Host, Output, Pipeline, RunOptions};
use tracing_subscriber::EnvFilter;

/// Build bootable disk images from a volume layout and a root filesystem
#[derive(Parser)]
#[command(name = "image-builder")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Build configuration (TOML). Optional with --resume.
    #[arg(required_unless_present = "resume")]
    config: Option<PathBuf>,

    /// Work directory to use (created if missing) or to resume
    #[arg(short, long = "workdir", value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// Stop before this step (name or 1-based index)
    #[arg(short, long, value_name = "STEP")]
    until: Option<String>,

    /// Stop after this step (name or 1-based index)
    #[arg(short, long, value_name = "STEP")]
    thru: Option<String>,

    /// Continue the run checkpointed in --workdir
    #[arg(short, long)]
    resume: bool,

    /// Print each step before it runs and log at debug level
    #[arg(short, long)]
    debug: bool,

    /// Delete the work directory after a completed run
    #[arg(long)]
    clean: bool,

    /// Parent directory for an auto-created work directory
    #[arg(long, value_name = "DIR")]
    tmpdir: Option<PathBuf>,

    /// Skip the host tool check
    #[arg(long)]
    skip_preflight: bool,

    /// List the pipeline steps and exit
    #[arg(long)]
    list_steps: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<bool> {
    if cli.list_steps {
        for (i, step) in STEPS.iter().enumerate() {
            println!("{:>2}  {}", i + 1, step.name);
        }
        return Ok(true);
    }

    let config = cli.config.as_deref().map(load_config).transpose()?;
    if !cli.skip_preflight {
        match &config {
            Some(config) => check_host_tools(config)?,
            None => check_required_tools(REQUIRED_TOOLS)?,
        }
    }

    let options = RunOptions {
        work_dir: cli.work_dir,
        until: cli.until,
        thru: cli.thru,
        resume: cli.resume,
        debug: cli.debug,
        clean_work_dir: cli.clean,
        temp_location: cli.tmpdir,
    };
    let mut pipeline = match config {
        Some(config) => Pipeline::new(options, config, Host::system(), Output::stdout()),
        None => Pipeline::resume(options, Host::system(), Output::stdout()),
    };

    if !pipeline.run() {
        return Ok(false);
    }
    pipeline.teardown()?;

    if let Some(work_dir) = pipeline.work_dir() {
        if pipeline.state().is_paused() {
            println!(
                "Paused ({}). Resume with: --resume --workdir {}",
                pipeline.state(),
                work_dir.display()
            );
        }
    }
    Ok(true)
}
