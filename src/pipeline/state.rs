//! Run modes and the run-state machine.

use std::fmt;
use std::path::PathBuf;

use super::registry;
use crate::error::{BuildError, Result};

/// Caller-supplied run parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Work directory to use or resume. A fresh one is created when unset.
    pub work_dir: Option<PathBuf>,
    /// Stop before this step (name or 1-based index).
    pub until: Option<String>,
    /// Stop after this step (name or 1-based index).
    pub thru: Option<String>,
    pub resume: bool,
    /// Print each step name before it runs.
    pub debug: bool,
    /// Delete the work directory after a completed run.
    pub clean_work_dir: bool,
    /// Parent of the auto-created work directory.
    pub temp_location: Option<PathBuf>,
}

/// Where a run stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    /// Run to the end.
    End,
    /// Stop before the step at this index.
    Before(usize),
    /// Stop after the step at this index.
    After(usize),
}

/// A validated run: which steps execute and where it stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPlan {
    pub resume: bool,
    pub stop: Stop,
}

impl RunPlan {
    /// Validate the run-mode flags. Has no side effects.
    pub fn from_options(options: &RunOptions) -> Result<Self> {
        let stop = match (&options.until, &options.thru) {
            (Some(_), Some(_)) => {
                return Err(BuildError::Validation(
                    "cannot specify both --until and --thru".into(),
                ))
            }
            (Some(until), None) => Stop::Before(lookup(until)?),
            (None, Some(thru)) => Stop::After(lookup(thru)?),
            (None, None) => Stop::End,
        };
        if options.resume && options.work_dir.is_none() {
            return Err(BuildError::Resume(
                "must specify a work directory when resuming".into(),
            ));
        }
        Ok(Self {
            resume: options.resume,
            stop,
        })
    }

    /// Exclusive end index for a registry of `len` steps.
    pub fn end(&self, len: usize) -> usize {
        match self.stop {
            Stop::End => len,
            Stop::Before(i) => i,
            Stop::After(i) => (i + 1).min(len),
        }
    }

    /// State a successful run settles in.
    pub fn final_state(&self, len: usize) -> RunState {
        match self.stop {
            Stop::Before(i) => RunState::PausedBefore(i),
            Stop::After(i) if i + 1 < len => RunState::PausedAfter(i),
            Stop::After(_) | Stop::End => RunState::Completed,
        }
    }
}

fn lookup(step: &str) -> Result<usize> {
    registry::index_of(step).ok_or_else(|| {
        BuildError::Validation(format!(
            "invalid step '{}': expected a step name or an index between 1 and {}",
            step,
            registry::STEPS.len()
        ))
    })
}

/// Lifecycle of one run. Indices are 0-based registry positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running(usize),
    PausedBefore(usize),
    PausedAfter(usize),
    Completed,
    Failed(usize),
}

impl RunState {
    pub fn is_paused(&self) -> bool {
        matches!(self, Self::PausedBefore(_) | Self::PausedAfter(_))
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = |i: &usize| registry::STEPS.get(*i).map_or("?", |s| s.name);
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Running(i) => write!(f, "running {}", name(i)),
            Self::PausedBefore(i) => write!(f, "paused before {}", name(i)),
            Self::PausedAfter(i) => write!(f, "paused after {}", name(i)),
            Self::Completed => f.write_str("completed"),
            Self::Failed(i) => write!(f, "failed at {}", name(i)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(until: Option<&str>, thru: Option<&str>) -> RunOptions {
        RunOptions {
            until: until.map(String::from),
            thru: thru.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_until_and_thru_conflict() {
        let err = RunPlan::from_options(&opts(Some("load_layout"), Some("make_disk"))).unwrap_err();
        assert!(matches!(err, BuildError::Validation(_)));
    }

    #[test]
    fn test_unknown_steps_are_rejected() {
        for bad in ["fake_step", "0", "11", "-1"] {
            let err = RunPlan::from_options(&opts(Some(bad), None)).unwrap_err();
            assert!(matches!(err, BuildError::Validation(_)), "{}", bad);
            let err = RunPlan::from_options(&opts(None, Some(bad))).unwrap_err();
            assert!(matches!(err, BuildError::Validation(_)), "{}", bad);
        }
    }

    #[test]
    fn test_resume_needs_work_dir() {
        let options = RunOptions {
            resume: true,
            ..Default::default()
        };
        let err = RunPlan::from_options(&options).unwrap_err();
        assert!(matches!(err, BuildError::Resume(_)));
    }

    #[test]
    fn test_plan_bounds() {
        let n = registry::STEPS.len();

        let plan = RunPlan::from_options(&opts(Some("load_layout"), None)).unwrap();
        assert_eq!(plan.end(n), 1);
        assert_eq!(plan.final_state(n), RunState::PausedBefore(1));

        let plan = RunPlan::from_options(&opts(None, Some("2"))).unwrap();
        assert_eq!(plan.end(n), 2);
        assert_eq!(plan.final_state(n), RunState::PausedAfter(1));

        let plan = RunPlan::from_options(&opts(None, Some("finish"))).unwrap();
        assert_eq!(plan.end(n), n);
        assert_eq!(plan.final_state(n), RunState::Completed);

        let plan = RunPlan::from_options(&RunOptions::default()).unwrap();
        assert_eq!(plan.end(n), n);
        assert_eq!(plan.final_state(n), RunState::Completed);
    }
}
