//! The composable unit-of-work model: executables, mixes, benchmarks and
//! suites.
//!
//! Every node answers the same four questions: `make` (scaffold result
//! directories), `create_joblist` (materialize process handles),
//! `get_progress` (classify each leaf's run state) and `get_stats` (build
//! the aggregate tree). Collections fan the calls out to their children;
//! only the stat roll-up differs between benchmark and suite.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use sweep_exec::{CommandSpec, ResourceHints};
use sweep_stats::{Progress, StatAggregate, StatFrame};

use crate::launch::{LaunchConfig, SimParams};

fn default_weight() -> f64 {
    1.0
}

fn default_cores() -> usize {
    1
}

/// What a leaf actually runs: a program binary, a checkpoint replay, or a
/// pre-recorded trace replay. Each kind renders its own selector flag for
/// the launcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecKind {
    Program {
        run_cmd: String,
        #[serde(default)]
        path: Option<PathBuf>,
        /// Copy the program's source directory into the results directory
        /// so each run gets a private working copy.
        #[serde(default)]
        copy: bool,
    },
    Checkpoint {
        path: PathBuf,
    },
    Trace {
        path: PathBuf,
    },
}

impl ExecKind {
    /// One launcher selector flag, with a leading space so selectors can be
    /// concatenated directly for mixes.
    fn selector(&self, results_dir: &Path) -> String {
        match self {
            ExecKind::Program { run_cmd, copy, .. } => {
                if *copy {
                    format!(" --program=\"{}/{run_cmd}\"", results_dir.display())
                } else {
                    format!(" --program=\"{run_cmd}\"")
                }
            }
            ExecKind::Checkpoint { path } => format!(" --checkpoint=\"{}\"", path.display()),
            ExecKind::Trace { path } => format!(" --trace=\"{}\"", path.display()),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ExecKind::Program { .. } => "program",
            ExecKind::Checkpoint { .. } => "checkpoint",
            ExecKind::Trace { .. } => "trace",
        }
    }
}

/// A leaf unit of work. `weight` is the fraction of the parent workload's
/// instruction stream this unit stands in for and must lie in (0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Executable {
    pub name: String,
    #[serde(flatten)]
    pub kind: ExecKind,
    #[serde(default)]
    pub sim_args: String,
    #[serde(default)]
    pub frontend_args: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_cores")]
    pub num_cores: usize,
    /// Per-run resource hints forwarded to the cluster backend.
    #[serde(default)]
    pub hints: ResourceHints,
}

impl Executable {
    fn results_dir(&self, basename: &Path) -> PathBuf {
        basename.join(&self.name)
    }

    fn make(&self, basename: &Path) -> Result<()> {
        let dir = self.results_dir(basename);
        fs::create_dir_all(&dir)
            .with_context(|| format!("could not create results dir {}", dir.display()))?;
        if let ExecKind::Program {
            path: Some(src),
            copy: true,
            ..
        } = &self.kind
        {
            copy_tree(src, &dir)?;
        }
        Ok(())
    }

    fn create_joblist(
        &self,
        basename: &Path,
        params: &SimParams,
        launch: &LaunchConfig,
    ) -> Result<Vec<CommandSpec>> {
        let params_file = params.require_params_file(&self.name)?;
        let dir = self.results_dir(basename);
        let sim_args = format!(
            "{} {} --num_cores {} --output_dir {}",
            self.sim_args,
            params.args,
            self.num_cores,
            dir.display()
        );
        let cmd = launch.render(
            &dir,
            params_file,
            &sim_args,
            &self.frontend_args,
            &self.kind.selector(&dir),
        );
        let mut hints = self.hints.clone();
        hints.cores = Some(self.num_cores);
        let mut spec = CommandSpec::new(cmd, &dir)
            .with_name(&self.name)
            .with_run_dir(&dir)
            .with_stdout(&launch.launch_stdout)
            .with_stderr(&launch.launch_stderr)
            .with_hints(hints);
        if let Some(log) = &params.snapshot_log {
            spec = spec.with_snapshot_log(log);
        }
        Ok(vec![spec])
    }

    fn get_stats(&self, basename: &Path) -> StatAggregate {
        let frame = StatFrame::from_results_dir(&self.name, &self.results_dir(basename));
        StatAggregate::leaf(self.weight, frame)
    }
}

/// Several executables co-scheduled onto one multi-core simulator run. The
/// simulator fans out internally, so a mix emits exactly one process handle
/// whose selector flags enumerate every member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mix {
    pub name: String,
    pub members: Vec<Executable>,
    #[serde(default)]
    pub sim_args: String,
    #[serde(default)]
    pub frontend_args: String,
    #[serde(default)]
    pub hints: ResourceHints,
}

impl Mix {
    /// One core per member.
    pub fn num_cores(&self) -> usize {
        self.members.len()
    }

    fn results_dir(&self, basename: &Path) -> PathBuf {
        basename.join(&self.name)
    }

    fn create_joblist(
        &self,
        basename: &Path,
        params: &SimParams,
        launch: &LaunchConfig,
    ) -> Result<Vec<CommandSpec>> {
        let params_file = params.require_params_file(&self.name)?;
        let dir = self.results_dir(basename);
        let selectors: String = self
            .members
            .iter()
            .map(|m| m.kind.selector(&dir))
            .collect();
        let sim_args = format!(
            "{} {} --num_cores {} --output_dir {}",
            self.sim_args,
            params.args,
            self.num_cores(),
            dir.display()
        );
        let cmd = launch.render(&dir, params_file, &sim_args, &self.frontend_args, &selectors);
        let mut hints = self.hints.clone();
        hints.cores = Some(self.num_cores());
        let mut spec = CommandSpec::new(cmd, &dir)
            .with_name(&self.name)
            .with_run_dir(&dir)
            .with_stdout(&launch.launch_stdout)
            .with_stderr(&launch.launch_stderr)
            .with_hints(hints);
        if let Some(log) = &params.snapshot_log {
            spec = spec.with_snapshot_log(log);
        }
        Ok(vec![spec])
    }
}

/// An ordered group of child entities. A benchmark's children are weighted
/// samples of one workload; a suite's children are independent workloads
/// reported side by side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    pub members: Vec<Entity>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Exec(Executable),
    Mix(Mix),
    Benchmark(Collection),
    Suite(Collection),
}

impl Entity {
    pub fn name(&self) -> &str {
        match self {
            Entity::Exec(e) => &e.name,
            Entity::Mix(m) => &m.name,
            Entity::Benchmark(c) | Entity::Suite(c) => &c.name,
        }
    }

    /// Rejects weights outside (0, 1] anywhere in the tree before any
    /// directory is touched.
    pub fn validate(&self) -> Result<()> {
        match self {
            Entity::Exec(e) => validate_weight(&e.name, e.weight),
            Entity::Mix(m) => {
                if m.members.is_empty() {
                    bail!("mix {} has no members", m.name);
                }
                for member in &m.members {
                    validate_weight(&member.name, member.weight)?;
                }
                Ok(())
            }
            Entity::Benchmark(c) | Entity::Suite(c) => {
                validate_weight(&c.name, c.weight)?;
                for member in &c.members {
                    member.validate()?;
                }
                Ok(())
            }
        }
    }

    /// Creates result-directory scaffolding under `basename`. Copy-mode
    /// programs also get a private copy of their sources; files already
    /// present at the destination are left alone.
    pub fn make(&self, basename: &Path) -> Result<()> {
        match self {
            Entity::Exec(e) => e.make(basename),
            Entity::Mix(m) => {
                let dir = m.results_dir(basename);
                fs::create_dir_all(&dir)
                    .with_context(|| format!("could not create results dir {}", dir.display()))?;
                for member in &m.members {
                    if let ExecKind::Program {
                        path: Some(src),
                        copy: true,
                        ..
                    } = &member.kind
                    {
                        copy_tree(src, &dir)?;
                    }
                }
                Ok(())
            }
            Entity::Benchmark(c) | Entity::Suite(c) => {
                let dir = basename.join(&c.name);
                fs::create_dir_all(&dir)
                    .with_context(|| format!("could not create results dir {}", dir.display()))?;
                for member in &c.members {
                    member.make(&dir)?;
                }
                Ok(())
            }
        }
    }

    /// Flattens this node into the process handles it contributes to a run.
    pub fn create_joblist(
        &self,
        basename: &Path,
        params: &SimParams,
        launch: &LaunchConfig,
    ) -> Result<Vec<CommandSpec>> {
        match self {
            Entity::Exec(e) => e.create_joblist(basename, params, launch),
            Entity::Mix(m) => m.create_joblist(basename, params, launch),
            Entity::Benchmark(c) | Entity::Suite(c) => {
                let dir = basename.join(&c.name);
                let mut jobs = Vec::new();
                for member in &c.members {
                    jobs.extend(member.create_joblist(&dir, params, launch)?);
                }
                Ok(jobs)
            }
        }
    }

    /// One classification per leaf run, in tree order.
    pub fn get_progress(&self, basename: &Path) -> Vec<Progress> {
        match self {
            Entity::Exec(e) => vec![Progress::classify(&e.results_dir(basename))],
            Entity::Mix(m) => vec![Progress::classify(&m.results_dir(basename))],
            Entity::Benchmark(c) | Entity::Suite(c) => {
                let dir = basename.join(&c.name);
                c.members
                    .iter()
                    .flat_map(|m| m.get_progress(&dir))
                    .collect()
            }
        }
    }

    /// Builds the stat aggregate tree mirroring this entity tree. Built
    /// fresh on every call; nothing is cached.
    pub fn get_stats(&self, basename: &Path) -> StatAggregate {
        match self {
            Entity::Exec(e) => e.get_stats(basename),
            Entity::Mix(m) => {
                let frame = StatFrame::from_results_dir(&m.name, &m.results_dir(basename));
                StatAggregate::leaf(1.0, frame)
            }
            Entity::Benchmark(c) => {
                let dir = basename.join(&c.name);
                StatAggregate::Benchmark {
                    label: c.name.clone(),
                    weight: c.weight,
                    children: c.members.iter().map(|m| m.get_stats(&dir)).collect(),
                }
            }
            Entity::Suite(c) => {
                let dir = basename.join(&c.name);
                StatAggregate::suite(
                    &c.name,
                    c.members.iter().map(|m| m.get_stats(&dir)).collect(),
                )
            }
        }
    }
}

fn validate_weight(name: &str, weight: f64) -> Result<()> {
    if !(weight > 0.0 && weight <= 1.0) {
        bail!("weight for {name} must be in (0, 1], got {weight}");
    }
    Ok(())
}

/// Recursively copies `src` into `dst`, skipping destination files that
/// already exist so repeated `make` calls never clobber run output.
fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(src) {
        let entry = entry.with_context(|| format!("could not walk {}", src.display()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("path escapes {}", src.display()))?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("could not create {}", target.display()))?;
        } else if !target.exists() {
            fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "could not copy {} to {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
        } else {
            tracing::debug!(target = %target.display(), "skipping existing file");
        }
    }
    Ok(())
}
