//! The run registry: every top-level job a sweep declares is registered
//! here once, and the same record drives execution, progress reporting and
//! post-hoc stat collection.

use anyhow::{bail, Result};
use std::path::PathBuf;
use sweep_exec::Phase;
use sweep_stats::{Progress, StatAggregate};

use crate::entity::{Entity, ExecKind};
use crate::launch::{LaunchConfig, SimParams};
use crate::snapshot::RunSnapshot;

/// One top-level run declaration. The results directory is a deterministic
/// function of the results root and job name so the run path and the stats
/// path always agree on where output lives.
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub entity: Entity,
    pub params: SimParams,
    pub results_root: PathBuf,
}

impl Job {
    pub fn results_dir(&self) -> PathBuf {
        self.results_root.join(&self.name)
    }
}

/// Holds the registered jobs plus append-only per-kind pools of leaf names,
/// so batch-wide operations can enumerate every checkpoint, program, trace
/// or mix across all jobs.
#[derive(Debug, Default)]
pub struct Registry {
    jobs: Vec<Job>,
    programs: Vec<String>,
    checkpoints: Vec<String>,
    traces: Vec<String>,
    mixes: Vec<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Job names must be unique: the name is the results-directory key.
    pub fn register(&mut self, job: Job) -> Result<()> {
        if self.jobs.iter().any(|j| j.name == job.name) {
            bail!("job {} is already registered", job.name);
        }
        job.entity.validate()?;
        self.index_entity(&job.entity);
        self.jobs.push(job);
        Ok(())
    }

    fn index_entity(&mut self, entity: &Entity) {
        match entity {
            Entity::Exec(e) => {
                let pool = match e.kind {
                    ExecKind::Program { .. } => &mut self.programs,
                    ExecKind::Checkpoint { .. } => &mut self.checkpoints,
                    ExecKind::Trace { .. } => &mut self.traces,
                };
                pool.push(e.name.clone());
            }
            Entity::Mix(m) => {
                self.mixes.push(m.name.clone());
                for member in &m.members {
                    let pool = match member.kind {
                        ExecKind::Program { .. } => &mut self.programs,
                        ExecKind::Checkpoint { .. } => &mut self.checkpoints,
                        ExecKind::Trace { .. } => &mut self.traces,
                    };
                    pool.push(member.name.clone());
                }
            }
            Entity::Benchmark(c) | Entity::Suite(c) => {
                for member in &c.members {
                    self.index_entity(member);
                }
            }
        }
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn programs(&self) -> &[String] {
        &self.programs
    }

    pub fn checkpoints(&self) -> &[String] {
        &self.checkpoints
    }

    pub fn traces(&self) -> &[String] {
        &self.traces
    }

    pub fn mixes(&self) -> &[String] {
        &self.mixes
    }

    /// Scaffolds every job's results tree and creates one run snapshot per
    /// job, wiring the snapshot's job log into the job's params so every
    /// launched command records itself there.
    pub fn make_all(&mut self) -> Result<()> {
        for job in &mut self.jobs {
            let dir = job.results_root.join(&job.name);
            std::fs::create_dir_all(&dir)?;
            job.entity.make(&dir)?;
            let snapshot = RunSnapshot::create(&dir, &job.params)?;
            job.params.snapshot_log = Some(snapshot.job_log);
        }
        Ok(())
    }

    /// Expands every registered job into phases. With no explicit grouping,
    /// all jobs land in one phase; a grouping is an ordered list of
    /// job-name lists, each becoming one phase (every registered job must
    /// appear exactly once).
    pub fn phases(&self, launch: &LaunchConfig, grouping: Option<&[Vec<String>]>) -> Result<Vec<Phase>> {
        match grouping {
            None => {
                let mut commands = Vec::new();
                for job in &self.jobs {
                    commands.extend(job.entity.create_joblist(
                        &job.results_dir(),
                        &job.params,
                        launch,
                    )?);
                }
                Ok(vec![Phase::new(commands)])
            }
            Some(groups) => {
                let mut seen = Vec::new();
                let mut phases = Vec::new();
                for (i, group) in groups.iter().enumerate() {
                    let mut commands = Vec::new();
                    for name in group {
                        let job = self
                            .jobs
                            .iter()
                            .find(|j| &j.name == name)
                            .ok_or_else(|| anyhow::anyhow!("unknown job {name} in phase {i}"))?;
                        if seen.contains(name) {
                            bail!("job {name} appears in more than one phase");
                        }
                        seen.push(name.clone());
                        commands.extend(job.entity.create_joblist(
                            &job.results_dir(),
                            &job.params,
                            launch,
                        )?);
                    }
                    phases.push(Phase::named(format!("phase-{i}"), commands));
                }
                for job in &self.jobs {
                    if !seen.contains(&job.name) {
                        bail!("job {} is not assigned to any phase", job.name);
                    }
                }
                Ok(phases)
            }
        }
    }

    /// One classification per leaf run across every job, labelled by job.
    pub fn progress_all(&self) -> Vec<(String, Vec<Progress>)> {
        self.jobs
            .iter()
            .map(|job| (job.name.clone(), job.entity.get_progress(&job.results_dir())))
            .collect()
    }

    /// Builds each job's stat aggregate tree fresh from the results on disk.
    pub fn stats_all(&self) -> Vec<(String, StatAggregate)> {
        self.jobs
            .iter()
            .map(|job| (job.name.clone(), job.entity.get_stats(&job.results_dir())))
            .collect()
    }

    /// Convenience for the stats and progress paths when only one job is
    /// wanted.
    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.name == name)
    }
}
