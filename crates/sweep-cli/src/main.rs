use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use sweep_exec::{BatchManager, ClusterBatchManager, ClusterConfig};
use sweep_model::{Entity, Job, LaunchConfig, Registry, SimParams};
use sweep_stats::{JobStatus, StatFrame, SummaryTable};

#[derive(Parser)]
#[command(name = "sweep", version, about = "Simulator batch sweep driver")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendArg {
    #[value(name = "local")]
    Local,
    #[value(name = "cluster")]
    Cluster,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold result directories and run every declared job to completion.
    Run {
        jobfile: PathBuf,
        #[arg(long, value_enum, default_value = "local")]
        backend: BackendArg,
        /// Worker-pool size for the local backend; defaults to all cores.
        #[arg(long)]
        cores: Option<usize>,
    },
    /// Classify every leaf run as not started, running, finished or failed.
    Progress {
        jobfile: PathBuf,
    },
    /// Report one stat (or derived `name=expr` metric) across all jobs.
    Stat {
        jobfile: PathBuf,
        /// Stat name, or an equation such as "IPC = insts / cycles".
        stat: String,
        #[arg(long, default_value_t = 0)]
        core: usize,
        /// Label of the baseline entry to normalize against.
        #[arg(long)]
        base: Option<String>,
        /// Report (base - x) / base instead of base / x.
        #[arg(long)]
        improvement: bool,
        #[arg(long)]
        amean: bool,
        #[arg(long)]
        gmean: bool,
        /// Also write the table as CSV to this file.
        #[arg(long)]
        csv: Option<PathBuf>,
    },
}

/// The declarative sweep description: where results go, how the launcher is
/// invoked, the shared parameter set, and the job graph itself.
#[derive(Debug, Deserialize)]
struct Jobfile {
    results_root: PathBuf,
    launch: LaunchConfig,
    #[serde(default)]
    params: SimParams,
    jobs: Vec<JobDecl>,
    /// Ordered phase grouping by job name; absent means one phase of all
    /// jobs.
    #[serde(default)]
    phases: Option<Vec<Vec<String>>>,
    #[serde(default)]
    cluster: ClusterConfig,
}

#[derive(Debug, Deserialize)]
struct JobDecl {
    name: String,
    entity: Entity,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            jobfile,
            backend,
            cores,
        } => run(&jobfile, backend, cores),
        Commands::Progress { jobfile } => progress(&jobfile),
        Commands::Stat {
            jobfile,
            stat,
            core,
            base,
            improvement,
            amean,
            gmean,
            csv,
        } => stats(
            &jobfile,
            &stat,
            core,
            base.as_deref(),
            improvement,
            amean,
            gmean,
            csv.as_deref(),
        ),
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load(jobfile: &Path) -> Result<(Registry, Jobfile)> {
    let raw = std::fs::read_to_string(jobfile)
        .with_context(|| format!("could not read jobfile {}", jobfile.display()))?;
    let file: Jobfile = serde_yaml::from_str(&raw)
        .with_context(|| format!("could not parse jobfile {}", jobfile.display()))?;
    if file.jobs.is_empty() {
        bail!("jobfile {} declares no jobs", jobfile.display());
    }
    let mut registry = Registry::new();
    for decl in &file.jobs {
        registry.register(Job {
            name: decl.name.clone(),
            entity: decl.entity.clone(),
            params: file.params.clone(),
            results_root: file.results_root.clone(),
        })?;
    }
    Ok((registry, file))
}

fn run(jobfile: &Path, backend: BackendArg, cores: Option<usize>) -> Result<()> {
    let (mut registry, file) = load(jobfile)?;
    registry.make_all()?;
    let phases = registry.phases(&file.launch, file.phases.as_deref())?;
    let phase_count = phases.len();
    match backend {
        BackendArg::Local => {
            let mut manager = BatchManager::new(phases);
            if let Some(cores) = cores {
                manager = manager.with_cores(cores);
            }
            let worst = manager.run()?;
            if worst != 0 {
                tracing::error!(exit = worst, "sweep finished with failures");
                std::process::exit(worst.clamp(1, 255));
            }
            println!("all {phase_count} phase(s) completed");
        }
        BackendArg::Cluster => {
            let mut manager = ClusterBatchManager::new(phases, file.cluster);
            let job_ids = manager.run()?;
            println!("submitted {} job(s) across {phase_count} phase(s)", job_ids.len());
            for id in job_ids {
                println!("{id}");
            }
        }
    }
    Ok(())
}

fn progress(jobfile: &Path) -> Result<()> {
    let (registry, _file) = load(jobfile)?;
    let mut failures = 0usize;
    for (job_name, mut entries) in registry.progress_all() {
        entries.sort_by_key(|p| p.status);
        println!("{job_name}:");
        for entry in &entries {
            println!("  {entry}");
        }
        let done = entries
            .iter()
            .filter(|p| p.status == JobStatus::Success)
            .count();
        failures += entries.iter().filter(|p| p.is_failure()).count();
        println!("  {done}/{} finished", entries.len());
    }
    if failures > 0 {
        bail!("{failures} run(s) failed");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn stats(
    jobfile: &Path,
    stat: &str,
    core: usize,
    base: Option<&str>,
    improvement: bool,
    amean: bool,
    gmean: bool,
    csv: Option<&Path>,
) -> Result<()> {
    if improvement && base.is_none() {
        bail!("--improvement requires --base");
    }
    let (registry, _file) = load(jobfile)?;
    let mut frames: Vec<StatFrame> = Vec::new();
    for (job_name, aggregate) in registry.stats_all() {
        for mut frame in aggregate.report() {
            frame.set_label(format!("{job_name}/{}", frame.label()));
            frames.push(frame);
        }
    }
    let mut table = SummaryTable::build(stat, core, &mut frames)?;
    if let Some(base) = base {
        if improvement {
            table.improvement(base)?;
        } else {
            table.speedup(base)?;
        }
    }
    print!("{}", table.render());
    if let Some(csv) = csv {
        std::fs::write(csv, table.to_csv())
            .with_context(|| format!("could not write {}", csv.display()))?;
    }
    if amean {
        println!("amean: {:.4}", table.amean());
    }
    if gmean {
        println!("gmean: {:.4}", table.gmean());
    }
    Ok(())
}
