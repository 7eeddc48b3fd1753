//! Run snapshots: a timestamped audit directory capturing the resolved
//! parameter set and an append-only log of every launch.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::launch::SimParams;

/// One per `run` invocation. The job log receives a `(launch id, results
/// dir)` line for every command that actually launched, so an interrupted
/// sweep can be audited after the fact.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub dir: PathBuf,
    pub job_log: PathBuf,
}

impl RunSnapshot {
    /// Creates the snapshot directory under `results_root`, writes the
    /// resolved params out as JSON and copies the params file alongside it.
    /// The pid suffix keeps concurrent drivers on the same root distinct.
    pub fn create(results_root: &Path, params: &SimParams) -> Result<Self> {
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        let dir = results_root.join(format!("snapshot_{stamp}_{}", std::process::id()));
        fs::create_dir_all(&dir)
            .with_context(|| format!("could not create snapshot dir {}", dir.display()))?;

        let rendered = serde_json::to_string_pretty(params)?;
        fs::write(dir.join("params.json"), rendered)
            .with_context(|| format!("could not write params.json in {}", dir.display()))?;

        if let Some(params_file) = &params.params_file {
            if params_file.is_file() {
                let file_name = params_file
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("PARAMS.in"));
                fs::copy(params_file, dir.join(&file_name)).with_context(|| {
                    format!("could not copy {} into snapshot", params_file.display())
                })?;
            }
        }

        let job_log = dir.join("job.log");
        fs::File::create(&job_log)
            .with_context(|| format!("could not create {}", job_log.display()))?;
        tracing::info!(snapshot = %dir.display(), "created run snapshot");
        Ok(Self { dir, job_log })
    }
}
