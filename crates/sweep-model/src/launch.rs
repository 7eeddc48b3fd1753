//! Shared parameter set and simulator-launcher command rendering.
//!
//! The core never interprets simulator flags; it only assembles the
//! launcher invocation: selector flags for what to run, core count, output
//! directory, pass-through argument strings, and per-stream redirection
//! targets.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The shared parameter set every job in a sweep runs with. Joblist
/// construction requires a resolved params file; a missing one is a
/// configuration error that aborts the whole driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimParams {
    /// Pass-through simulator argument string, appended to every run.
    #[serde(default)]
    pub args: String,
    pub params_file: Option<PathBuf>,
    /// Set once a run snapshot exists; every launched command appends its
    /// (launch id, results dir) line here.
    #[serde(skip)]
    pub snapshot_log: Option<PathBuf>,
}

impl SimParams {
    pub fn require_params_file(&self, entity_name: &str) -> Result<&Path> {
        self.params_file.as_deref().ok_or_else(|| {
            anyhow!("must provide a params file to create a joblist for {entity_name}")
        })
    }
}

fn default_stdout() -> String {
    "sim.stdout".to_string()
}

fn default_stderr() -> String {
    "sim.stderr".to_string()
}

fn default_frontend_stdout() -> String {
    "frontend.stdout".to_string()
}

fn default_frontend_stderr() -> String {
    "frontend.stderr".to_string()
}

fn default_launch_stdout() -> String {
    "launch.stdout".to_string()
}

fn default_launch_stderr() -> String {
    "launch.stderr".to_string()
}

/// Where the simulator, its frontend and the launcher live, and what the
/// redirected streams are called inside each results directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Launcher invocation prefix, e.g. `python3 /sim/bin/launch.py`.
    pub launcher: String,
    pub simulator: PathBuf,
    pub frontend: PathBuf,
    /// Sweep-wide simulator args prepended to every entity's own.
    #[serde(default)]
    pub sim_args: String,
    /// Sweep-wide frontend args prepended to every entity's own.
    #[serde(default)]
    pub frontend_args: String,
    #[serde(default = "default_stdout")]
    pub sim_stdout: String,
    #[serde(default = "default_stderr")]
    pub sim_stderr: String,
    #[serde(default = "default_frontend_stdout")]
    pub frontend_stdout: String,
    #[serde(default = "default_frontend_stderr")]
    pub frontend_stderr: String,
    #[serde(default = "default_launch_stdout")]
    pub launch_stdout: String,
    #[serde(default = "default_launch_stderr")]
    pub launch_stderr: String,
}

impl LaunchConfig {
    /// Renders the full launcher command line for one run.
    pub fn render(
        &self,
        results_dir: &Path,
        params_file: &Path,
        sim_args: &str,
        frontend_args: &str,
        selectors: &str,
    ) -> String {
        format!(
            "{launcher} --simulator {simulator} --frontend {frontend} \
             --frontend_args=\"{global_frontend} {frontend_args}\" \
             --sim_args=\"{global_sim} {sim_args}\" \
             --params {params} \
             --sim_stdout {dir}/{sim_stdout} --sim_stderr {dir}/{sim_stderr} \
             --frontend_stdout {dir}/{frontend_stdout} --frontend_stderr {dir}/{frontend_stderr}\
             {selectors}",
            launcher = self.launcher,
            simulator = self.simulator.display(),
            frontend = self.frontend.display(),
            global_frontend = self.frontend_args,
            global_sim = self.sim_args,
            params = params_file.display(),
            dir = results_dir.display(),
            sim_stdout = self.sim_stdout,
            sim_stderr = self.sim_stderr,
            frontend_stdout = self.frontend_stdout,
            frontend_stderr = self.frontend_stderr,
        )
    }
}
