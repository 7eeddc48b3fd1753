//! Live/finished/failed classification of a run from its log artifacts.
//!
//! The simulator writes line-oriented markers into its stdout/stderr
//! streams (`Heartbeat: NN% -- msg`, `Finished: insts:N cycles:N`,
//! `Warning:`, `Error:`, `ASSERT`) and echoes its parameters into
//! `PARAMS.out` at startup. Classification re-reads those artifacts on
//! every query; it holds no state between calls, so the same artifacts
//! always classify the same way.

use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const KEYWORDS: &[&str] = &["Notify:", "Warning:", "Heartbeat:", "Finished:"];
const FAILWORDS: &[&str] = &["Error:", "ASSERT"];
const PARAMS_ECHO: &str = "PARAMS.out";
const BAR_UNITS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobStatus {
    NotStarted = 0,
    Running = 1,
    Success = 2,
    Fail = 3,
}

#[derive(Debug, Clone)]
pub struct Progress {
    pub results_dir: PathBuf,
    pub status: JobStatus,
    /// Percent complete; only meaningful while Running.
    pub percent: u32,
    pub message: String,
}

fn heartbeat_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Heartbeat:\s+([0-9]+)%.*--(.*)$").expect("static regex"))
}

fn finished_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Finished:\s+insts:([0-9]+)\s+cycles:([0-9]+)").expect("static regex")
    })
}

fn inst_limit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^--inst_limit\s+([0-9]+)").expect("static regex"))
}

impl Progress {
    /// Classifies one run from its results directory.
    pub fn classify(results_dir: &Path) -> Self {
        let results_dir = results_dir.to_path_buf();
        if !results_dir.is_dir() {
            return Self {
                results_dir,
                status: JobStatus::NotStarted,
                percent: 0,
                message: "Results directory does not exist.".to_string(),
            };
        }
        let lines = read_marker_lines(&results_dir);
        // The Finished: marker alone decides whether the run terminated.
        if lines.get("Finished:").is_some_and(|l| !l.is_empty()) {
            completion_status(&results_dir, &lines)
        } else {
            running_status(&results_dir, &lines)
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == JobStatus::Fail
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .results_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        write!(f, "{name:<40}: {}", self.message)
    }
}

/// Collects every marker-bearing line from the run's stdout/stderr streams,
/// keyed by the marker that matched.
fn read_marker_lines(results_dir: &Path) -> BTreeMap<&'static str, Vec<String>> {
    let mut lines: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
    for keyword in KEYWORDS.iter().chain(FAILWORDS) {
        lines.insert(keyword, Vec::new());
    }
    let Ok(entries) = fs::read_dir(results_dir) else {
        return lines;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if !(name.ends_with(".stdout") || name.ends_with(".stderr")) {
            continue;
        }
        let Ok(contents) = fs::read_to_string(entry.path()) else {
            continue;
        };
        for line in contents.lines() {
            for keyword in KEYWORDS.iter().chain(FAILWORDS) {
                if line.contains(keyword) {
                    if let Some(bucket) = lines.get_mut(keyword) {
                        bucket.push(line.trim_end().to_string());
                    }
                }
            }
        }
    }
    lines
}

fn has_core_dump(results_dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(results_dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        entry
            .file_name()
            .to_string_lossy()
            .ends_with("core")
    })
}

/// Reads the configured instruction limit from the echoed-parameters
/// artifact. Zero when the artifact or the knob is missing.
fn read_inst_limit(results_dir: &Path) -> u64 {
    let Ok(contents) = fs::read_to_string(results_dir.join(PARAMS_ECHO)) else {
        return 0;
    };
    for line in contents.lines() {
        if let Some(captures) = inst_limit_re().captures(line) {
            if let Ok(limit) = captures[1].parse() {
                return limit;
            }
        }
    }
    0
}

fn completion_status(
    results_dir: &Path,
    lines: &BTreeMap<&'static str, Vec<String>>,
) -> Progress {
    let mut progress = Progress {
        results_dir: results_dir.to_path_buf(),
        status: JobStatus::Fail,
        percent: 0,
        message: String::new(),
    };

    if has_core_dump(results_dir) {
        progress.message = "Run failed: core dumped.".to_string();
        return progress;
    }
    for failword in FAILWORDS {
        if let Some(found) = lines.get(failword) {
            if !found.is_empty() {
                progress.message = format!("Run failed.\n\t{}", found.join("\n\t"));
                return progress;
            }
        }
    }
    let inst_limit = read_inst_limit(results_dir);
    for line in lines.get("Finished:").into_iter().flatten() {
        let Some(captures) = finished_re().captures(line) else {
            continue;
        };
        let insts: u64 = captures[1].parse().unwrap_or(0);
        let cycles: u64 = captures[2].parse().unwrap_or(0);
        if insts < inst_limit {
            progress.message = format!(
                "Run finished, but did not reach inst_limit: inst_limit={inst_limit}, reached={insts}"
            );
            return progress;
        }
        if cycles == 0 {
            progress.message = "Run finished, but cycle count is 0".to_string();
            return progress;
        }
    }

    progress.status = JobStatus::Success;
    progress.percent = 100;
    progress.message = "Run succeeded.".to_string();
    if let Some(warnings) = lines.get("Warning:") {
        if !warnings.is_empty() {
            progress.message.push_str("\n\t");
            progress.message.push_str(&warnings.join("\n\t"));
        }
    }
    progress
}

fn running_status(
    results_dir: &Path,
    lines: &BTreeMap<&'static str, Vec<String>>,
) -> Progress {
    let mut progress = Progress {
        results_dir: results_dir.to_path_buf(),
        status: JobStatus::NotStarted,
        percent: 0,
        message: String::new(),
    };
    // The echoed-parameters artifact is the earliest sign of life.
    if !results_dir.join(PARAMS_ECHO).exists() {
        progress.message = "Run has not started.".to_string();
        return progress;
    }
    progress.status = JobStatus::Running;
    let heartbeats = lines.get("Heartbeat:").cloned().unwrap_or_default();
    match heartbeats.last().and_then(|line| heartbeat_re().captures(line)) {
        Some(captures) => {
            progress.percent = captures[1].parse().unwrap_or(0);
            progress.message =
                render_progress_bar(progress.percent, captures[2].trim());
        }
        None => {
            progress.message = "No heartbeat found. Probably running...".to_string();
        }
    }
    progress
}

fn render_progress_bar(percent: u32, message: &str) -> String {
    let filled = (percent as usize * BAR_UNITS) / 100;
    let filled = filled.min(BAR_UNITS);
    format!(
        "[{}{}] - {message}",
        "=".repeat(filled),
        " ".repeat(BAR_UNITS - filled)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_params(dir: &Path, inst_limit: u64) {
        fs::write(
            dir.join("PARAMS.out"),
            format!("--mode full\n--inst_limit {inst_limit}\n"),
        )
        .unwrap();
    }

    #[test]
    fn missing_directory_is_not_started() {
        let progress = Progress::classify(Path::new("/nonexistent/run/dir"));
        assert_eq!(progress.status, JobStatus::NotStarted);
        assert!(progress.message.contains("does not exist"));
    }

    #[test]
    fn empty_directory_has_not_started() {
        let dir = TempDir::new().unwrap();
        let progress = Progress::classify(dir.path());
        assert_eq!(progress.status, JobStatus::NotStarted);
        assert!(progress.message.contains("has not started"));
    }

    #[test]
    fn params_echo_without_heartbeat_is_probably_running() {
        let dir = TempDir::new().unwrap();
        write_params(dir.path(), 1000);
        let progress = Progress::classify(dir.path());
        assert_eq!(progress.status, JobStatus::Running);
        assert_eq!(progress.percent, 0);
        assert!(progress.message.contains("Probably running"));
    }

    #[test]
    fn heartbeat_renders_a_progress_bar() {
        let dir = TempDir::new().unwrap();
        write_params(dir.path(), 1000);
        fs::write(
            dir.path().join("sim.stdout"),
            "Heartbeat:  10% -- warming up\nHeartbeat:  50% -- half way\n",
        )
        .unwrap();
        let progress = Progress::classify(dir.path());
        assert_eq!(progress.status, JobStatus::Running);
        assert_eq!(progress.percent, 50);
        assert!(progress.message.starts_with("[==============="));
        assert!(progress.message.contains("half way"));
    }

    #[test]
    fn finished_below_inst_limit_fails() {
        let dir = TempDir::new().unwrap();
        write_params(dir.path(), 5_000_000);
        fs::write(
            dir.path().join("sim.stdout"),
            "Finished: insts:4000000 cycles:1000000\n",
        )
        .unwrap();
        let progress = Progress::classify(dir.path());
        assert_eq!(progress.status, JobStatus::Fail);
        assert!(progress.message.contains("inst_limit"));
    }

    #[test]
    fn finished_at_inst_limit_succeeds() {
        let dir = TempDir::new().unwrap();
        write_params(dir.path(), 4_000_000);
        fs::write(
            dir.path().join("sim.stdout"),
            "Finished: insts:4000000 cycles:1000000\n",
        )
        .unwrap();
        let progress = Progress::classify(dir.path());
        assert_eq!(progress.status, JobStatus::Success);
    }

    #[test]
    fn zero_cycles_fails() {
        let dir = TempDir::new().unwrap();
        write_params(dir.path(), 100);
        fs::write(dir.path().join("sim.stdout"), "Finished: insts:200 cycles:0\n").unwrap();
        assert_eq!(Progress::classify(dir.path()).status, JobStatus::Fail);
    }

    #[test]
    fn core_dump_fails_even_with_passing_finished_line() {
        let dir = TempDir::new().unwrap();
        write_params(dir.path(), 100);
        fs::write(dir.path().join("sim.stdout"), "Finished: insts:200 cycles:50\n").unwrap();
        fs::write(dir.path().join("sim.core"), "").unwrap();
        let progress = Progress::classify(dir.path());
        assert_eq!(progress.status, JobStatus::Fail);
        assert!(progress.message.contains("core dumped"));
    }

    #[test]
    fn failword_lines_fail_and_are_reported() {
        let dir = TempDir::new().unwrap();
        write_params(dir.path(), 100);
        fs::write(
            dir.path().join("sim.stderr"),
            "Error: cache model exploded\nFinished: insts:200 cycles:50\n",
        )
        .unwrap();
        let progress = Progress::classify(dir.path());
        assert_eq!(progress.status, JobStatus::Fail);
        assert!(progress.message.contains("cache model exploded"));
    }

    #[test]
    fn warnings_append_to_success_message() {
        let dir = TempDir::new().unwrap();
        write_params(dir.path(), 100);
        fs::write(
            dir.path().join("sim.stdout"),
            "Warning: tlb pressure high\nFinished: insts:200 cycles:50\n",
        )
        .unwrap();
        let progress = Progress::classify(dir.path());
        assert_eq!(progress.status, JobStatus::Success);
        assert!(progress.message.contains("tlb pressure high"));
    }

    #[test]
    fn classification_is_idempotent() {
        let dir = TempDir::new().unwrap();
        write_params(dir.path(), 100);
        fs::write(dir.path().join("sim.stdout"), "Heartbeat:  30% -- going\n").unwrap();
        let first = Progress::classify(dir.path());
        let second = Progress::classify(dir.path());
        assert_eq!(first.status, second.status);
        assert_eq!(first.percent, second.percent);
        assert_eq!(first.message, second.message);
    }

    #[test]
    fn statuses_sort_for_reporting() {
        assert!(JobStatus::NotStarted < JobStatus::Running);
        assert!(JobStatus::Running < JobStatus::Success);
        assert!(JobStatus::Success < JobStatus::Fail);
    }
}
