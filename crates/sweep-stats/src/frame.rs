//! Per-run stat tables.
//!
//! One simulator run leaves one stat file per simulated core in its results
//! directory (`<anything>.stat.<core>.out`). A [`StatFrame`] holds every
//! parsed counter for one run as a (stat name × core) table together with a
//! scalar weight, and implements the aggregation algebra used by the
//! benchmark roll-up: apply_weight, accumulate, normalize, intersect.

use crate::expr::{parse_equation, Expr, ExprError};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatError {
    #[error("baseline '{0}' not found in summary table")]
    BaseNotFound(String),
    #[error(transparent)]
    Expr(#[from] ExprError),
}

fn stat_file_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.stat\.([0-9]+)\.out$").expect("static regex"))
}

fn stat_line_re() -> &'static Regex {
    // Counter lines carry up to four value columns; the fourth is the one
    // unaffected by stat resets and is the value we keep.
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\S+)\s+([0-9.]+)\s+([0-9.nan-]+)?%?\s+([0-9.]+)\s*([0-9.nan-]+)?%?")
            .expect("static regex")
    })
}

#[derive(Debug, Clone)]
pub struct StatFrame {
    label: String,
    results_dir: Option<PathBuf>,
    weight: f64,
    no_data: bool,
    cores: BTreeSet<usize>,
    /// stat name -> core id -> value
    values: BTreeMap<String, BTreeMap<usize, f64>>,
    /// stat name -> origin file (or "equation")
    origins: BTreeMap<String, String>,
    equations: Vec<(String, Expr)>,
}

impl StatFrame {
    /// Parses every stat file in a run's results directory. A run that never
    /// produced stat files yields the distinguished no-data state, not an
    /// empty-but-valid table.
    pub fn from_results_dir(label: impl Into<String>, results_dir: &Path) -> Self {
        let mut frame = Self::empty(label);
        frame.results_dir = Some(results_dir.to_path_buf());
        frame.no_data = true;

        let entries = match fs::read_dir(results_dir) {
            Ok(entries) => entries,
            Err(_) => {
                tracing::warn!(dir = %results_dir.display(), "no stat files, skipping");
                return frame;
            }
        };
        for entry in entries.flatten() {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(captures) = stat_file_re().captures(&file_name) else {
                continue;
            };
            let Ok(core_id) = captures[1].parse::<usize>() else {
                continue;
            };
            frame.no_data = false;
            frame.parse_stat_file(&entry.path(), core_id);
        }
        if frame.no_data {
            tracing::warn!(dir = %results_dir.display(), "no stat files, skipping");
        }
        frame
    }

    /// Builds a frame from literal rows; each row lists one value per core,
    /// starting at core 0. Used when stats originate somewhere other than a
    /// results directory.
    pub fn from_rows(label: impl Into<String>, rows: &[(&str, &[f64])]) -> Self {
        let mut frame = Self::empty(label);
        for (stat, row) in rows {
            let cells: BTreeMap<usize, f64> =
                row.iter().copied().enumerate().collect();
            frame.cores.extend(cells.keys().copied());
            frame.values.insert((*stat).to_string(), cells);
            frame.origins.insert((*stat).to_string(), "literal".to_string());
        }
        frame
    }

    fn empty(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            results_dir: None,
            weight: 1.0,
            no_data: false,
            cores: BTreeSet::new(),
            values: BTreeMap::new(),
            origins: BTreeMap::new(),
            equations: Vec::new(),
        }
    }

    fn parse_stat_file(&mut self, path: &Path, core_id: usize) {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                tracing::warn!(file = %path.display(), error = %err, "unable to read stats file");
                return;
            }
        };
        self.cores.insert(core_id);
        for line in contents.lines() {
            let Some(captures) = stat_line_re().captures(line) else {
                continue;
            };
            let stat = captures[1].to_string();
            let Ok(value) = captures[4].parse::<f64>() else {
                continue;
            };
            self.origins
                .entry(stat.clone())
                .or_insert_with(|| path.display().to_string());
            self.values.entry(stat).or_default().insert(core_id, value);
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn no_data(&self) -> bool {
        self.no_data
    }

    pub fn cores(&self) -> &BTreeSet<usize> {
        &self.cores
    }

    pub fn stat_names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn origin(&self, stat: &str) -> Option<&str> {
        self.origins.get(stat).map(String::as_str)
    }

    pub fn value(&self, stat: &str, core: usize) -> Option<f64> {
        self.values.get(stat).and_then(|row| row.get(&core)).copied()
    }

    /// Multiplies every cell by `w` and records it on the frame's weight so
    /// a later normalize can undo the scaling.
    pub fn apply_weight(&mut self, w: f64) -> &mut Self {
        for row in self.values.values_mut() {
            for cell in row.values_mut() {
                *cell *= w;
            }
        }
        self.weight *= w;
        self.reevaluate();
        self
    }

    /// Cell-wise addition; weights add. Cells present on only one side
    /// become NaN rather than silently passing through unscaled. A no-data
    /// operand poisons the result: unavailable input stays unavailable.
    pub fn accumulate(&mut self, other: &StatFrame) -> &mut Self {
        self.weight += other.weight;
        if self.no_data || other.no_data {
            self.no_data = true;
            self.values.clear();
            self.cores.clear();
            return self;
        }
        self.cores.extend(other.cores.iter().copied());
        let stats: BTreeSet<String> = self
            .values
            .keys()
            .chain(other.values.keys())
            .cloned()
            .collect();
        for stat in stats {
            let cores = self.cores.clone();
            let row = self.values.entry(stat.clone()).or_default();
            for core in cores {
                let lhs = row.get(&core).copied();
                let rhs = other.value(&stat, core);
                let sum = match (lhs, rhs) {
                    (Some(a), Some(b)) => a + b,
                    _ => f64::NAN,
                };
                row.insert(core, sum);
            }
        }
        for (name, expr) in &other.equations {
            if !self.equations.iter().any(|(n, _)| n == name) {
                self.equations.push((name.clone(), expr.clone()));
            }
        }
        self.reevaluate();
        self
    }

    /// Divides every cell by the accumulated weight and resets the weight to
    /// 1.0, turning an accumulated sum into the weighted mean.
    pub fn normalize(&mut self) -> &mut Self {
        for row in self.values.values_mut() {
            for cell in row.values_mut() {
                *cell /= self.weight;
            }
        }
        self.weight = 1.0;
        self.reevaluate();
        self
    }

    /// Comparisons across partially-missing runs must not silently compare
    /// mismatched metric sets: if either side has no data, both become
    /// no-data, and stats absent from one side are dropped from both.
    pub fn intersect(&mut self, other: &mut StatFrame) {
        if self.no_data || other.no_data {
            self.no_data = true;
            other.no_data = true;
            self.values.clear();
            other.values.clear();
            self.cores.clear();
            other.cores.clear();
            return;
        }
        let shared: BTreeSet<String> = self
            .values
            .keys()
            .filter(|stat| other.values.contains_key(*stat))
            .cloned()
            .collect();
        self.values.retain(|stat, _| shared.contains(stat));
        other.values.retain(|stat, _| shared.contains(stat));
    }

    /// Defines (or redefines) a derived metric from a `name = expr` string,
    /// evaluating it once per core against this frame's current counters and
    /// inserting the result as a new row.
    pub fn define_stat(&mut self, spec: &str) -> Result<(), ExprError> {
        let (name, expr) = parse_equation(spec)?;
        self.equations.retain(|(n, _)| *n != name);
        self.equations.push((name, expr));
        self.reevaluate();
        Ok(())
    }

    /// Looks up a stat value for one core, defining it first when the
    /// request is an equation. A missing row or column degrades to NaN with
    /// a logged warning so reporting across heterogeneous runs keeps going.
    pub fn lookup(&mut self, stat_spec: &str, core: usize) -> Result<f64, ExprError> {
        let name = if stat_spec.contains('=') {
            self.define_stat(stat_spec)?;
            stat_spec
                .split('=')
                .next()
                .unwrap_or_default()
                .trim()
                .to_string()
        } else {
            stat_spec.trim().to_string()
        };
        match self.value(&name, core) {
            Some(value) => Ok(value),
            None => {
                tracing::warn!(
                    frame = %self.label,
                    stat = %name,
                    core,
                    "could not index frame, stat or core missing"
                );
                Ok(f64::NAN)
            }
        }
    }

    /// Derived metrics are functions of the underlying counters, so they are
    /// recomputed after every change to the table.
    fn reevaluate(&mut self) {
        if self.no_data {
            return;
        }
        let equations = std::mem::take(&mut self.equations);
        for (name, expr) in &equations {
            let mut row = BTreeMap::new();
            for &core in &self.cores {
                let value = expr
                    .eval(&|stat| {
                        self.values.get(stat).and_then(|r| r.get(&core)).copied()
                    })
                    .unwrap_or(f64::NAN);
                row.insert(core, value);
            }
            self.values.insert(name.clone(), row);
            self.origins.insert(name.clone(), "equation".to_string());
        }
        self.equations = equations;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn parses_per_core_stat_files() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("bench.stat.0.out"),
            "INST_COUNT  100  100%  4000000  100%\nCYCLE_COUNT  50  50%  2000000  100%\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("bench.stat.1.out"),
            "INST_COUNT  100  100%  3000000  100%\n",
        )
        .unwrap();
        let frame = StatFrame::from_results_dir("bench", dir.path());
        assert!(!frame.no_data());
        assert_eq!(frame.value("INST_COUNT", 0), Some(4_000_000.0));
        assert_eq!(frame.value("INST_COUNT", 1), Some(3_000_000.0));
        assert_eq!(frame.value("CYCLE_COUNT", 0), Some(2_000_000.0));
        assert!(frame.origin("INST_COUNT").unwrap().contains("bench.stat.0.out"));
    }

    #[test]
    fn missing_stat_files_mean_no_data_not_empty() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("unrelated.txt"), "nothing").unwrap();
        let frame = StatFrame::from_results_dir("bench", dir.path());
        assert!(frame.no_data());
    }

    #[test]
    fn weighted_mean_via_apply_accumulate_normalize() {
        let mut a = StatFrame::from_rows("a", &[("x", &[10.0])]);
        let mut b = StatFrame::from_rows("b", &[("x", &[20.0])]);
        a.apply_weight(0.6);
        b.apply_weight(0.4);
        a.accumulate(&b);
        a.normalize();
        assert!((a.value("x", 0).unwrap() - 14.0).abs() < 1e-9);
        assert!((a.weight() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn accumulate_marks_one_sided_stats_nan() {
        let mut a = StatFrame::from_rows("a", &[("x", &[1.0]), ("only_a", &[5.0])]);
        let b = StatFrame::from_rows("b", &[("x", &[2.0])]);
        a.accumulate(&b);
        assert_eq!(a.value("x", 0), Some(3.0));
        assert!(a.value("only_a", 0).unwrap().is_nan());
    }

    #[test]
    fn accumulating_no_data_poisons_the_sum() {
        let mut a = StatFrame::from_rows("a", &[("x", &[1.0])]);
        let dir = TempDir::new().unwrap();
        let empty = StatFrame::from_results_dir("empty", dir.path());
        a.accumulate(&empty);
        assert!(a.no_data());
        assert_eq!(a.value("x", 0), None);
    }

    #[test]
    fn intersect_propagates_no_data_to_both_sides() {
        let dir = TempDir::new().unwrap();
        let mut a = StatFrame::from_results_dir("a", dir.path());
        let mut b = StatFrame::from_rows("b", &[("x", &[1.0])]);
        assert!(a.no_data());
        assert!(!b.no_data());
        a.intersect(&mut b);
        assert!(a.no_data());
        assert!(b.no_data());
    }

    #[test]
    fn intersect_drops_unshared_stats() {
        let mut a = StatFrame::from_rows("a", &[("x", &[1.0]), ("only_a", &[2.0])]);
        let mut b = StatFrame::from_rows("b", &[("x", &[3.0]), ("only_b", &[4.0])]);
        a.intersect(&mut b);
        assert_eq!(a.stat_names().collect::<Vec<_>>(), vec!["x"]);
        assert_eq!(b.stat_names().collect::<Vec<_>>(), vec!["x"]);
    }

    #[test]
    fn derived_metric_reevaluates_after_accumulate() {
        let mut a = StatFrame::from_rows("a", &[("insts", &[100.0]), ("cycles", &[50.0])]);
        a.define_stat("IPC = insts / cycles").unwrap();
        assert_eq!(a.value("IPC", 0), Some(2.0));
        let b = StatFrame::from_rows("b", &[("insts", &[300.0]), ("cycles", &[50.0])]);
        a.accumulate(&b);
        // Recomputed from the accumulated counters, not the stale ratio.
        assert_eq!(a.value("IPC", 0), Some(4.0));
        assert_eq!(a.origin("IPC"), Some("equation"));
    }

    #[test]
    fn lookup_degrades_to_nan_for_missing_rows() {
        let mut frame = StatFrame::from_rows("a", &[("x", &[1.0])]);
        assert!(frame.lookup("missing_stat", 0).unwrap().is_nan());
        assert!(frame.lookup("x", 7).unwrap().is_nan());
        assert_eq!(frame.lookup("x", 0).unwrap(), 1.0);
    }
}
