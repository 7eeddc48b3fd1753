//! Aggregation of per-run frames along the entity hierarchy.
//!
//! The aggregate tree mirrors the benchmark/suite composition: benchmark
//! nodes roll their children up into one weighted-mean frame, suite nodes
//! keep their children side by side so per-benchmark granularity survives
//! into reporting. The tree is rebuilt fresh on every stats query.

use crate::frame::{StatError, StatFrame};
use std::fmt::Write as _;

#[derive(Debug, Clone)]
pub enum StatAggregate {
    /// One run's frame, with the fraction of the workload it stands in for.
    Leaf { weight: f64, frame: StatFrame },
    /// Weighted collection whose stats are averaged together.
    Benchmark {
        label: String,
        weight: f64,
        children: Vec<StatAggregate>,
    },
    /// Grouping collection whose members are reported side by side.
    Suite {
        label: String,
        children: Vec<StatAggregate>,
    },
}

impl StatAggregate {
    pub fn leaf(weight: f64, frame: StatFrame) -> Self {
        Self::Leaf { weight, frame }
    }

    pub fn benchmark(label: impl Into<String>, children: Vec<StatAggregate>) -> Self {
        Self::Benchmark {
            label: label.into(),
            weight: 1.0,
            children,
        }
    }

    pub fn suite(label: impl Into<String>, children: Vec<StatAggregate>) -> Self {
        Self::Suite {
            label: label.into(),
            children,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Leaf { frame, .. } => frame.label(),
            Self::Benchmark { label, .. } | Self::Suite { label, .. } => label,
        }
    }

    fn weight(&self) -> f64 {
        match self {
            Self::Leaf { weight, .. } => *weight,
            Self::Benchmark { weight, .. } => *weight,
            Self::Suite { .. } => 1.0,
        }
    }

    /// Collapses this subtree into a single frame: the weighted mean of
    /// every run below it. Pruned low-weight children are handled by the
    /// normalize step, which divides by the weight actually accumulated
    /// rather than assuming the weights sum to one.
    pub fn roll_up(&self) -> StatFrame {
        match self {
            Self::Leaf { frame, .. } => frame.clone(),
            Self::Benchmark {
                label, children, ..
            }
            | Self::Suite { label, children } => {
                let mut acc: Option<StatFrame> = None;
                for child in children {
                    let mut frame = child.roll_up();
                    frame.apply_weight(child.weight());
                    match &mut acc {
                        None => acc = Some(frame),
                        Some(acc) => {
                            acc.accumulate(&frame);
                        }
                    }
                }
                let mut rolled = acc.unwrap_or_else(|| StatFrame::from_rows(label.clone(), &[]));
                rolled.normalize();
                rolled.set_label(label.clone());
                rolled
            }
        }
    }

    /// Flattens the tree into labeled report frames: one entry per leaf or
    /// benchmark, suites expanded in place. Each entry is independently
    /// normalized; nothing is merged across suite members.
    pub fn report(&self) -> Vec<StatFrame> {
        match self {
            Self::Leaf { .. } | Self::Benchmark { .. } => vec![self.roll_up()],
            Self::Suite { children, .. } => {
                children.iter().flat_map(StatAggregate::report).collect()
            }
        }
    }
}

/// One row per run label for a chosen stat and core, with the comparison
/// transforms the reporting CLI exposes.
#[derive(Debug, Clone)]
pub struct SummaryTable {
    pub stat: String,
    pub core: usize,
    pub entries: Vec<(String, f64)>,
}

impl SummaryTable {
    /// Builds the table by looking the stat up in every report frame;
    /// equations are defined on each frame before lookup. Frames that are
    /// missing the stat (or all data) contribute NaN entries so a partially
    /// failed sweep still reports.
    pub fn build(stat_spec: &str, core: usize, frames: &mut [StatFrame]) -> Result<Self, StatError> {
        let display_name = stat_spec
            .split('=')
            .next()
            .unwrap_or(stat_spec)
            .trim()
            .to_string();
        let mut entries = Vec::new();
        for frame in frames.iter_mut() {
            let value = frame.lookup(stat_spec, core)?;
            entries.push((frame.label().to_string(), value));
        }
        Ok(Self {
            stat: display_name,
            core,
            entries,
        })
    }

    fn base_value(&self, base: &str) -> Result<f64, StatError> {
        self.entries
            .iter()
            .find(|(label, _)| label == base)
            .map(|(_, value)| *value)
            .ok_or_else(|| StatError::BaseNotFound(base.to_string()))
    }

    /// Divides every entry by the named baseline entry.
    pub fn speedup(&mut self, base: &str) -> Result<(), StatError> {
        let base_value = self.base_value(base)?;
        for (_, value) in &mut self.entries {
            *value /= base_value;
        }
        Ok(())
    }

    /// Relative improvement over the named baseline: (base - x) / base.
    pub fn improvement(&mut self, base: &str) -> Result<(), StatError> {
        let base_value = self.base_value(base)?;
        for (_, value) in &mut self.entries {
            *value = (base_value - *value) / base_value;
        }
        Ok(())
    }

    /// Arithmetic mean, ignoring NaN entries.
    pub fn amean(&self) -> f64 {
        let present: Vec<f64> = self
            .entries
            .iter()
            .map(|(_, v)| *v)
            .filter(|v| !v.is_nan())
            .collect();
        if present.is_empty() {
            return f64::NAN;
        }
        present.iter().sum::<f64>() / present.len() as f64
    }

    /// Geometric mean, ignoring NaN entries.
    pub fn gmean(&self) -> f64 {
        let present: Vec<f64> = self
            .entries
            .iter()
            .map(|(_, v)| *v)
            .filter(|v| !v.is_nan())
            .collect();
        if present.is_empty() {
            return f64::NAN;
        }
        (present.iter().map(|v| v.ln()).sum::<f64>() / present.len() as f64).exp()
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "label,{}", self.stat);
        for (label, value) in &self.entries {
            let _ = writeln!(out, "{label},{value}");
        }
        out
    }

    pub fn render(&self) -> String {
        let width = self
            .entries
            .iter()
            .map(|(label, _)| label.len())
            .max()
            .unwrap_or(0)
            .max(8);
        let mut out = String::new();
        let _ = writeln!(out, "{:<width$}  {} (core {})", "", self.stat, self.core);
        for (label, value) in &self.entries {
            let _ = writeln!(out, "{label:<width$}  {value:>12.2}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(label: &str, weight: f64, x: f64) -> StatAggregate {
        StatAggregate::leaf(weight, StatFrame::from_rows(label, &[("x", &[x])]))
    }

    #[test]
    fn benchmark_roll_up_is_the_weighted_mean() {
        let bench = StatAggregate::benchmark(
            "bench",
            vec![leaf("a", 0.5, 10.0), leaf("b", 0.3, 20.0), leaf("c", 0.2, 40.0)],
        );
        let rolled = bench.roll_up();
        // 0.5*10 + 0.3*20 + 0.2*40 = 19, weights sum to 1.
        assert!((rolled.value("x", 0).unwrap() - 19.0).abs() < 1e-9);
        assert_eq!(rolled.label(), "bench");
    }

    #[test]
    fn roll_up_renormalizes_pruned_weights() {
        // Weights deliberately do not sum to 1: a low-weight child was
        // pruned during setup. The mean must renormalize by 0.9, not 1.0.
        let bench =
            StatAggregate::benchmark("bench", vec![leaf("a", 0.6, 10.0), leaf("b", 0.3, 20.0)]);
        let rolled = bench.roll_up();
        let expected = (0.6 * 10.0 + 0.3 * 20.0) / 0.9;
        assert!((rolled.value("x", 0).unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn two_exec_collection_normalizes_to_fourteen() {
        let bench =
            StatAggregate::benchmark("bench", vec![leaf("a", 0.6, 10.0), leaf("b", 0.4, 20.0)]);
        assert!((bench.roll_up().value("x", 0).unwrap() - 14.0).abs() < 1e-9);
    }

    #[test]
    fn suite_reports_children_side_by_side() {
        let suite = StatAggregate::suite(
            "suite",
            vec![
                StatAggregate::benchmark("gcc", vec![leaf("g1", 0.5, 4.0), leaf("g2", 0.5, 8.0)]),
                leaf("mcf", 1.0, 3.0),
            ],
        );
        let report = suite.report();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].label(), "gcc");
        assert!((report[0].value("x", 0).unwrap() - 6.0).abs() < 1e-9);
        assert_eq!(report[1].label(), "mcf");
        assert_eq!(report[1].value("x", 0), Some(3.0));
    }

    #[test]
    fn summary_table_speedup_and_means() {
        let mut frames = vec![
            StatFrame::from_rows("base", &[("cycles", &[100.0])]),
            StatFrame::from_rows("fast", &[("cycles", &[50.0])]),
            StatFrame::from_rows("slow", &[("cycles", &[200.0])]),
        ];
        let mut table = SummaryTable::build("cycles", 0, &mut frames).unwrap();
        table.speedup("base").unwrap();
        assert_eq!(table.entries[0].1, 1.0);
        assert_eq!(table.entries[1].1, 0.5);
        assert_eq!(table.entries[2].1, 2.0);
        assert!((table.amean() - (3.5 / 3.0)).abs() < 1e-9);
        assert!((table.gmean() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn summary_table_skips_nan_in_means() {
        let mut frames = vec![
            StatFrame::from_rows("ok", &[("x", &[2.0])]),
            StatFrame::from_rows("broken", &[("other", &[1.0])]),
        ];
        let table = SummaryTable::build("x", 0, &mut frames).unwrap();
        assert!(table.entries[1].1.is_nan());
        assert_eq!(table.amean(), 2.0);
        assert_eq!(table.gmean(), 2.0);
    }

    #[test]
    fn summary_table_unknown_base_errors() {
        let mut frames = vec![StatFrame::from_rows("a", &[("x", &[1.0])])];
        let mut table = SummaryTable::build("x", 0, &mut frames).unwrap();
        assert!(matches!(
            table.speedup("nonexistent"),
            Err(StatError::BaseNotFound(_))
        ));
    }

    #[test]
    fn summary_table_evaluates_equations_per_frame() {
        let mut frames = vec![
            StatFrame::from_rows("a", &[("insts", &[100.0]), ("cycles", &[50.0])]),
            StatFrame::from_rows("b", &[("insts", &[100.0]), ("cycles", &[25.0])]),
        ];
        let table = SummaryTable::build("IPC = insts / cycles", 0, &mut frames).unwrap();
        assert_eq!(table.stat, "IPC");
        assert_eq!(table.entries[0].1, 2.0);
        assert_eq!(table.entries[1].1, 4.0);
    }

    #[test]
    fn csv_export_round_trips_labels() {
        let mut frames = vec![StatFrame::from_rows("gcc", &[("x", &[1.5])])];
        let table = SummaryTable::build("x", 0, &mut frames).unwrap();
        let csv = table.to_csv();
        assert!(csv.starts_with("label,x\n"));
        assert!(csv.contains("gcc,1.5"));
    }
}
