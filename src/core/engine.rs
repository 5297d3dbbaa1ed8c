use log::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;

use super::error::SimulationError;
use super::sampler::WindowSampler;
use super::simulator::{PathSimulator, PortfolioWeights};
use super::types::{
    AnnualReturnTable, Execution, FinalValueSummary, PathTrajectory, RunOptions,
    SimulationParameters, SimulationReport, YearPercentiles,
};

#[derive(Debug)]
struct SampledPath {
    window_start: usize,
    trajectory: PathTrajectory,
}

/// Folds paths in index order. Best/worst only move on strict improvement,
/// so ties resolve to the earliest path.
struct ReportAccumulator {
    horizon_years: usize,
    trajectories: Vec<PathTrajectory>,
    window_starts: Vec<usize>,
    depleted_count: usize,
    best_index: usize,
    best_final: f64,
    worst_index: usize,
    worst_final: f64,
}

impl ReportAccumulator {
    fn new(path_count: usize, horizon_years: usize) -> Self {
        Self {
            horizon_years,
            trajectories: Vec::with_capacity(path_count),
            window_starts: Vec::with_capacity(path_count),
            depleted_count: 0,
            best_index: 0,
            best_final: f64::NEG_INFINITY,
            worst_index: 0,
            worst_final: f64::INFINITY,
        }
    }

    fn push(&mut self, path: SampledPath) {
        let index = self.trajectories.len();
        let final_value = path.trajectory.final_value();

        if path.trajectory.is_depleted() {
            self.depleted_count += 1;
        }
        if final_value > self.best_final {
            self.best_final = final_value;
            self.best_index = index;
        }
        if final_value < self.worst_final {
            self.worst_final = final_value;
            self.worst_index = index;
        }

        self.window_starts.push(path.window_start);
        self.trajectories.push(path.trajectory);
    }

    fn into_report(self) -> SimulationReport {
        let path_count = self.trajectories.len();
        let depletion_probability = if path_count == 0 {
            0.0
        } else {
            self.depleted_count as f64 / path_count as f64
        };
        let best_trajectory = self
            .trajectories
            .get(self.best_index)
            .cloned()
            .unwrap_or_default();
        let worst_trajectory = self
            .trajectories
            .get(self.worst_index)
            .cloned()
            .unwrap_or_default();

        SimulationReport {
            horizon_years: self.horizon_years,
            path_count,
            trajectories: self.trajectories,
            depleted_count: self.depleted_count,
            depletion_probability,
            best_trajectory,
            worst_trajectory,
            best_path_index: self.best_index,
            worst_path_index: self.worst_index,
            window_starts: self.window_starts,
        }
    }
}

/// Runs `path_count` historical block-bootstrap paths against `table`.
///
/// All setup errors (missing series, too little history) surface before the
/// first path is drawn. Each path seeds its own RNG from `(seed, path index)`,
/// so sequential and parallel execution return identical reports.
pub fn run_simulation(
    params: &SimulationParameters,
    table: &AnnualReturnTable,
    options: &RunOptions,
) -> Result<SimulationReport, SimulationError> {
    let weights = PortfolioWeights::resolve(params.allocation(), table)?;
    let sampler = WindowSampler::new(table, params.horizon_years())?;
    let simulator = PathSimulator::new(params, &weights, options.depletion_policy);

    debug!(
        "sampling {} paths of {} years from {} historical years ({} start positions)",
        params.path_count(),
        params.horizon_years(),
        table.len(),
        sampler.max_start()
    );

    let simulate_path = |path_index: usize| {
        let mut rng = StdRng::seed_from_u64(derive_seed(options.seed, path_index as u64));
        let window = sampler.sample(&mut rng);
        SampledPath {
            window_start: window.start(),
            trajectory: simulator.simulate(&window),
        }
    };

    let mut acc = ReportAccumulator::new(params.path_count(), params.horizon_years());
    match options.execution {
        Execution::Sequential => {
            for path_index in 0..params.path_count() {
                acc.push(simulate_path(path_index));
            }
        }
        Execution::Parallel => {
            let paths: Vec<SampledPath> = (0..params.path_count())
                .into_par_iter()
                .map(simulate_path)
                .collect();
            for path in paths {
                acc.push(path);
            }
        }
    }

    let report = acc.into_report();
    info!(
        "simulated {} paths over {} years: depletion probability {:.4}",
        report.path_count, report.horizon_years, report.depletion_probability
    );
    Ok(report)
}

/// Per-year 5/25/50/75/95 percentiles across every path.
pub fn percentile_bands(report: &SimulationReport) -> Vec<YearPercentiles> {
    let mut column = Vec::with_capacity(report.trajectories.len());
    (0..report.horizon_years)
        .map(|year| {
            column.clear();
            column.extend(
                report
                    .trajectories
                    .iter()
                    .filter_map(|path| path.values.get(year).copied()),
            );
            YearPercentiles {
                year,
                p5: percentile(&mut column, 5.0),
                p25: percentile(&mut column, 25.0),
                median: percentile(&mut column, 50.0),
                p75: percentile(&mut column, 75.0),
                p95: percentile(&mut column, 95.0),
            }
        })
        .collect()
}

pub fn final_value_summary(report: &SimulationReport) -> FinalValueSummary {
    let mut finals = report
        .trajectories
        .iter()
        .map(PathTrajectory::final_value)
        .collect::<Vec<_>>();

    FinalValueSummary {
        best: report.best_trajectory.final_value(),
        median: percentile(&mut finals, 50.0),
        worst: report.worst_trajectory.final_value(),
        depletion_probability: report.depletion_probability,
    }
}

fn derive_seed(base_seed: u64, path_index: u64) -> u64 {
    splitmix64(base_seed.wrapping_add(path_index))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}
