use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use super::error::SimulationError;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationEntry {
    pub series_id: String,
    pub weight: f64,
}

/// Asset name to `{series_id, weight}`, validated by the parameter model.
///
/// Entries are kept sorted by asset name so the weighted-return sum is
/// evaluated in the same order on every run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AssetAllocation {
    entries: BTreeMap<String, AllocationEntry>,
}

impl AssetAllocation {
    pub(crate) fn from_entries(entries: BTreeMap<String, AllocationEntry>) -> Self {
        Self { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AllocationEntry)> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn get(&self, asset: &str) -> Option<&AllocationEntry> {
        self.entries.get(asset)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.entries.values().map(|e| e.weight).sum()
    }
}

/// Chronological annual returns, one row per calendar year and one column
/// per series id. Values are fractional (0.08 = +8%).
#[derive(Debug, Clone, PartialEq)]
pub struct AnnualReturnTable {
    series: Vec<String>,
    years: Option<Vec<i32>>,
    rows: Vec<Vec<f64>>,
}

impl AnnualReturnTable {
    pub fn new(series: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self, SimulationError> {
        if series.is_empty() {
            return Err(SimulationError::invalid_table("no series columns"));
        }

        let mut seen = HashSet::with_capacity(series.len());
        for id in &series {
            if id.trim().is_empty() {
                return Err(SimulationError::invalid_table("empty series id"));
            }
            if !seen.insert(id.as_str()) {
                return Err(SimulationError::invalid_table(format!(
                    "duplicate series '{id}'"
                )));
            }
        }

        for (idx, row) in rows.iter().enumerate() {
            if row.len() != series.len() {
                return Err(SimulationError::invalid_table(format!(
                    "row {idx} has {} values, expected {}",
                    row.len(),
                    series.len()
                )));
            }
            if let Some(col) = row.iter().position(|v| !v.is_finite()) {
                return Err(SimulationError::invalid_table(format!(
                    "row {idx} has a non-finite return for '{}'",
                    series[col]
                )));
            }
        }

        Ok(Self {
            series,
            years: None,
            rows,
        })
    }

    /// Attaches calendar years to the rows. Years must be consecutive.
    pub fn with_years(mut self, years: Vec<i32>) -> Result<Self, SimulationError> {
        if years.len() != self.rows.len() {
            return Err(SimulationError::invalid_table(format!(
                "{} years given for {} rows",
                years.len(),
                self.rows.len()
            )));
        }
        for pair in years.windows(2) {
            if pair[0].checked_add(1) != Some(pair[1]) {
                return Err(SimulationError::invalid_table(format!(
                    "years must be consecutive, found {} followed by {}",
                    pair[0], pair[1]
                )));
            }
        }
        self.years = Some(years);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn series(&self) -> &[String] {
        &self.series
    }

    pub fn column_index(&self, series_id: &str) -> Option<usize> {
        self.series.iter().position(|s| s == series_id)
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn year_at(&self, row: usize) -> Option<i32> {
        self.years.as_ref().and_then(|years| years.get(row).copied())
    }

    pub fn first_year(&self) -> Option<i32> {
        self.year_at(0)
    }
}

/// What to record for the year in which a withdrawal drives the balance
/// to or below zero.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DepletionPolicy {
    /// Keep the negative balance in the trajectory; only later years are zero.
    #[default]
    PreserveNegative,
    /// Record the depleting year as zero.
    ClampToZero,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Execution {
    #[default]
    Sequential,
    Parallel,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RunOptions {
    pub seed: u64,
    pub execution: Execution,
    pub depletion_policy: DepletionPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            seed: 42,
            execution: Execution::Sequential,
            depletion_policy: DepletionPolicy::PreserveNegative,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationParameters {
    pub(crate) initial_balance: f64,
    pub(crate) annual_withdrawal: f64,
    pub(crate) horizon_years: usize,
    pub(crate) path_count: usize,
    pub(crate) allocation: AssetAllocation,
}

impl SimulationParameters {
    pub fn initial_balance(&self) -> f64 {
        self.initial_balance
    }

    pub fn annual_withdrawal(&self) -> f64 {
        self.annual_withdrawal
    }

    pub fn horizon_years(&self) -> usize {
        self.horizon_years
    }

    pub fn path_count(&self) -> usize {
        self.path_count
    }

    pub fn allocation(&self) -> &AssetAllocation {
        &self.allocation
    }
}

/// End-of-year portfolio values for one simulated path.
///
/// `values` always holds exactly `horizon_years` entries. When the path is
/// depleted, `depleted_from` is the index of the first zero-filled year; it
/// equals the horizon when the final simulated year itself ended at or
/// below zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathTrajectory {
    pub values: Vec<f64>,
    pub depleted_from: Option<usize>,
}

impl PathTrajectory {
    pub fn final_value(&self) -> f64 {
        self.values.last().copied().unwrap_or(0.0)
    }

    pub fn is_depleted(&self) -> bool {
        self.depleted_from.is_some()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub horizon_years: usize,
    pub path_count: usize,
    pub trajectories: Vec<PathTrajectory>,
    pub depleted_count: usize,
    pub depletion_probability: f64,
    pub best_trajectory: PathTrajectory,
    pub worst_trajectory: PathTrajectory,
    pub best_path_index: usize,
    pub worst_path_index: usize,
    /// Table row at which each path's historical window started.
    pub window_starts: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearPercentiles {
    pub year: usize,
    pub p5: f64,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalValueSummary {
    pub best: f64,
    pub median: f64,
    pub worst: f64,
    pub depletion_probability: f64,
}
