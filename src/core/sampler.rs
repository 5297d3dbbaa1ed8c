use rand::Rng;

use super::error::SimulationError;
use super::types::AnnualReturnTable;

/// Contiguous run of `horizon` table rows starting at `start`.
///
/// Only built by [`WindowSampler`], so its length always equals the horizon.
#[derive(Debug, Clone, Copy)]
pub struct ReturnWindow<'a> {
    pub(crate) start: usize,
    pub(crate) rows: &'a [Vec<f64>],
}

impl<'a> ReturnWindow<'a> {
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn rows(&self) -> &'a [Vec<f64>] {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Draws historical windows of a fixed horizon from a shared table.
///
/// Windows keep the original year-to-year ordering so crash clustering and
/// recoveries survive the resampling.
#[derive(Debug, Clone, Copy)]
pub struct WindowSampler<'a> {
    table: &'a AnnualReturnTable,
    horizon: usize,
    max_start: usize,
}

impl<'a> WindowSampler<'a> {
    pub fn new(table: &'a AnnualReturnTable, horizon: usize) -> Result<Self, SimulationError> {
        let available = table.len();
        if horizon == 0 || available <= horizon {
            return Err(SimulationError::InsufficientHistory {
                available_years: available,
                horizon_years: horizon,
            });
        }

        Ok(Self {
            table,
            horizon,
            max_start: available - horizon,
        })
    }

    /// Exclusive upper bound of the start index.
    pub fn max_start(&self) -> usize {
        self.max_start
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn window_at(&self, start: usize) -> Option<ReturnWindow<'a>> {
        let rows = self.table.rows().get(start..start.checked_add(self.horizon)?)?;
        Some(ReturnWindow { start, rows })
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ReturnWindow<'a> {
        let start = rng.gen_range(0..self.max_start);
        let rows = &self.table.rows()[start..start + self.horizon];
        ReturnWindow { start, rows }
    }
}
