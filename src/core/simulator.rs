use super::error::SimulationError;
use super::sampler::ReturnWindow;
use super::types::{
    AnnualReturnTable, AssetAllocation, DepletionPolicy, PathTrajectory, SimulationParameters,
};

/// Allocation weights bound to table column positions.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioWeights {
    columns: Vec<(usize, f64)>,
}

impl PortfolioWeights {
    pub fn resolve(
        allocation: &AssetAllocation,
        table: &AnnualReturnTable,
    ) -> Result<Self, SimulationError> {
        let mut columns = Vec::with_capacity(allocation.len());
        for (asset, entry) in allocation.iter() {
            let column = table.column_index(&entry.series_id).ok_or_else(|| {
                SimulationError::MissingSeries {
                    asset: asset.to_string(),
                    series_id: entry.series_id.clone(),
                }
            })?;
            columns.push((column, entry.weight));
        }
        Ok(Self { columns })
    }

    /// Rebalanced portfolio return for one table row.
    pub fn weighted_return(&self, row: &[f64]) -> f64 {
        self.columns
            .iter()
            .map(|&(column, weight)| weight * row[column])
            .sum()
    }
}

pub struct PathSimulator<'a> {
    params: &'a SimulationParameters,
    weights: &'a PortfolioWeights,
    policy: DepletionPolicy,
}

impl<'a> PathSimulator<'a> {
    pub fn new(
        params: &'a SimulationParameters,
        weights: &'a PortfolioWeights,
        policy: DepletionPolicy,
    ) -> Self {
        Self {
            params,
            weights,
            policy,
        }
    }

    /// Evolves one portfolio through `window`: withdraw at the start of each
    /// year, then grow by the weighted return.
    ///
    /// Once the balance is at or below zero the path stops and the remaining
    /// years stay zero.
    pub fn simulate(&self, window: &ReturnWindow<'_>) -> PathTrajectory {
        let horizon = self.params.horizon_years;
        let mut values = vec![0.0; horizon];
        let mut balance = self.params.initial_balance;
        let mut recorded = 0;

        for (year, row) in window.rows.iter().take(horizon).enumerate() {
            if balance <= 0.0 {
                break;
            }
            balance -= self.params.annual_withdrawal;
            let r = self.weights.weighted_return(row);
            balance += balance * r;
            values[year] = balance;
            recorded = year + 1;
        }

        if balance > 0.0 {
            return PathTrajectory {
                values,
                depleted_from: None,
            };
        }

        if self.policy == DepletionPolicy::ClampToZero && recorded > 0 {
            let last = &mut values[recorded - 1];
            *last = last.max(0.0);
        }

        PathTrajectory {
            values,
            depleted_from: Some(recorded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::{AssetRegistry, ParameterInputs, ParameterLimits};
    use crate::core::sampler::WindowSampler;

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn single_asset(balance: f64, withdrawal: f64, horizon: i64) -> SimulationParameters {
        SimulationParameters::new(
            &ParameterInputs {
                initial_balance: balance,
                annual_withdrawal: withdrawal,
                horizon_years: horizon,
                path_count: 1,
                weights: vec![("Stocks".to_string(), 1.0)],
            },
            &AssetRegistry::empty().with_asset("Stocks", "STK"),
            &ParameterLimits::default(),
        )
        .expect("valid parameters")
    }

    fn returns(values: &[f64]) -> AnnualReturnTable {
        AnnualReturnTable::new(
            vec!["STK".to_string()],
            values.iter().map(|r| vec![*r]).collect(),
        )
        .expect("valid table")
    }

    fn run(
        params: &SimulationParameters,
        table: &AnnualReturnTable,
        policy: DepletionPolicy,
    ) -> PathTrajectory {
        let weights = PortfolioWeights::resolve(params.allocation(), table).expect("series present");
        let window = ReturnWindow {
            start: 0,
            rows: &table.rows()[..params.horizon_years()],
        };
        PathSimulator::new(params, &weights, policy).simulate(&window)
    }

    #[test]
    fn withdraws_before_growth_each_year() {
        let params = single_asset(100_000.0, 10_000.0, 3);
        let table = returns(&[0.10, -0.05, 0.00]);
        let path = run(&params, &table, DepletionPolicy::PreserveNegative);

        assert_eq!(path.len(), 3);
        assert_approx(path.values[0], 99_000.0);
        assert_approx(path.values[1], 84_550.0);
        assert_approx(path.values[2], 74_550.0);
        assert!(!path.is_depleted());
    }

    #[test]
    fn depleting_year_keeps_negative_balance_by_default() {
        let params = single_asset(5_000.0, 10_000.0, 1);
        let table = returns(&[0.0]);
        let path = run(&params, &table, DepletionPolicy::PreserveNegative);

        assert_eq!(path.values, vec![-5_000.0]);
        assert_eq!(path.depleted_from, Some(1));
    }

    #[test]
    fn clamp_policy_zeroes_depleting_year() {
        let params = single_asset(5_000.0, 10_000.0, 1);
        let table = returns(&[0.0]);
        let path = run(&params, &table, DepletionPolicy::ClampToZero);

        assert_eq!(path.values, vec![0.0]);
        assert_eq!(path.depleted_from, Some(1));
    }

    #[test]
    fn early_depletion_zero_fills_remaining_years() {
        let params = single_asset(15_000.0, 10_000.0, 5);
        let table = returns(&[0.0, 0.0, 0.0, 0.0, 0.0]);
        let path = run(&params, &table, DepletionPolicy::PreserveNegative);

        assert_eq!(path.values, vec![5_000.0, -5_000.0, 0.0, 0.0, 0.0]);
        assert_eq!(path.depleted_from, Some(2));
        assert_eq!(path.final_value(), 0.0);
    }

    #[test]
    fn zero_initial_balance_is_depleted_before_the_first_year() {
        let params = single_asset(0.0, 1_000.0, 3);
        let table = returns(&[0.1, 0.1, 0.1]);
        let path = run(&params, &table, DepletionPolicy::PreserveNegative);

        assert_eq!(path.values, vec![0.0; 3]);
        assert_eq!(path.depleted_from, Some(0));
    }

    #[test]
    fn balance_exactly_zero_counts_as_depleted() {
        let params = single_asset(10_000.0, 10_000.0, 2);
        let table = returns(&[0.5, 0.5]);
        let path = run(&params, &table, DepletionPolicy::PreserveNegative);

        assert_eq!(path.values, vec![0.0, 0.0]);
        assert_eq!(path.depleted_from, Some(1));
    }

    #[test]
    fn solvent_path_is_never_marked_depleted() {
        let params = single_asset(100_000.0, 1_000.0, 3);
        let table = returns(&[0.0, 0.0, 0.0, 0.0]);
        let weights = PortfolioWeights::resolve(params.allocation(), &table).expect("series present");
        let window = ReturnWindow {
            start: 0,
            rows: &table.rows()[..2],
        };
        let path = PathSimulator::new(&params, &weights, DepletionPolicy::default()).simulate(&window);

        assert_eq!(path.values, vec![99_000.0, 98_000.0, 0.0]);
        assert!(!path.is_depleted());
    }

    #[test]
    fn weighted_return_mixes_columns_by_weight() {
        let registry = AssetRegistry::empty()
            .with_asset("Stocks", "STK")
            .with_asset("Bonds", "BND");
        let params = SimulationParameters::new(
            &ParameterInputs {
                initial_balance: 1_000.0,
                annual_withdrawal: 0.0,
                horizon_years: 1,
                path_count: 1,
                weights: vec![("Stocks".to_string(), 0.6), ("Bonds".to_string(), 0.4)],
            },
            &registry,
            &ParameterLimits::default(),
        )
        .expect("valid parameters");
        let table = AnnualReturnTable::new(
            vec!["BND".to_string(), "STK".to_string()],
            vec![vec![0.05, 0.20], vec![0.0, 0.0]],
        )
        .expect("valid table");
        let weights = PortfolioWeights::resolve(params.allocation(), &table).expect("series present");
        assert_approx(weights.weighted_return(&table.rows()[0]), 0.6 * 0.20 + 0.4 * 0.05);

        let sampler = WindowSampler::new(&table, 1).expect("enough history");
        let window = sampler.window_at(0).expect("first window");
        let path = PathSimulator::new(&params, &weights, DepletionPolicy::default()).simulate(&window);
        assert_approx(path.values[0], 1_140.0);
    }

    #[test]
    fn missing_series_is_reported_with_asset_name() {
        let params = single_asset(1_000.0, 0.0, 1);
        let table = AnnualReturnTable::new(vec!["OTHER".to_string()], vec![vec![0.0]])
            .expect("valid table");
        let err = PortfolioWeights::resolve(params.allocation(), &table).expect_err("STK absent");
        assert_eq!(
            err,
            SimulationError::MissingSeries {
                asset: "Stocks".to_string(),
                series_id: "STK".to_string()
            }
        );
    }
}
