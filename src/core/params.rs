use std::collections::BTreeMap;

use super::error::SimulationError;
use super::types::{AllocationEntry, AssetAllocation, SimulationParameters};

pub const WEIGHT_TOLERANCE: f64 = 1e-6;

const DEFAULT_ASSETS: [(&str, &str); 4] = [
    ("Global Stocks", "^990100-USD-STRD"),
    ("American Bonds", "^FVX"),
    ("American Stocks", "^SP500TR"),
    ("European Stocks", "^STOXX50E"),
];

/// Fixed lookup from human-readable asset names to return-table series ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRegistry {
    series_by_name: BTreeMap<String, String>,
}

impl Default for AssetRegistry {
    fn default() -> Self {
        Self {
            series_by_name: DEFAULT_ASSETS
                .iter()
                .map(|(name, id)| (name.to_string(), id.to_string()))
                .collect(),
        }
    }
}

impl AssetRegistry {
    pub fn empty() -> Self {
        Self {
            series_by_name: BTreeMap::new(),
        }
    }

    pub fn with_asset(mut self, name: impl Into<String>, series_id: impl Into<String>) -> Self {
        self.insert(name, series_id);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, series_id: impl Into<String>) {
        self.series_by_name.insert(name.into(), series_id.into());
    }

    pub fn series_for(&self, name: &str) -> Option<&str> {
        self.series_by_name.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.series_by_name
            .iter()
            .map(|(name, id)| (name.as_str(), id.as_str()))
    }

    fn unknown(&self, name: &str) -> SimulationError {
        SimulationError::UnknownAsset {
            name: name.to_string(),
            available: self
                .series_by_name
                .keys()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// Sanity bounds that catch obvious input mistakes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterLimits {
    pub max_initial_balance: f64,
    pub max_annual_withdrawal: f64,
    pub max_horizon_years: i64,
    pub max_path_count: i64,
}

impl Default for ParameterLimits {
    fn default() -> Self {
        Self {
            max_initial_balance: 1e9,
            max_annual_withdrawal: 1e7,
            max_horizon_years: 100,
            max_path_count: 100_000,
        }
    }
}

/// Unvalidated inputs as they arrive from a form, CLI or request body.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterInputs {
    pub initial_balance: f64,
    pub annual_withdrawal: f64,
    pub horizon_years: i64,
    pub path_count: i64,
    /// Allocation weights keyed by asset name.
    pub weights: Vec<(String, f64)>,
}

impl SimulationParameters {
    pub fn new(
        inputs: &ParameterInputs,
        registry: &AssetRegistry,
        limits: &ParameterLimits,
    ) -> Result<Self, SimulationError> {
        check_range(
            "initial_balance",
            inputs.initial_balance,
            0.0,
            limits.max_initial_balance,
        )?;
        check_range(
            "annual_withdrawal",
            inputs.annual_withdrawal,
            0.0,
            limits.max_annual_withdrawal,
        )?;
        check_range(
            "horizon_years",
            inputs.horizon_years as f64,
            1.0,
            limits.max_horizon_years as f64,
        )?;
        check_range(
            "path_count",
            inputs.path_count as f64,
            1.0,
            limits.max_path_count as f64,
        )?;

        let allocation = resolve_allocation(&inputs.weights, registry)?;

        Ok(Self {
            initial_balance: inputs.initial_balance,
            annual_withdrawal: inputs.annual_withdrawal,
            horizon_years: inputs.horizon_years as usize,
            path_count: inputs.path_count as usize,
            allocation,
        })
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), SimulationError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(SimulationError::InvalidRange {
            field,
            value,
            min,
            max,
        })
    }
}

pub fn resolve_allocation(
    weights: &[(String, f64)],
    registry: &AssetRegistry,
) -> Result<AssetAllocation, SimulationError> {
    if weights.is_empty() {
        return Err(SimulationError::invalid_allocation("no assets given"));
    }

    let mut entries = BTreeMap::new();
    for (name, weight) in weights {
        let series_id = registry.series_for(name).ok_or_else(|| registry.unknown(name))?;
        if !weight.is_finite() || *weight < 0.0 {
            return Err(SimulationError::invalid_allocation(format!(
                "weight for '{name}' must be a non-negative number, got {weight}"
            )));
        }
        let entry = AllocationEntry {
            series_id: series_id.to_string(),
            weight: *weight,
        };
        if entries.insert(name.clone(), entry).is_some() {
            return Err(SimulationError::invalid_allocation(format!(
                "asset '{name}' is listed more than once"
            )));
        }
    }

    let allocation = AssetAllocation::from_entries(entries);
    let total = allocation.total_weight();
    if (total - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(SimulationError::invalid_allocation(format!(
            "weights must sum to 1.0, got {total}"
        )));
    }
    Ok(allocation)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(weights: &[(&str, f64)]) -> ParameterInputs {
        ParameterInputs {
            initial_balance: 1_500_000.0,
            annual_withdrawal: 30_000.0,
            horizon_years: 30,
            path_count: 2_000,
            weights: weights
                .iter()
                .map(|(name, w)| (name.to_string(), *w))
                .collect(),
        }
    }

    fn build(inputs: &ParameterInputs) -> Result<SimulationParameters, SimulationError> {
        SimulationParameters::new(inputs, &AssetRegistry::default(), &ParameterLimits::default())
    }

    #[test]
    fn resolves_asset_names_to_series_ids() {
        let params = build(&inputs(&[("Global Stocks", 0.7), ("American Bonds", 0.3)]))
            .expect("valid parameters");
        let allocation = params.allocation();
        assert_eq!(allocation.len(), 2);
        assert_eq!(
            allocation.get("Global Stocks").map(|e| e.series_id.as_str()),
            Some("^990100-USD-STRD")
        );
        assert_eq!(
            allocation.get("American Bonds").map(|e| e.series_id.as_str()),
            Some("^FVX")
        );
        assert_eq!(params.horizon_years(), 30);
        assert_eq!(params.path_count(), 2_000);
    }

    #[test]
    fn rejects_weights_that_do_not_sum_to_one() {
        let err = build(&inputs(&[("Global Stocks", 0.7), ("American Bonds", 0.2)]))
            .expect_err("0.9 total must be rejected");
        assert!(matches!(err, SimulationError::InvalidAllocation { .. }));
    }

    #[test]
    fn accepts_weights_within_tolerance() {
        let params = build(&inputs(&[
            ("Global Stocks", 0.1 + 0.2),
            ("American Bonds", 0.7),
        ]));
        assert!(params.is_ok());
    }

    #[test]
    fn rejects_negative_weight_even_when_total_is_one() {
        let err = build(&inputs(&[("Global Stocks", 1.2), ("American Bonds", -0.2)]))
            .expect_err("negative weight must be rejected");
        assert!(matches!(err, SimulationError::InvalidAllocation { .. }));
    }

    #[test]
    fn rejects_duplicate_and_empty_allocations() {
        let dup = build(&inputs(&[("Global Stocks", 0.5), ("Global Stocks", 0.5)]))
            .expect_err("duplicate asset must be rejected");
        assert!(dup.to_string().contains("more than once"));

        let empty = build(&inputs(&[])).expect_err("empty allocation must be rejected");
        assert!(matches!(empty, SimulationError::InvalidAllocation { .. }));
    }

    #[test]
    fn rejects_unknown_asset_and_lists_available_names() {
        let err = build(&inputs(&[("Gold", 1.0)])).expect_err("Gold is not registered");
        match err {
            SimulationError::UnknownAsset { name, available } => {
                assert_eq!(name, "Gold");
                assert!(available.contains("Global Stocks"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn custom_registry_entries_resolve() {
        let registry = AssetRegistry::empty().with_asset("Gold", "GC=F");
        let params = SimulationParameters::new(
            &inputs(&[("Gold", 1.0)]),
            &registry,
            &ParameterLimits::default(),
        )
        .expect("custom asset resolves");
        assert_eq!(
            params.allocation().get("Gold").map(|e| e.series_id.as_str()),
            Some("GC=F")
        );
    }

    #[test]
    fn rejects_scalars_outside_their_ranges() {
        let cases: [(&str, fn(&mut ParameterInputs)); 7] = [
            ("initial_balance", |p| p.initial_balance = -1.0),
            ("initial_balance", |p| p.initial_balance = f64::NAN),
            ("annual_withdrawal", |p| p.annual_withdrawal = 2e7),
            ("horizon_years", |p| p.horizon_years = 0),
            ("horizon_years", |p| p.horizon_years = 101),
            ("path_count", |p| p.path_count = -5),
            ("path_count", |p| p.path_count = 0),
        ];

        for (expected_field, mutate) in cases {
            let mut raw = inputs(&[("Global Stocks", 1.0)]);
            mutate(&mut raw);
            match build(&raw) {
                Err(SimulationError::InvalidRange { field, .. }) => {
                    assert_eq!(field, expected_field)
                }
                other => panic!("expected InvalidRange for {expected_field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn zero_balance_and_zero_withdrawal_are_valid() {
        let mut raw = inputs(&[("Global Stocks", 1.0)]);
        raw.initial_balance = 0.0;
        raw.annual_withdrawal = 0.0;
        assert!(build(&raw).is_ok());
    }

    #[test]
    fn range_checks_run_before_allocation_checks() {
        let mut raw = inputs(&[("Gold", 0.3)]);
        raw.horizon_years = 0;
        assert!(matches!(
            build(&raw),
            Err(SimulationError::InvalidRange { .. })
        ));
    }
}
