use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error("invalid allocation: {reason}")]
    InvalidAllocation { reason: String },

    #[error("unknown asset '{name}'; available assets: {available}")]
    UnknownAsset { name: String, available: String },

    #[error("{field} must be between {min} and {max}, got {value}")]
    InvalidRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error(
        "insufficient history: {available_years} years of returns cannot cover a {horizon_years}-year horizon"
    )]
    InsufficientHistory {
        available_years: usize,
        horizon_years: usize,
    },

    #[error("series '{series_id}' required by asset '{asset}' is missing from the return table")]
    MissingSeries { asset: String, series_id: String },

    #[error("invalid return table: {reason}")]
    InvalidTable { reason: String },
}

impl SimulationError {
    pub(crate) fn invalid_allocation(reason: impl Into<String>) -> Self {
        Self::InvalidAllocation {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_table(reason: impl Into<String>) -> Self {
        Self::InvalidTable {
            reason: reason.into(),
        }
    }
}
