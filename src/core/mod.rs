mod engine;
mod error;
mod params;
mod sampler;
mod simulator;
mod types;

pub use engine::{final_value_summary, percentile_bands, run_simulation};
pub use error::SimulationError;
pub use params::{
    AssetRegistry, ParameterInputs, ParameterLimits, WEIGHT_TOLERANCE, resolve_allocation,
};
pub use sampler::{ReturnWindow, WindowSampler};
pub use simulator::{PathSimulator, PortfolioWeights};
pub use types::{
    AllocationEntry, AnnualReturnTable, AssetAllocation, DepletionPolicy, Execution,
    FinalValueSummary, PathTrajectory, RunOptions, SimulationParameters, SimulationReport,
    YearPercentiles,
};
