use axum::{
    Router,
    extract::{Json, Query, State, rejection::QueryRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Args, Parser, Subcommand};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::core::{
    AnnualReturnTable, AssetAllocation, AssetRegistry, DepletionPolicy, Execution,
    FinalValueSummary, ParameterInputs, ParameterLimits, PathTrajectory, RunOptions,
    SimulationError, SimulationParameters, SimulationReport, YearPercentiles,
    final_value_summary, percentile_bands, run_simulation,
};
use crate::data::{DataError, load_returns_csv};

const DEFAULT_ALLOCATION: [(&str, f64); 2] = [("Global Stocks", 0.7), ("American Bonds", 0.3)];

#[derive(Parser, Debug)]
#[command(
    name = "retirement-tester",
    about = "Historical block-bootstrap estimator of retirement portfolio depletion risk"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one simulation and print the result
    Run(RunArgs),
    /// Serve the JSON API
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct SimulationArgs {
    #[arg(long, default_value_t = 1_500_000.0)]
    initial_balance: f64,
    #[arg(long, default_value_t = 30_000.0, help = "Withdrawn at the start of every year")]
    annual_withdrawal: f64,
    #[arg(long, default_value_t = 30)]
    horizon_years: i64,
    #[arg(long = "paths", default_value_t = 2_000)]
    path_count: i64,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(
        long = "asset",
        value_parser = parse_asset_weight,
        help = "Allocation as NAME=WEIGHT, repeatable; defaults to Global Stocks=0.7, American Bonds=0.3"
    )]
    assets: Vec<(String, f64)>,
    #[arg(long, help = "Simulate paths on all cores")]
    parallel: bool,
    #[arg(
        long,
        help = "Record the depleting year as 0 instead of the negative balance"
    )]
    clamp_negative: bool,
}

impl Default for SimulationArgs {
    fn default() -> Self {
        Self {
            initial_balance: 1_500_000.0,
            annual_withdrawal: 30_000.0,
            horizon_years: 30,
            path_count: 2_000,
            seed: 42,
            assets: Vec::new(),
            parallel: false,
            clamp_negative: false,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    #[arg(long, help = "CSV of annual returns: year,<series>,...")]
    returns: PathBuf,
    #[arg(
        long = "register",
        value_parser = parse_registry_entry,
        help = "Extra asset as NAME=SERIES_ID, repeatable"
    )]
    register: Vec<(String, String)>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    simulation: SimulationArgs,
    #[command(flatten)]
    data: DataArgs,
    #[arg(long, help = "Print the full report as JSON")]
    json: bool,
    #[arg(long, help = "Leave per-path trajectories out of the JSON report")]
    omit_trajectories: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, default_value_t = 8080)]
    port: u16,
    #[command(flatten)]
    data: DataArgs,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    InvalidArguments(String),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error("failed to encode report: {0}")]
    Json(#[from] serde_json::Error),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    initial_balance: Option<f64>,
    annual_withdrawal: Option<f64>,
    horizon_years: Option<i64>,
    #[serde(alias = "simulations")]
    path_count: Option<i64>,
    seed: Option<u64>,
    allocation: Option<BTreeMap<String, f64>>,
    parallel: Option<bool>,
    clamp_negative: Option<bool>,
    include_trajectories: Option<bool>,
}

/// Query-string form of [`SimulatePayload`]. The allocation is flattened to
/// `NAME=WEIGHT` pairs separated by commas.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
struct SimulateQuery {
    initial_balance: Option<f64>,
    annual_withdrawal: Option<f64>,
    horizon_years: Option<i64>,
    #[serde(alias = "simulations")]
    path_count: Option<i64>,
    seed: Option<u64>,
    allocation: Option<String>,
    parallel: Option<bool>,
    clamp_negative: Option<bool>,
    include_trajectories: Option<bool>,
}

impl SimulateQuery {
    fn into_payload(self) -> Result<SimulatePayload, String> {
        let allocation = match self.allocation {
            Some(raw) => Some(parse_allocation_list(&raw)?),
            None => None,
        };
        Ok(SimulatePayload {
            initial_balance: self.initial_balance,
            annual_withdrawal: self.annual_withdrawal,
            horizon_years: self.horizon_years,
            path_count: self.path_count,
            seed: self.seed,
            allocation,
            parallel: self.parallel,
            clamp_negative: self.clamp_negative,
            include_trajectories: self.include_trajectories,
        })
    }
}

/// Which input surface a parameter error is reported against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldStyle {
    Flag,
    JsonKey,
}

#[derive(Debug)]
struct ApiRequest {
    params: SimulationParameters,
    options: RunOptions,
    include_trajectories: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    initial_balance: f64,
    annual_withdrawal: f64,
    horizon_years: usize,
    path_count: usize,
    seed: u64,
    depletion_policy: DepletionPolicy,
    allocation: AssetAllocation,
    depletion_probability: f64,
    depleted_count: usize,
    summary: FinalValueSummary,
    percentiles: Vec<YearPercentiles>,
    best_path_index: usize,
    worst_path_index: usize,
    best_trajectory: PathTrajectory,
    worst_trajectory: PathTrajectory,
    first_history_year: Option<i32>,
    window_start_years: Vec<Option<i32>>,
    trajectories: Option<Vec<PathTrajectory>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AssetResponse<'a> {
    name: &'a str,
    series_id: &'a str,
    available: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Clone)]
struct AppState {
    table: Arc<AnnualReturnTable>,
    registry: Arc<AssetRegistry>,
    limits: ParameterLimits,
}

pub async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Run(args) => run_once(args),
        Command::Serve(args) => {
            let (table, registry) = load_data(&args.data)?;
            run_http_server(args.port, table, registry).await?;
            Ok(())
        }
    }
}

fn run_once(args: RunArgs) -> Result<(), CliError> {
    let (table, registry) = load_data(&args.data)?;
    let request = build_request(
        &args.simulation,
        &registry,
        &ParameterLimits::default(),
        FieldStyle::Flag,
    )
    .map_err(CliError::InvalidArguments)?;
    let report = run_simulation(&request.params, &table, &request.options)?;

    if args.json {
        let response = build_simulate_response(
            &request.params,
            &request.options,
            &table,
            report,
            !args.omit_trajectories,
        );
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print!("{}", render_summary(&request.params, &report));
    }
    Ok(())
}

fn load_data(args: &DataArgs) -> Result<(AnnualReturnTable, AssetRegistry), CliError> {
    let table = load_returns_csv(&args.returns)?;
    let mut registry = AssetRegistry::default();
    for (name, series_id) in &args.register {
        registry.insert(name.clone(), series_id.clone());
    }
    Ok((table, registry))
}

fn build_request(
    args: &SimulationArgs,
    registry: &AssetRegistry,
    limits: &ParameterLimits,
    style: FieldStyle,
) -> Result<ApiRequest, String> {
    let weights = if args.assets.is_empty() {
        DEFAULT_ALLOCATION
            .iter()
            .map(|(name, w)| (name.to_string(), *w))
            .collect()
    } else {
        args.assets.clone()
    };

    let inputs = ParameterInputs {
        initial_balance: args.initial_balance,
        annual_withdrawal: args.annual_withdrawal,
        horizon_years: args.horizon_years,
        path_count: args.path_count,
        weights,
    };
    let params = SimulationParameters::new(&inputs, registry, limits)
        .map_err(|err| describe_parameter_error(err, style))?;

    let options = RunOptions {
        seed: args.seed,
        execution: if args.parallel {
            Execution::Parallel
        } else {
            Execution::Sequential
        },
        depletion_policy: if args.clamp_negative {
            DepletionPolicy::ClampToZero
        } else {
            DepletionPolicy::PreserveNegative
        },
    };

    Ok(ApiRequest {
        params,
        options,
        include_trajectories: true,
    })
}

fn describe_parameter_error(err: SimulationError, style: FieldStyle) -> String {
    match err {
        SimulationError::InvalidRange {
            field, min, max, ..
        } => {
            let name = match style {
                FieldStyle::Flag => match field {
                    "path_count" => "--paths".to_string(),
                    other => format!("--{}", other.replace('_', "-")),
                },
                FieldStyle::JsonKey => camel_case(field),
            };
            format!("{name} must be between {min} and {max}")
        }
        other => other.to_string(),
    }
}

fn camel_case(snake: &str) -> String {
    let mut out = String::with_capacity(snake.len());
    let mut upper = false;
    for ch in snake.chars() {
        if ch == '_' {
            upper = true;
        } else if upper {
            out.extend(ch.to_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

fn parse_allocation_list(raw: &str) -> Result<BTreeMap<String, f64>, String> {
    let mut allocation = BTreeMap::new();
    for entry in raw.split(',').filter(|e| !e.trim().is_empty()) {
        let (name, weight) = parse_asset_weight(entry)?;
        if allocation.insert(name.clone(), weight).is_some() {
            return Err(format!("duplicate asset in allocation: {name}"));
        }
    }
    if allocation.is_empty() {
        return Err("allocation must list at least one NAME=WEIGHT pair".to_string());
    }
    Ok(allocation)
}

fn parse_asset_weight(raw: &str) -> Result<(String, f64), String> {
    let (name, weight) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("expected NAME=WEIGHT, got '{raw}'"))?;
    let weight = weight
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid weight in '{raw}'"))?;
    Ok((name.trim().to_string(), weight))
}

fn parse_registry_entry(raw: &str) -> Result<(String, String), String> {
    let (name, series_id) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=SERIES_ID, got '{raw}'"))?;
    if name.trim().is_empty() || series_id.trim().is_empty() {
        return Err(format!("expected NAME=SERIES_ID, got '{raw}'"));
    }
    Ok((name.trim().to_string(), series_id.trim().to_string()))
}

pub async fn run_http_server(
    port: u16,
    table: AnnualReturnTable,
    registry: AssetRegistry,
) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let state = AppState {
        table: Arc::new(table),
        registry: Arc::new(registry),
        limits: ParameterLimits::default(),
    };
    let app = Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route("/api/assets", get(assets_handler))
        .fallback(not_found_handler)
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    info!("retirement tester API listening on http://{addr}");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn assets_handler(State(state): State<AppState>) -> Response {
    let assets = state
        .registry
        .iter()
        .map(|(name, series_id)| AssetResponse {
            name,
            series_id,
            available: state.table.column_index(series_id).is_some(),
        })
        .collect::<Vec<_>>();
    json_response(StatusCode::OK, assets)
}

async fn simulate_get_handler(
    State(state): State<AppState>,
    query: Result<Query<SimulateQuery>, QueryRejection>,
) -> Response {
    let payload = match query {
        Ok(Query(query)) => query.into_payload(),
        Err(rejection) => Err(rejection.body_text()),
    };
    match payload {
        Ok(payload) => simulate_handler_impl(state, payload).await,
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

async fn simulate_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<SimulatePayload>,
) -> Response {
    simulate_handler_impl(state, payload).await
}

async fn simulate_handler_impl(state: AppState, payload: SimulatePayload) -> Response {
    let request = match api_request_from_payload(payload, &state.registry, &state.limits) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let table = Arc::clone(&state.table);
    let outcome = tokio::task::spawn_blocking(move || {
        run_simulation(&request.params, &table, &request.options).map(|report| {
            build_simulate_response(
                &request.params,
                &request.options,
                &table,
                report,
                request.include_trajectories,
            )
        })
    })
    .await;

    match outcome {
        Ok(Ok(response)) => json_response(StatusCode::OK, response),
        Ok(Err(err)) => error_response(StatusCode::UNPROCESSABLE_ENTITY, &err.to_string()),
        Err(err) => {
            error!("simulation task failed: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Simulation failed")
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload, &AssetRegistry::default(), &ParameterLimits::default())
}

fn api_request_from_payload(
    payload: SimulatePayload,
    registry: &AssetRegistry,
    limits: &ParameterLimits,
) -> Result<ApiRequest, String> {
    let mut args = SimulationArgs::default();

    if let Some(v) = payload.initial_balance {
        args.initial_balance = v;
    }
    if let Some(v) = payload.annual_withdrawal {
        args.annual_withdrawal = v;
    }
    if let Some(v) = payload.horizon_years {
        args.horizon_years = v;
    }
    if let Some(v) = payload.path_count {
        args.path_count = v;
    }
    if let Some(v) = payload.seed {
        args.seed = v;
    }
    if let Some(allocation) = payload.allocation {
        args.assets = allocation.into_iter().collect();
    }
    if let Some(v) = payload.parallel {
        args.parallel = v;
    }
    if let Some(v) = payload.clamp_negative {
        args.clamp_negative = v;
    }

    let mut request = build_request(&args, registry, limits, FieldStyle::JsonKey)?;
    request.include_trajectories = payload.include_trajectories.unwrap_or(true);
    Ok(request)
}

fn build_simulate_response(
    params: &SimulationParameters,
    options: &RunOptions,
    table: &AnnualReturnTable,
    report: SimulationReport,
    include_trajectories: bool,
) -> SimulateResponse {
    let summary = final_value_summary(&report);
    let percentiles = percentile_bands(&report);
    let window_start_years = report
        .window_starts
        .iter()
        .map(|row| table.year_at(*row))
        .collect();

    SimulateResponse {
        initial_balance: params.initial_balance(),
        annual_withdrawal: params.annual_withdrawal(),
        horizon_years: report.horizon_years,
        path_count: report.path_count,
        seed: options.seed,
        depletion_policy: options.depletion_policy,
        allocation: params.allocation().clone(),
        depletion_probability: report.depletion_probability,
        depleted_count: report.depleted_count,
        summary,
        percentiles,
        best_path_index: report.best_path_index,
        worst_path_index: report.worst_path_index,
        best_trajectory: report.best_trajectory,
        worst_trajectory: report.worst_trajectory,
        first_history_year: table.first_year(),
        window_start_years,
        trajectories: include_trajectories.then_some(report.trajectories),
    }
}

fn render_summary(params: &SimulationParameters, report: &SimulationReport) -> String {
    let summary = final_value_summary(report);
    let allocation = params
        .allocation()
        .iter()
        .map(|(name, entry)| format!("{name}: {:.0}%", entry.weight * 100.0))
        .collect::<Vec<_>>()
        .join(" / ");

    format!(
        "Simulation Results for {} Year Retirement\n\
         Initial: {} | Withdrawal: {}/yr\n\
         Asset Allocation: {allocation}\n\
         Simulations Run: {}\n\
         Probability of Depletion: {:.1}%\n\
         Best Case Final Value: {}\n\
         Median Final Value: {}\n\
         Worst Case Final Value: {}\n",
        report.horizon_years,
        format_currency(params.initial_balance()),
        format_currency(params.annual_withdrawal()),
        report.path_count,
        summary.depletion_probability * 100.0,
        format_currency(summary.best),
        format_currency(summary.median),
        format_currency(summary.worst),
    )
}

fn format_currency(value: f64) -> String {
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if rounded < 0.0 {
        format!("-${grouped}")
    } else {
        format!("${grouped}")
    }
}
