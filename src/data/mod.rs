use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::{info, warn};
use thiserror::Error;

use crate::core::{AnnualReturnTable, SimulationError};

/// Histories shorter than this leave few distinct windows for long horizons.
pub const MIN_RECOMMENDED_YEARS: usize = 30;

const YEAR_COLUMN: &str = "year";

#[derive(Debug, Error)]
pub enum DataError {
    #[error("failed to open return data: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed return CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("row {row}: cannot parse '{value}' in column '{column}'")]
    Parse {
        row: usize,
        column: String,
        value: String,
    },

    #[error(transparent)]
    Table(#[from] SimulationError),
}

/// Loads an annualised return table from a CSV file.
///
/// The header is `year,<series>,...`; the `year` column is optional. Each
/// row holds one calendar year of fractional returns.
pub fn load_returns_csv(path: &Path) -> Result<AnnualReturnTable, DataError> {
    let file = File::open(path)?;
    let table = read_returns_csv(file)?;
    info!(
        "loaded {} years x {} series from {}",
        table.len(),
        table.series().len(),
        path.display()
    );
    Ok(table)
}

pub fn read_returns_csv<R: Read>(reader: R) -> Result<AnnualReturnTable, DataError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let has_year = headers
        .get(0)
        .is_some_and(|h| h.eq_ignore_ascii_case(YEAR_COLUMN));
    let series_offset = usize::from(has_year);
    let series = headers
        .iter()
        .skip(series_offset)
        .map(str::to_string)
        .collect::<Vec<_>>();

    let mut years = Vec::new();
    let mut rows = Vec::new();
    for (idx, record) in rdr.records().enumerate() {
        let record = record?;
        let row_number = idx + 1;

        if has_year {
            let raw = record.get(0).unwrap_or_default();
            years.push(parse_year(raw).ok_or_else(|| DataError::Parse {
                row: row_number,
                column: YEAR_COLUMN.to_string(),
                value: raw.to_string(),
            })?);
        }

        let row = record
            .iter()
            .skip(series_offset)
            .zip(&series)
            .map(|(value, column)| {
                value.parse::<f64>().map_err(|_| DataError::Parse {
                    row: row_number,
                    column: column.clone(),
                    value: value.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(row);
    }

    let mut table = AnnualReturnTable::new(series, rows)?;
    if has_year {
        table = table.with_years(years)?;
    }

    if table.len() < MIN_RECOMMENDED_YEARS {
        warn!(
            "only {} years of return history available (fewer than {MIN_RECOMMENDED_YEARS})",
            table.len()
        );
    }
    Ok(table)
}

/// Accepts `1999` or a year-end date such as `1999-12-31`.
fn parse_year(raw: &str) -> Option<i32> {
    raw.split('-').next()?.parse().ok()
}
