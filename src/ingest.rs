use crate::columns::ColumnResolver;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::table::{read_first_sheet, CellValue, Table};
use std::path::Path;
use tracing::{debug, warn};

/// Physical position of the reporting period label
const PERIOD_CELL: (usize, usize) = (0, 2);
/// Physical row holding the column headers
const HEADER_ROW: usize = 2;

/// One row of a detail report
#[derive(Debug, Clone, PartialEq)]
pub struct DetailRecord {
    pub phone: String,
    pub evaluation_stage: Option<String>,
    pub commission_amount: Option<f64>,
    /// All cells of the row, aligned with `DetailTable::headers`
    pub cells: Vec<CellValue>,
}

/// A detail report in canonical form
#[derive(Debug, Clone)]
pub struct DetailTable {
    pub source_file: String,
    pub period: String,
    pub headers: Vec<String>,
    pub phone_column: String,
    pub stage_column: Option<String>,
    pub commission_column: Option<String>,
    pub records: Vec<DetailRecord>,
}

pub struct DetailIngestor {
    phone: ColumnResolver,
    stage: ColumnResolver,
    commission: ColumnResolver,
}

impl DetailIngestor {
    pub fn new(config: &Config) -> Self {
        Self {
            phone: ColumnResolver::new(&config.phone_columns),
            stage: ColumnResolver::new(&config.stage_columns),
            commission: ColumnResolver::new(&config.commission_columns),
        }
    }

    pub fn ingest_file(&self, path: &Path) -> Result<DetailTable> {
        let source_file = file_name(path);

        let (_, grid) = read_first_sheet(path)
            .map_err(|e| Error::Parse {
                file: source_file.clone(),
                message: e.to_string(),
            })?
            .ok_or_else(|| Error::Parse {
                file: source_file.clone(),
                message: "workbook has no sheets".to_string(),
            })?;

        self.ingest_grid(&source_file, &grid)
    }

    /// Interpret a raw cell grid as a detail report
    pub fn ingest_grid(&self, source_file: &str, grid: &[Vec<CellValue>]) -> Result<DetailTable> {
        let period = grid
            .get(PERIOD_CELL.0)
            .and_then(|row| row.get(PERIOD_CELL.1))
            .ok_or_else(|| Error::Parse {
                file: source_file.to_string(),
                message: "period cell (row 1, column C) is missing".to_string(),
            })?
            .to_string()
            .trim()
            .to_string();
        if period.is_empty() {
            warn!(file = source_file, "period cell is empty");
        }

        let table = Table::from_grid(source_file, grid, HEADER_ROW).ok_or_else(|| Error::Parse {
            file: source_file.to_string(),
            message: format!("expected the header on row {}", HEADER_ROW + 1),
        })?;

        let phone_column = self
            .phone
            .resolve(&table.headers)
            .map(str::to_string)
            .ok_or_else(|| Error::Schema {
                file: source_file.to_string(),
                expected: self.phone.describe(),
            })?;
        let stage_column = self.stage.resolve(&table.headers).map(str::to_string);
        let commission_column = self.commission.resolve(&table.headers).map(str::to_string);

        let phone_idx = index_of(&table, &phone_column);
        let stage_idx = stage_column.as_deref().map(|c| index_of(&table, c));
        let commission_idx = commission_column.as_deref().map(|c| index_of(&table, c));

        let records: Vec<DetailRecord> = table
            .rows
            .into_iter()
            .map(|cells| DetailRecord {
                phone: cells[phone_idx].key_text(),
                evaluation_stage: stage_idx
                    .map(|i| cells[i].to_string())
                    .filter(|s| !s.is_empty()),
                commission_amount: commission_idx.and_then(|i| cells[i].as_number()),
                cells,
            })
            .collect();

        debug!(
            file = source_file,
            period = %period,
            phone_column = %phone_column,
            records = records.len(),
            "detail file ingested"
        );

        Ok(DetailTable {
            source_file: source_file.to_string(),
            period,
            headers: table.headers,
            phone_column,
            stage_column,
            commission_column,
            records,
        })
    }
}

fn index_of(table: &Table, column: &str) -> usize {
    // resolved columns always come from the table's own headers
    table.column_index(column).unwrap_or_default()
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
