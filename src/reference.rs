use crate::error::{Error, Result};
use crate::table::{read_sheets, Table};
use std::path::Path;
use tracing::{debug, info};

/// Every sheet of the reference workbook, in workbook order
#[derive(Debug, Clone, Default)]
pub struct ReferenceDataset {
    sheets: Vec<Table>,
}

impl ReferenceDataset {
    pub fn new(sheets: Vec<Table>) -> Self {
        Self { sheets }
    }

    pub fn sheets(&self) -> &[Table] {
        &self.sheets
    }

    /// Sheets that carry the join key column
    pub fn keyed_sheets<'a>(&'a self, key_column: &'a str) -> impl Iterator<Item = &'a Table> + 'a {
        self.sheets.iter().filter(move |s| s.has_column(key_column))
    }

    /// Size of the reference population: rows in sheets carrying the key column
    pub fn keyed_row_count(&self, key_column: &str) -> usize {
        self.keyed_sheets(key_column).map(Table::len).sum()
    }
}

/// Load the reference workbook. Any failure here is fatal to the batch.
pub fn load_reference(path: &Path) -> Result<ReferenceDataset> {
    if !path.is_file() {
        return Err(Error::Load {
            path: path.to_path_buf(),
            message: "file does not exist".to_string(),
        });
    }

    let raw_sheets = read_sheets(path).map_err(|e| Error::Load {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let sheets: Vec<Table> = raw_sheets
        .into_iter()
        .map(|(name, grid)| {
            let table = Table::from_grid(name.clone(), &grid, 0)
                .unwrap_or_else(|| Table::new(name, Vec::new(), Vec::new()));
            debug!(sheet = %table.name, rows = table.len(), "reference sheet loaded");
            table
        })
        .collect();

    info!(
        path = %path.display(),
        sheets = sheets.len(),
        "reference workbook loaded"
    );
    Ok(ReferenceDataset::new(sheets))
}
