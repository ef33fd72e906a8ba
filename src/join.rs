use crate::ingest::DetailTable;
use crate::reference::ReferenceDataset;
use crate::table::{CellValue, Table};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Output column naming the detail file a row came from
pub const SOURCE_FILE_COLUMN: &str = "Archivo_Detalle";
/// Output column carrying the detail file's period label
pub const PERIOD_COLUMN: &str = "Periodo";

/// A reference row joined with a detail row on the phone key
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedRecord {
    pub phone: String,
    pub source_file: String,
    pub period: String,
    /// Output columns in order, provenance last
    pub fields: Vec<(String, CellValue)>,
}

impl MatchedRecord {
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.fields.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }

    fn set(&mut self, column: &str, value: CellValue) {
        match self.fields.iter_mut().find(|(name, _)| name == column) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((column.to_string(), value)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JoinOutcome {
    pub records: Vec<MatchedRecord>,
    /// Reference sheets without the key column
    pub skipped_sheets: Vec<String>,
}

/// Column layout for one (reference sheet, detail table) pair.
/// Names present on both sides get `_x` (reference) and `_y` (detail) suffixes,
/// except a detail phone column named like the key column, which collapses into it.
struct JoinLayout {
    base_names: Vec<String>,
    detail_columns: Vec<(usize, String)>,
}

impl JoinLayout {
    fn new(sheet: &Table, detail: &DetailTable, key_column: &str) -> Self {
        let merged_key = detail.phone_column == key_column;
        let detail_set: HashSet<&str> = detail
            .headers
            .iter()
            .map(String::as_str)
            .filter(|h| !(merged_key && *h == key_column))
            .collect();
        let base_set: HashSet<&str> = sheet.headers.iter().map(String::as_str).collect();

        let base_names = sheet
            .headers
            .iter()
            .map(|h| {
                if detail_set.contains(h.as_str()) {
                    format!("{}_x", h)
                } else {
                    h.clone()
                }
            })
            .collect();

        let detail_columns = detail
            .headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !(merged_key && h.as_str() == key_column))
            .map(|(idx, h)| {
                let name = if base_set.contains(h.as_str()) {
                    format!("{}_y", h)
                } else {
                    h.clone()
                };
                (idx, name)
            })
            .collect();

        Self {
            base_names,
            detail_columns,
        }
    }
}

/// Inner-join a detail table against every keyed reference sheet.
///
/// Rows come out in sheet order, then reference row order, then detail row
/// order. Only the first row per phone survives. Keys compare as exact strings.
pub fn join_detail(detail: &DetailTable, reference: &ReferenceDataset, key_column: &str) -> JoinOutcome {
    let mut index: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, record) in detail.records.iter().enumerate() {
        if !record.phone.is_empty() {
            index.entry(record.phone.as_str()).or_default().push(idx);
        }
    }

    let mut outcome = JoinOutcome::default();
    let mut seen: HashSet<String> = HashSet::new();

    for sheet in reference.sheets() {
        let Some(key_idx) = sheet.column_index(key_column) else {
            info!(
                sheet = %sheet.name,
                key = key_column,
                "reference sheet has no key column, skipped"
            );
            outcome.skipped_sheets.push(sheet.name.clone());
            continue;
        };

        let layout = JoinLayout::new(sheet, detail, key_column);
        let before = outcome.records.len();

        for base_row in &sheet.rows {
            let phone = base_row[key_idx].key_text();
            let Some(matches) = index.get(phone.as_str()) else {
                continue;
            };
            // probing in concatenation order with a seen-set keeps the first occurrence
            let Some(&detail_idx) = matches.first() else {
                continue;
            };
            if !seen.insert(phone.clone()) {
                continue;
            }

            let detail_row = &detail.records[detail_idx].cells;
            let mut fields: Vec<(String, CellValue)> = layout
                .base_names
                .iter()
                .cloned()
                .zip(base_row.iter().cloned())
                .collect();
            fields.extend(
                layout
                    .detail_columns
                    .iter()
                    .map(|(idx, name)| (name.clone(), detail_row[*idx].clone())),
            );

            let mut record = MatchedRecord {
                phone,
                source_file: detail.source_file.clone(),
                period: detail.period.clone(),
                fields,
            };
            record.set(SOURCE_FILE_COLUMN, CellValue::Text(detail.source_file.clone()));
            record.set(PERIOD_COLUMN, CellValue::Text(detail.period.clone()));
            outcome.records.push(record);
        }

        debug!(
            sheet = %sheet.name,
            matches = outcome.records.len() - before,
            "reference sheet joined"
        );
    }

    outcome
}
