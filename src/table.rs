use calamine::{open_workbook_auto, Data, Range, Reader};
use chrono::{Days, NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// A single spreadsheet cell as carried through the engine
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Numeric view of the cell. Text is accepted when it reads as a money amount.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => parse_amount(s),
            _ => None,
        }
    }

    /// Calendar date of the cell. Text is read as `YYYY-MM-DD` (optionally
    /// with a time) or `DD/MM/YYYY`; numbers as Excel serial days.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            CellValue::Text(s) => parse_date(s.trim()),
            CellValue::Number(n) if *n >= 1.0 => {
                NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_days(Days::new(n.trunc() as u64))
            }
            _ => None,
        }
    }

    /// String used for equi-joins. No normalization beyond rendering whole
    /// numbers without a decimal point.
    pub fn key_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            CellValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&Data> for CellValue {
    fn from(cell: &Data) -> Self {
        match cell {
            Data::Empty => CellValue::Empty,
            Data::String(s) => CellValue::Text(s.clone()),
            Data::Float(f) => CellValue::Number(*f),
            Data::Int(i) => CellValue::Number(*i as f64),
            Data::Bool(b) => CellValue::Bool(*b),
            Data::DateTime(dt) => match dt.as_datetime() {
                Some(datetime) => {
                    CellValue::Text(datetime.format("%Y-%m-%d %H:%M:%S").to_string())
                }
                None => CellValue::Number(dt.as_f64()),
            },
            Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
            Data::Error(e) => CellValue::Text(format!("#{}", e)),
        }
    }
}

/// Parse amounts such as "25", "$1,250.50" or "25.0"
fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(datetime) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(datetime.date());
    }
    ["%Y-%m-%d", "%d/%m/%Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
}

/// Header-plus-rows view of one worksheet
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl Table {
    pub fn new(name: impl Into<String>, headers: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self {
            name: name.into(),
            headers,
            rows,
        }
    }

    /// Build a table from a raw cell grid using `header_row` as the header.
    /// Rows above the header are discarded, fully empty data rows are dropped.
    pub fn from_grid(name: impl Into<String>, grid: &[Vec<CellValue>], header_row: usize) -> Option<Self> {
        let raw_headers = grid.get(header_row)?;
        let headers = normalize_headers(raw_headers);
        let width = headers.len();

        let rows = grid
            .iter()
            .skip(header_row + 1)
            .filter(|row| row.iter().any(|cell| !cell.is_empty()))
            .map(|row| {
                let mut row = row.clone();
                row.resize(width, CellValue::Empty);
                row
            })
            .collect();

        Some(Self::new(name, headers, rows))
    }

    pub fn column_index(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == header)
    }

    pub fn has_column(&self, header: &str) -> bool {
        self.column_index(header).is_some()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Trim headers, name blank ones `Unnamed: {index}` and suffix repeats with `.1`, `.2`, ...
pub fn normalize_headers(raw: &[CellValue]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut headers = Vec::with_capacity(raw.len());

    for (idx, cell) in raw.iter().enumerate() {
        let trimmed = cell.to_string().trim().to_string();
        let base = if trimmed.is_empty() {
            format!("Unnamed: {}", idx)
        } else {
            trimmed
        };

        let header = match seen.get_mut(&base) {
            Some(count) => {
                *count += 1;
                format!("{}.{}", base, count)
            }
            None => base.clone(),
        };
        seen.entry(base).or_insert(0);
        headers.push(header);
    }

    headers
}

/// Dense grid of a worksheet addressed by physical position, so that row 0 is
/// always the first row of the sheet even if it is blank.
fn range_to_grid(range: &Range<Data>) -> Vec<Vec<CellValue>> {
    let Some((end_row, end_col)) = range.end() else {
        return Vec::new();
    };

    (0..=end_row)
        .map(|row| {
            (0..=end_col)
                .map(|col| {
                    range
                        .get_value((row, col))
                        .map(CellValue::from)
                        .unwrap_or(CellValue::Empty)
                })
                .collect()
        })
        .collect()
}

/// Read every worksheet of a workbook in workbook order
pub fn read_sheets(path: &Path) -> Result<Vec<(String, Vec<Vec<CellValue>>)>, calamine::Error> {
    let mut workbook = open_workbook_auto(path)?;
    let mut sheets = Vec::new();

    for sheet_name in workbook.sheet_names() {
        let range = workbook.worksheet_range(&sheet_name)?;
        sheets.push((sheet_name, range_to_grid(&range)));
    }

    Ok(sheets)
}

/// Read the first worksheet of a workbook
pub fn read_first_sheet(path: &Path) -> Result<Option<(String, Vec<Vec<CellValue>>)>, calamine::Error> {
    let mut workbook = open_workbook_auto(path)?;
    let Some(sheet_name) = workbook.sheet_names().into_iter().next() else {
        return Ok(None);
    };
    let range = workbook.worksheet_range(&sheet_name)?;
    Ok(Some((sheet_name, range_to_grid(&range))))
}
