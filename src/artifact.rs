//! Output artifacts: naming, persistence and the payment-state tag.
//!
//! Artifacts are named `{YYYYMMDD}_{HHMM}_analisis_chipExpress_({STATE}).xlsx`.
//! Older artifacts carry only the date (`{YYYYMMDD}_analisis_...`), and both
//! forms are recognised by the leading eight digits followed by an underscore.

use crate::error::{Error, Result};
use crate::ingest::file_name;
use crate::join::MatchedRecord;
use crate::table::{read_first_sheet, CellValue, Table};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use rust_xlsxwriter::Workbook;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

const ARTIFACT_STEM: &str = "analisis_chipExpress";
const ARTIFACT_SHEET: &str = "Resultados";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PaymentState {
    Pending,
    Paid,
}

impl PaymentState {
    /// Tag embedded in the file name
    pub fn tag(self) -> &'static str {
        match self {
            PaymentState::Pending => "POR_PAGAR",
            PaymentState::Paid => "PAGADO",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            PaymentState::Pending => PaymentState::Paid,
            PaymentState::Paid => PaymentState::Pending,
        }
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentState::Pending => f.write_str("POR PAGAR"),
            PaymentState::Paid => f.write_str("PAGADO"),
        }
    }
}

/// What an artifact file name says about it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub path: PathBuf,
    pub file_name: String,
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
    pub state: PaymentState,
}

impl ArtifactInfo {
    /// `YYYY-MM` grouping key
    pub fn month(&self) -> String {
        self.date.format("%Y-%m").to_string()
    }
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{8})_(?:(\d{4})_)?").expect("artifact name pattern is valid")
    })
}

pub fn artifact_file_name(timestamp: NaiveDateTime, state: PaymentState) -> String {
    format!(
        "{}_{}_({}).xlsx",
        timestamp.format("%Y%m%d_%H%M"),
        ARTIFACT_STEM,
        state.tag()
    )
}

/// Date, optional time and payment state from an artifact path
pub fn parse_artifact_name(path: &Path) -> Result<ArtifactInfo> {
    let name = file_name(path);
    let caps = name_pattern()
        .captures(&name)
        .ok_or_else(|| Error::ArtifactName(name.clone()))?;

    let date = NaiveDate::parse_from_str(&caps[1], "%Y%m%d")
        .map_err(|_| Error::ArtifactName(name.clone()))?;
    let time = caps
        .get(2)
        .and_then(|m| NaiveTime::parse_from_str(m.as_str(), "%H%M").ok());
    let state = if name.contains(PaymentState::Paid.tag()) {
        PaymentState::Paid
    } else {
        PaymentState::Pending
    };

    Ok(ArtifactInfo {
        path: path.to_path_buf(),
        file_name: name,
        date,
        time,
        state,
    })
}

/// Union of all record columns in first-seen order
pub fn artifact_columns(rows: &[MatchedRecord]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut columns = Vec::new();
    for row in rows {
        for (name, _) in &row.fields {
            if seen.insert(name.as_str()) {
                columns.push(name.clone());
            }
        }
    }
    columns
}

/// Persist matched records as a new artifact. Never overwrites an existing file.
pub fn write_artifact(
    rows: &[MatchedRecord],
    dir: &Path,
    timestamp: NaiveDateTime,
    state: PaymentState,
) -> Result<PathBuf> {
    let path = dir.join(artifact_file_name(timestamp, state));
    let write_err = |message: String| Error::Write {
        path: path.clone(),
        message,
    };

    fs::create_dir_all(dir).map_err(|e| write_err(e.to_string()))?;
    if path.exists() {
        return Err(write_err("an artifact with this name already exists".to_string()));
    }

    let columns = artifact_columns(rows);
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet
        .set_name(ARTIFACT_SHEET)
        .map_err(|e| write_err(e.to_string()))?;

    for (col, name) in columns.iter().enumerate() {
        let col = u16::try_from(col).map_err(|_| write_err("too many columns".to_string()))?;
        sheet
            .write_string(0, col, name)
            .map_err(|e| write_err(e.to_string()))?;
    }

    for (row_idx, record) in rows.iter().enumerate() {
        let row = u32::try_from(row_idx + 1).map_err(|_| write_err("too many rows".to_string()))?;
        for (col, name) in columns.iter().enumerate() {
            let col = u16::try_from(col).map_err(|_| write_err("too many columns".to_string()))?;
            let written = match record.get(name) {
                None | Some(CellValue::Empty) => continue,
                Some(CellValue::Text(s)) => sheet.write_string(row, col, s),
                Some(CellValue::Number(n)) => sheet.write_number(row, col, *n),
                Some(CellValue::Bool(b)) => sheet.write_boolean(row, col, *b),
            };
            written.map_err(|e| write_err(e.to_string()))?;
        }
    }

    workbook.save(&path).map_err(|e| write_err(e.to_string()))?;
    info!(path = %path.display(), rows = rows.len(), "artifact written");
    Ok(path)
}

/// Read back an artifact's first worksheet (header on the first row)
pub fn read_artifact(path: &Path) -> Result<Table> {
    let name = file_name(path);
    let parse_err = |message: String| Error::Parse {
        file: name.clone(),
        message,
    };

    let (_, grid) = read_first_sheet(path)
        .map_err(|e| parse_err(e.to_string()))?
        .ok_or_else(|| parse_err("workbook has no sheets".to_string()))?;
    Table::from_grid(name.clone(), &grid, 0).ok_or_else(|| parse_err("artifact is empty".to_string()))
}

/// All artifacts in `dir`, newest first. Lock files and foreign names are ignored.
pub fn list_artifacts(dir: &Path) -> Result<Vec<ArtifactInfo>> {
    let mut artifacts = Vec::new();
    if !dir.is_dir() {
        return Ok(artifacts);
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !is_workbook(&path) {
            continue;
        }
        match parse_artifact_name(&path) {
            Ok(info) => artifacts.push(info),
            Err(e) => debug!("ignoring {}: {}", path.display(), e),
        }
    }

    artifacts.sort_by(|a, b| {
        (b.date, b.time)
            .cmp(&(a.date, a.time))
            .then_with(|| a.file_name.cmp(&b.file_name))
    });
    Ok(artifacts)
}

/// `.xlsx` file that is not an office lock file
pub(crate) fn is_workbook(path: &Path) -> bool {
    let name = file_name(path);
    path.is_file()
        && !name.starts_with("~$")
        && path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("xlsx"))
            .unwrap_or(false)
}

/// Flip the payment tag by renaming the file. Content is never touched.
pub fn toggle_payment_state(path: &Path) -> Result<PathBuf> {
    let info = parse_artifact_name(path)?;
    let current = info.state.tag();
    if !info.file_name.contains(current) {
        return Err(Error::ArtifactName(info.file_name));
    }

    let new_name = info
        .file_name
        .replacen(current, info.state.toggled().tag(), 1);
    let target = path.with_file_name(&new_name);
    if target.exists() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} already exists", target.display()),
        )));
    }

    fs::rename(path, &target)?;
    info!(from = %info.file_name, to = %new_name, "payment state toggled");
    Ok(target)
}

/// Artifact counts by payment state, overall and per month
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSummary {
    pub total: usize,
    pub paid: usize,
    pub pending: usize,
    /// month -> (paid, pending)
    pub by_month: BTreeMap<String, (usize, usize)>,
}

impl StatusSummary {
    pub fn from_artifacts(artifacts: &[ArtifactInfo]) -> Self {
        let mut summary = StatusSummary::default();
        for artifact in artifacts {
            summary.total += 1;
            let month = summary.by_month.entry(artifact.month()).or_default();
            match artifact.state {
                PaymentState::Paid => {
                    summary.paid += 1;
                    month.0 += 1;
                }
                PaymentState::Pending => {
                    summary.pending += 1;
                    month.1 += 1;
                }
            }
        }
        summary
    }
}
