use crate::artifact::{is_workbook, write_artifact, PaymentState};
use crate::config::{ArchivePolicy, Config};
use crate::error::{Error, Result};
use crate::evaluation::{classify_stage, CommissionRates, StageBreakdown};
use crate::ingest::{file_name, DetailIngestor, DetailTable};
use crate::join::{join_detail, MatchedRecord};
use crate::reference::{load_reference, ReferenceDataset};
use chrono::NaiveDateTime;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// What happened to one detail file
#[derive(Debug)]
pub enum FileOutcome {
    /// `duplicates` counts joined rows dropped because an earlier file in
    /// the batch already matched the same phone
    Matched { rows: usize, duplicates: usize },
    NoMatches,
    Failed(Error),
}

/// Where a detail file ended up after the batch
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveStatus {
    Archived(PathBuf),
    LeftPending,
    Failed(String),
}

#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    pub file: String,
    pub period: Option<String>,
    pub outcome: FileOutcome,
    pub skipped_sheets: Vec<String>,
    /// Evaluation stages and commissions of the detail rows this file
    /// contributed to the artifact
    pub stages: StageBreakdown,
    pub archive: ArchiveStatus,
}

impl FileReport {
    pub fn succeeded(&self) -> bool {
        !matches!(self.outcome, FileOutcome::Failed(_))
    }

    pub fn is_archived(&self) -> bool {
        matches!(self.archive, ArchiveStatus::Archived(_))
    }
}

impl fmt::Display for FileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let archive = match &self.archive {
            ArchiveStatus::Archived(_) => "file archived".to_string(),
            ArchiveStatus::LeftPending => "file left pending".to_string(),
            ArchiveStatus::Failed(e) => format!("archiving failed: {}", e),
        };
        let period = self.period.as_deref().unwrap_or("-");
        match &self.outcome {
            FileOutcome::Matched { rows, duplicates: 0 } => {
                write!(f, "{}: {} matches (period {}), {}", self.file, rows, period, archive)
            }
            FileOutcome::Matched { rows, duplicates } => write!(
                f,
                "{}: {} matches, {} already matched by an earlier file (period {}), {}",
                self.file, rows, duplicates, period, archive
            ),
            FileOutcome::NoMatches => {
                write!(f, "{}: 0 matches (period {}), {}", self.file, period, archive)
            }
            FileOutcome::Failed(e) => write!(f, "{}: skipped, {}", self.file, e),
        }
    }
}

/// Summary of one batch run
#[derive(Debug, Default)]
pub struct BatchResult {
    pub artifact_path: Option<PathBuf>,
    pub matched_count: usize,
    pub files: Vec<FileReport>,
}

impl BatchResult {
    /// Files ingested and joined without error, whether or not they matched
    pub fn processed_files(&self) -> Vec<&Path> {
        self.files
            .iter()
            .filter(|r| r.succeeded())
            .map(|r| r.path.as_path())
            .collect()
    }

    pub fn per_file_errors(&self) -> Vec<(&str, &Error)> {
        self.files
            .iter()
            .filter_map(|r| match &r.outcome {
                FileOutcome::Failed(e) => Some((r.file.as_str(), e)),
                _ => None,
            })
            .collect()
    }

    pub fn archived_count(&self) -> usize {
        self.files.iter().filter(|r| r.is_archived()).count()
    }

    /// One line per file plus the batch verdict
    pub fn status_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.files.iter().map(|r| r.to_string()).collect();
        lines.push(self.to_string());
        lines
    }
}

impl fmt::Display for BatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.files.is_empty() {
            return f.write_str("no pending detail files");
        }
        match &self.artifact_path {
            Some(path) => write!(
                f,
                "{} matched rows written to {}; {} of {} files archived",
                self.matched_count,
                path.display(),
                self.archived_count(),
                self.files.len()
            ),
            None => write!(
                f,
                "no matches found in any detail file; {} of {} files archived",
                self.archived_count(),
                self.files.len()
            ),
        }
    }
}

/// Detail files waiting in `dir`, sorted by name. A missing directory has none.
pub fn list_pending_detail_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if is_workbook(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Move a file into `destination_dir`, keeping its name. An archived file
/// with the same name is never replaced.
pub fn archive(file: &Path, destination_dir: &Path) -> Result<PathBuf> {
    let archive_err = |message: String| Error::Archive {
        path: file.to_path_buf(),
        message,
    };
    fs::create_dir_all(destination_dir).map_err(|e| archive_err(e.to_string()))?;
    let target = destination_dir.join(file_name(file));
    if target.exists() {
        return Err(archive_err(format!("{} is already archived", target.display())));
    }

    match fs::rename(file, &target) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            fs::copy(file, &target).map_err(|e| archive_err(e.to_string()))?;
            fs::remove_file(file).map_err(|e| archive_err(e.to_string()))?;
        }
        Err(e) => return Err(archive_err(e.to_string())),
    }
    Ok(target)
}

/// Runs detail files against the reference roster
pub struct BatchProcessor<'a> {
    config: &'a Config,
    ingestor: DetailIngestor,
    rates: CommissionRates,
}

impl<'a> BatchProcessor<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            ingestor: DetailIngestor::new(config),
            rates: CommissionRates::from_config(config),
        }
    }

    /// Load the reference, then process everything pending.
    /// A reference failure returns before any file is touched.
    pub fn run(&self, timestamp: NaiveDateTime) -> Result<BatchResult> {
        let reference = load_reference(&self.config.reference_path())?;
        let pending = list_pending_detail_files(&self.config.pending_dir())?;
        self.run_batch(&pending, &reference, timestamp)
    }

    pub fn run_batch(
        &self,
        pending_files: &[PathBuf],
        reference: &ReferenceDataset,
        timestamp: NaiveDateTime,
    ) -> Result<BatchResult> {
        let mut result = BatchResult::default();
        if pending_files.is_empty() {
            info!("no pending detail files");
            return Ok(result);
        }

        let mut matched: Vec<MatchedRecord> = Vec::new();
        // one row per phone across the whole artifact, first file wins
        let mut seen: HashSet<String> = HashSet::new();

        for path in pending_files {
            let report = self.process_file(path, reference, &mut matched, &mut seen);
            match &report.outcome {
                FileOutcome::Matched { rows, duplicates } => {
                    info!(file = %report.file, rows, duplicates, "detail file matched")
                }
                FileOutcome::NoMatches => warn!(
                    file = %report.file,
                    period = report.period.as_deref().unwrap_or(""),
                    "no matches in detail file"
                ),
                FileOutcome::Failed(e) => error!(file = %report.file, "detail file skipped: {}", e),
            }
            result.files.push(report);
        }

        if !matched.is_empty() {
            let path = write_artifact(
                &matched,
                &self.config.output_dir(),
                timestamp,
                PaymentState::Pending,
            )?;
            result.matched_count = matched.len();
            result.artifact_path = Some(path);
        } else {
            warn!("no matches found in any detail file");
        }

        let should_archive = result.artifact_path.is_some()
            || self.config.archive_policy == ArchivePolicy::OnFileSuccess;
        if should_archive {
            self.archive_processed(&mut result);
        }

        Ok(result)
    }

    fn process_file(
        &self,
        path: &Path,
        reference: &ReferenceDataset,
        matched: &mut Vec<MatchedRecord>,
        seen: &mut HashSet<String>,
    ) -> FileReport {
        let mut report = FileReport {
            path: path.to_path_buf(),
            file: file_name(path),
            period: None,
            outcome: FileOutcome::NoMatches,
            skipped_sheets: Vec::new(),
            stages: StageBreakdown::default(),
            archive: ArchiveStatus::LeftPending,
        };

        let detail = match self.ingestor.ingest_file(path) {
            Ok(detail) => detail,
            Err(e) => {
                report.outcome = FileOutcome::Failed(e);
                return report;
            }
        };
        report.period = Some(detail.period.clone());

        let joined = join_detail(&detail, reference, &self.config.key_column);
        report.skipped_sheets = joined.skipped_sheets;
        if !joined.records.is_empty() {
            let joined_rows = joined.records.len();
            let before = matched.len();
            matched.extend(
                joined
                    .records
                    .into_iter()
                    .filter(|record| seen.insert(record.phone.clone())),
            );
            let rows = matched.len() - before;
            let kept: HashSet<&str> =
                matched[before..].iter().map(|r| r.phone.as_str()).collect();
            report.stages = self.tally_stages(&detail, &kept);
            report.outcome = FileOutcome::Matched {
                rows,
                duplicates: joined_rows - rows,
            };
        }
        report
    }

    /// Stage totals over the first detail row of each phone in `kept`
    fn tally_stages(&self, detail: &DetailTable, kept: &HashSet<&str>) -> StageBreakdown {
        let mut stages = StageBreakdown::default();
        if detail.stage_column.is_none() {
            debug!(file = %detail.source_file, "no evaluation column, stage totals left empty");
            return stages;
        }
        if detail.commission_column.is_none() {
            debug!(file = %detail.source_file, "no commission column, imputing configured rates");
        }

        let mut counted: HashSet<&str> = HashSet::new();
        for record in &detail.records {
            let phone = record.phone.as_str();
            if !kept.contains(phone) || !counted.insert(phone) {
                continue;
            }
            let Some(stage) = record.evaluation_stage.as_deref().and_then(classify_stage) else {
                continue;
            };
            let commission = record
                .commission_amount
                .unwrap_or_else(|| self.rates.for_stage(stage));
            stages.record(stage, commission);
        }
        stages
    }

    fn archive_processed(&self, result: &mut BatchResult) {
        let archive_dir = self.config.archive_dir();
        for report in result.files.iter_mut().filter(|r| r.succeeded()) {
            report.archive = match archive(&report.path, &archive_dir) {
                Ok(target) => ArchiveStatus::Archived(target),
                Err(e) => {
                    error!(file = %report.file, "{}", e);
                    ArchiveStatus::Failed(e.to_string())
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_listing_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.xlsx", "a.XLSX", "~$a.xlsx", "notas.txt"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("sub.xlsx")).unwrap();

        let files = list_pending_detail_files(dir.path()).unwrap();
        let names: Vec<String> = files.iter().map(|p| file_name(p)).collect();
        assert_eq!(names, vec!["a.XLSX", "b.xlsx"]);

        assert!(list_pending_detail_files(&dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn archive_moves_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("detalle.xlsx");
        fs::write(&file, b"x").unwrap();

        let target = archive(&file, &dir.path().join("historico")).unwrap();
        assert!(!file.exists());
        assert!(target.exists());
        assert!(target.ends_with("historico/detalle.xlsx"));
    }

    #[test]
    fn archive_keeps_an_earlier_file_with_the_same_name() {
        let dir = tempfile::tempdir().unwrap();
        let historico = dir.path().join("historico");
        fs::create_dir(&historico).unwrap();
        fs::write(historico.join("detalle.xlsx"), b"enero").unwrap();
        let file = dir.path().join("detalle.xlsx");
        fs::write(&file, b"febrero").unwrap();

        let err = archive(&file, &historico).unwrap_err();
        assert!(matches!(err, Error::Archive { .. }));
        assert_eq!(fs::read(historico.join("detalle.xlsx")).unwrap(), b"enero");
        assert_eq!(fs::read(&file).unwrap(), b"febrero");
    }

    #[test]
    fn missing_source_is_archive_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = archive(&dir.path().join("nada.xlsx"), &dir.path().join("historico")).unwrap_err();
        assert!(matches!(err, Error::Archive { .. }));
    }

    #[test]
    fn status_messages_are_distinct() {
        let report = |outcome, archive| FileReport {
            path: PathBuf::from("d.xlsx"),
            file: "d.xlsx".to_string(),
            period: Some("Enero".to_string()),
            outcome,
            skipped_sheets: Vec::new(),
            stages: StageBreakdown::default(),
            archive,
        };

        let archived = ArchiveStatus::Archived(PathBuf::from("h/d.xlsx"));
        assert_eq!(
            report(FileOutcome::NoMatches, archived.clone()).to_string(),
            "d.xlsx: 0 matches (period Enero), file archived"
        );
        assert_eq!(
            report(FileOutcome::NoMatches, ArchiveStatus::LeftPending).to_string(),
            "d.xlsx: 0 matches (period Enero), file left pending"
        );
        assert_eq!(
            report(FileOutcome::Matched { rows: 3, duplicates: 0 }, archived.clone()).to_string(),
            "d.xlsx: 3 matches (period Enero), file archived"
        );
        assert_eq!(
            report(FileOutcome::Matched { rows: 1, duplicates: 2 }, archived).to_string(),
            "d.xlsx: 1 matches, 2 already matched by an earlier file (period Enero), file archived"
        );
        let failed = report(
            FileOutcome::Failed(Error::Parse {
                file: "d.xlsx".to_string(),
                message: "bad zip".to_string(),
            }),
            ArchiveStatus::LeftPending,
        );
        assert!(failed.to_string().starts_with("d.xlsx: skipped, Failed to parse d.xlsx"));

        assert_eq!(BatchResult::default().to_string(), "no pending detail files");
    }
}
