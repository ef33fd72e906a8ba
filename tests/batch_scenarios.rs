use chip_express_analyzer::artifact::read_artifact;
use chip_express_analyzer::batch::ArchiveStatus;
use chip_express_analyzer::join::{PERIOD_COLUMN, SOURCE_FILE_COLUMN};
use chip_express_analyzer::table::CellValue;
use chip_express_analyzer::{
    list_artifacts, toggle_payment_state, ArchivePolicy, BatchProcessor, Config, Error,
    EvaluationAggregator, FileOutcome, PaymentState, Stage,
};
use chrono::{NaiveDate, NaiveDateTime};
use rust_xlsxwriter::Workbook;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

type Sheet<'a> = (&'a str, &'a [&'a str], &'a [&'a [&'a str]]);

fn write_reference(path: &Path, sheets: &[Sheet]) {
    let mut workbook = Workbook::new();
    for (name, headers, rows) in sheets {
        let sheet = workbook.add_worksheet();
        sheet.set_name(*name).unwrap();
        for (col, header) in headers.iter().enumerate() {
            sheet.write_string(0, col as u16, *header).unwrap();
        }
        for (r, row) in rows.iter().enumerate() {
            for (col, value) in row.iter().enumerate() {
                sheet.write_string(r as u32 + 1, col as u16, *value).unwrap();
            }
        }
    }
    workbook.save(path).unwrap();
}

fn write_detail(path: &Path, period: &str, headers: &[&str], rows: &[&[&str]]) {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "Detalle de comisiones").unwrap();
    sheet.write_string(0, 2, period).unwrap();
    for (col, header) in headers.iter().enumerate() {
        sheet.write_string(2, col as u16, *header).unwrap();
    }
    for (r, row) in rows.iter().enumerate() {
        for (col, value) in row.iter().enumerate() {
            sheet.write_string(r as u32 + 3, col as u16, *value).unwrap();
        }
    }
    workbook.save(path).unwrap();
}

struct Workspace {
    _dir: TempDir,
    config: Config,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let at = |name: &str| dir.path().join(name).to_string_lossy().into_owned();
        let config = Config {
            reference_file: at("referencia.xlsx"),
            pending_directory: at("Detalle"),
            archive_directory: at("Detalle historico"),
            output_directory: at("Resultados"),
            ..Config::default()
        };
        for d in [config.pending_dir(), config.archive_dir(), config.output_dir()] {
            fs::create_dir_all(d).unwrap();
        }
        Self { _dir: dir, config }
    }

    fn pending(&self, name: &str) -> PathBuf {
        self.config.pending_dir().join(name)
    }

    fn archived(&self, name: &str) -> PathBuf {
        self.config.archive_dir().join(name)
    }

    fn outputs(&self) -> Vec<PathBuf> {
        fs::read_dir(self.config.output_dir())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    fn standard_reference(&self) {
        write_reference(
            &self.config.reference_path(),
            &[
                ("A", &["CEL", "name"], &[&["555", "X"], &["777", "Z"]]),
                ("B", &["CEL", "name"], &[&["555", "Y"]]),
                ("Resumen", &["Total"], &[&["3"]]),
            ],
        );
    }
}

fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
}

#[test]
fn first_sheet_wins_end_to_end() {
    let ws = Workspace::new();
    ws.standard_reference();
    write_detail(&ws.pending("enero.xlsx"), "ENERO 2024", &["Celular"], &[&["555"]]);

    let result = BatchProcessor::new(&ws.config).run(at("2024-02-01 10:30")).unwrap();

    assert_eq!(result.matched_count, 1);
    let artifact = result.artifact_path.clone().unwrap();
    assert!(artifact.ends_with("20240201_1030_analisis_chipExpress_(POR_PAGAR).xlsx"));
    assert_eq!(result.files[0].skipped_sheets, vec!["Resumen"]);

    let table = read_artifact(&artifact).unwrap();
    assert_eq!(table.len(), 1);
    let name = table.column_index("name").unwrap();
    let period = table.column_index(PERIOD_COLUMN).unwrap();
    let source = table.column_index(SOURCE_FILE_COLUMN).unwrap();
    assert_eq!(table.rows[0][name], CellValue::Text("X".to_string()));
    assert_eq!(table.rows[0][period], CellValue::Text("ENERO 2024".to_string()));
    assert_eq!(table.rows[0][source], CellValue::Text("enero.xlsx".to_string()));

    assert!(!ws.pending("enero.xlsx").exists());
    assert!(ws.archived("enero.xlsx").exists());
}

#[test]
fn rerun_with_nothing_pending_is_a_no_op() {
    let ws = Workspace::new();
    ws.standard_reference();
    write_detail(&ws.pending("enero.xlsx"), "ENERO", &["Celular"], &[&["555"]]);

    let processor = BatchProcessor::new(&ws.config);
    processor.run(at("2024-02-01 10:30")).unwrap();
    let second = processor.run(at("2024-02-01 10:45")).unwrap();

    assert!(second.artifact_path.is_none());
    assert!(second.files.is_empty());
    assert_eq!(second.to_string(), "no pending detail files");
    assert_eq!(ws.outputs().len(), 1);
}

#[test]
fn files_are_concatenated_in_name_order_with_one_row_per_phone() {
    let ws = Workspace::new();
    ws.standard_reference();
    write_detail(
        &ws.pending("b_febrero.xlsx"),
        "FEBRERO",
        &["Número celular asignado", "Evaluación"],
        &[&["777", "2da evaluación"], &["555", "2da evaluación"]],
    );
    write_detail(
        &ws.pending("a_enero.xlsx"),
        "ENERO",
        &["Celular", "Evaluación"],
        &[&["555", "1ra evaluación"], &["555", "1ra repetida"]],
    );

    let result = BatchProcessor::new(&ws.config).run(at("2024-03-01 08:00")).unwrap();
    assert_eq!(result.matched_count, 2);
    assert_eq!(result.processed_files().len(), 2);
    assert!(matches!(
        result.files[1].outcome,
        FileOutcome::Matched { rows: 1, duplicates: 1 }
    ));
    // only the first detail row of 555 counts, and b_febrero keeps just 777
    assert_eq!(result.files[0].stages.first().count, 1);
    assert_eq!(result.files[0].stages.total_commission(), 25.0);
    assert_eq!(result.files[1].stages.stage(Stage::Second).count, 1);
    assert_eq!(result.files[1].stages.first().count, 0);

    let table = read_artifact(&result.artifact_path.unwrap()).unwrap();
    let source = table.column_index(SOURCE_FILE_COLUMN).unwrap();
    let cel = table.column_index("CEL").unwrap();
    let sources: Vec<String> = table.rows.iter().map(|r| r[source].to_string()).collect();
    let phones: Vec<String> = table.rows.iter().map(|r| r[cel].to_string()).collect();
    assert_eq!(sources, vec!["a_enero.xlsx", "b_febrero.xlsx"]);
    assert_eq!(phones, vec!["555", "777"]);
}

#[test]
fn zero_match_file_archived_when_another_file_produced_output() {
    let ws = Workspace::new();
    ws.standard_reference();
    write_detail(&ws.pending("a.xlsx"), "ENERO", &["Celular"], &[&["555"]]);
    write_detail(&ws.pending("b.xlsx"), "ENERO", &["Celular"], &[&["000"]]);

    let result = BatchProcessor::new(&ws.config).run(at("2024-02-01 10:30")).unwrap();
    let empty = &result.files[1];
    assert!(matches!(empty.outcome, FileOutcome::NoMatches));
    assert!(empty.is_archived());
    assert_eq!(empty.to_string(), "b.xlsx: 0 matches (period ENERO), file archived");
    assert!(ws.archived("b.xlsx").exists());
}

#[test]
fn zero_match_batch_archives_only_under_file_success_policy() {
    let ws = Workspace::new();
    ws.standard_reference();
    write_detail(&ws.pending("sin.xlsx"), "MARZO", &["Celular"], &[&["000"]]);

    let result = BatchProcessor::new(&ws.config).run(at("2024-04-01 09:00")).unwrap();
    assert!(result.artifact_path.is_none());
    assert_eq!(result.files[0].archive, ArchiveStatus::LeftPending);
    assert!(ws.pending("sin.xlsx").exists());
    assert!(result.to_string().starts_with("no matches found in any detail file"));

    let mut config = ws.config.clone();
    config.archive_policy = ArchivePolicy::OnFileSuccess;
    let result = BatchProcessor::new(&config).run(at("2024-04-01 09:05")).unwrap();
    assert!(result.artifact_path.is_none());
    assert_eq!(
        result.files[0].to_string(),
        "sin.xlsx: 0 matches (period MARZO), file archived"
    );
    assert!(ws.archived("sin.xlsx").exists());
    assert!(ws.outputs().is_empty());
}

#[test]
fn missing_reference_aborts_before_touching_files() {
    let ws = Workspace::new();
    write_detail(&ws.pending("enero.xlsx"), "ENERO", &["Celular"], &[&["555"]]);

    let err = BatchProcessor::new(&ws.config)
        .run(at("2024-02-01 10:30"))
        .unwrap_err();

    assert!(matches!(err, Error::Load { .. }));
    assert!(ws.pending("enero.xlsx").exists());
    assert!(ws.outputs().is_empty());
}

#[test]
fn bad_files_are_skipped_and_stay_pending() {
    let ws = Workspace::new();
    ws.standard_reference();
    write_detail(&ws.pending("a_ok.xlsx"), "ENERO", &["Celular"], &[&["555"]]);
    write_detail(&ws.pending("b_sin_columna.xlsx"), "ENERO", &["Teléfono"], &[&["555"]]);
    fs::write(ws.pending("c_roto.xlsx"), b"not a workbook").unwrap();

    let result = BatchProcessor::new(&ws.config).run(at("2024-02-01 10:30")).unwrap();

    let errors = result.per_file_errors();
    assert_eq!(errors.len(), 2);
    assert!(matches!(errors[0], ("b_sin_columna.xlsx", Error::Schema { .. })));
    assert!(matches!(errors[1], ("c_roto.xlsx", Error::Parse { .. })));
    assert!(result.files[1].to_string().starts_with("b_sin_columna.xlsx: skipped"));

    assert!(result.artifact_path.is_some());
    assert!(ws.archived("a_ok.xlsx").exists());
    assert!(ws.pending("b_sin_columna.xlsx").exists());
    assert!(ws.pending("c_roto.xlsx").exists());
}

#[test]
fn write_failure_is_fatal_and_moves_nothing() {
    let ws = Workspace::new();
    ws.standard_reference();
    write_detail(&ws.pending("enero.xlsx"), "ENERO", &["Celular"], &[&["555"]]);
    fs::write(
        ws.config
            .output_dir()
            .join("20240201_1030_analisis_chipExpress_(POR_PAGAR).xlsx"),
        b"previous run",
    )
    .unwrap();

    let err = BatchProcessor::new(&ws.config)
        .run(at("2024-02-01 10:30"))
        .unwrap_err();

    assert!(matches!(err, Error::Write { .. }));
    assert!(ws.pending("enero.xlsx").exists());
}

#[test]
fn paid_artifacts_feed_the_aggregate_report() {
    let ws = Workspace::new();
    write_reference(
        &ws.config.reference_path(),
        &[(
            "Ruta",
            &["CEL", "Vendedor"],
            &[&["1", "a"], &["2", "a"], &["3", "b"], &["4", "b"]],
        )],
    );
    write_detail(
        &ws.pending("enero.xlsx"),
        "ENERO",
        &["Celular", "Evaluación"],
        &[&["1", "1ra evaluación"], &["2", "1ra evaluación"], &["3", "2DA EVALUACIÓN"], &["9", "1ra"]],
    );

    let processor = BatchProcessor::new(&ws.config);
    let first = processor.run(at("2024-02-01 10:30")).unwrap();
    write_detail(
        &ws.pending("febrero.xlsx"),
        "FEBRERO",
        &["Celular", "Evaluación"],
        &[&["4", "Sin evaluar"]],
    );
    let second = processor.run(at("2024-03-01 10:30")).unwrap();

    let paid = toggle_payment_state(&first.artifact_path.unwrap()).unwrap();
    let pending = second.artifact_path.unwrap();

    let artifacts = list_artifacts(&ws.config.output_dir()).unwrap();
    assert_eq!(artifacts[0].state, PaymentState::Pending);
    assert_eq!(artifacts[1].state, PaymentState::Paid);

    let aggregator = EvaluationAggregator::new(&ws.config);
    let report = aggregator.aggregate_paid(&[paid, pending], 4);

    assert_eq!(report.artifacts.len(), 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.totals.stage(Stage::First).count, 2);
    assert_eq!(report.totals.stage(Stage::Second).count, 1);
    assert_eq!(report.totals.total_commission(), 75.0);
    assert_eq!(report.retention_rates(), [0.5, 0.0, 0.0]);
    assert_eq!(report.conversion_rate(), 0.5);
    assert_eq!(report.periods.keys().collect::<Vec<_>>(), vec!["2024-02"]);
}

#[test]
fn redelivered_file_never_replaces_its_archived_namesake() {
    let ws = Workspace::new();
    ws.standard_reference();
    fs::write(ws.archived("enero.xlsx"), b"entrega anterior").unwrap();
    write_detail(&ws.pending("enero.xlsx"), "ENERO", &["Celular"], &[&["555"]]);

    let result = BatchProcessor::new(&ws.config).run(at("2024-02-01 10:30")).unwrap();

    assert!(result.artifact_path.is_some());
    assert!(matches!(result.files[0].archive, ArchiveStatus::Failed(_)));
    assert_eq!(result.archived_count(), 0);
    assert!(ws.pending("enero.xlsx").exists());
    assert_eq!(fs::read(ws.archived("enero.xlsx")).unwrap(), b"entrega anterior");
}

#[test]
fn paid_artifacts_are_grouped_by_recharge_month() {
    let ws = Workspace::new();
    ws.standard_reference();
    write_detail(
        &ws.pending("enero.xlsx"),
        "ENERO",
        &["Celular", "Evaluación", "Fecha Primera Recarga"],
        &[
            &["555", "1ra evaluación", "2024-01-15"],
            &["777", "2da evaluación", "2024-01-28"],
        ],
    );

    let result = BatchProcessor::new(&ws.config).run(at("2024-02-01 09:00")).unwrap();
    let paid = toggle_payment_state(&result.artifact_path.unwrap()).unwrap();

    let report = EvaluationAggregator::new(&ws.config).aggregate_paid(&[paid], 0);
    assert_eq!(report.periods.keys().collect::<Vec<_>>(), vec!["2024-01"]);
    assert_eq!(
        report.artifacts[0].date,
        NaiveDate::from_ymd_opt(2024, 1, 28).unwrap()
    );
}
