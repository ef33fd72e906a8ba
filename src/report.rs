use crate::artifact::{ArtifactInfo, StatusSummary};
use crate::error::{Error, Result};
use crate::evaluation::{AggregateReport, Stage};
use csv::Writer;
use std::path::Path;

/// Human-readable commission analysis
pub fn render_aggregate(report: &AggregateReport) -> String {
    let mut content = String::new();
    content.push_str("Paid Commission Analysis\n");
    content.push_str("========================\n\n");

    let totals = &report.totals;
    content.push_str(&format!(
        "Total 1ra evaluación: {}\n\
        Total otras evaluaciones: {}\n\
        Comisión 1ra: ${:.2}\n\
        Comisión otras: ${:.2}\n\
        Total comisiones: ${:.2}\n\n",
        totals.first().count,
        totals.other().count,
        totals.first().commission,
        totals.other().commission,
        totals.total_commission(),
    ));

    content.push_str("Retention by stage:\n");
    let rates = report.retention_rates();
    for (i, rate) in rates.iter().enumerate() {
        content.push_str(&format!(
            "   {} → {}: {:.1}%\n",
            Stage::ALL[i].label(),
            Stage::ALL[i + 1].label(),
            rate * 100.0
        ));
    }
    content.push_str(&format!(
        "Conversion from reference ({} lines): {:.1}%\n\n",
        report.reference_rows,
        report.conversion_rate() * 100.0
    ));

    if !report.periods.is_empty() {
        content.push_str("By month:\n");
        for (month, period) in &report.periods {
            let b = &period.breakdown;
            content.push_str(&format!(
                "   {}: 1ra {} / 2da {} / 3ra {} / 4ta {} | comisión 1ra ${:.2}, otras ${:.2}, diferencia ${:.2}, ratio {:.2}\n",
                month,
                b.stage(Stage::First).count,
                b.stage(Stage::Second).count,
                b.stage(Stage::Third).count,
                b.stage(Stage::Fourth).count,
                b.first().commission,
                b.other().commission,
                b.commission_difference(),
                period.mean_commission_ratio(),
            ));
        }
        content.push('\n');
    }

    if !report.artifacts.is_empty() {
        content.push_str("By file:\n");
        for artifact in &report.artifacts {
            let b = &artifact.breakdown;
            content.push_str(&format!(
                "   {} {}: 1ra {}, otras {}, comisión 1ra ${:.2}, otras ${:.2}\n",
                artifact.date.format("%Y-%m-%d"),
                artifact.file_name,
                b.first().count,
                b.other().count,
                b.first().commission,
                b.other().commission,
            ));
        }
        content.push('\n');
    }

    if !report.skipped.is_empty() {
        content.push_str("Skipped:\n");
        for skipped in &report.skipped {
            content.push_str(&format!("   {}: {}\n", skipped.file, skipped.reason));
        }
    }

    content
}

/// One CSV row per paid artifact
pub fn write_aggregate_csv(report: &AggregateReport, csv_path: &Path) -> Result<()> {
    let write_err = |e: csv::Error| Error::Write {
        path: csv_path.to_path_buf(),
        message: e.to_string(),
    };
    let mut writer = Writer::from_path(csv_path).map_err(write_err)?;

    writer.write_record([
        "Fecha",
        "Archivo",
        "Mes",
        "1ra Evaluación",
        "2da Evaluación",
        "3ra Evaluación",
        "4ta Evaluación",
        "Otras Evaluaciones",
        "Comisión 1ra",
        "Comisión Otras",
        "Total Comisiones",
        "Sin Clasificar",
    ])
    .map_err(write_err)?;

    for artifact in &report.artifacts {
        let b = &artifact.breakdown;
        writer.write_record(&[
            artifact.date.format("%Y-%m-%d").to_string(),
            artifact.file_name.clone(),
            artifact.period.clone(),
            b.stage(Stage::First).count.to_string(),
            b.stage(Stage::Second).count.to_string(),
            b.stage(Stage::Third).count.to_string(),
            b.stage(Stage::Fourth).count.to_string(),
            b.other().count.to_string(),
            format!("{:.2}", b.first().commission),
            format!("{:.2}", b.other().commission),
            format!("{:.2}", b.total_commission()),
            artifact.unclassified.to_string(),
        ])
        .map_err(write_err)?;
    }

    writer.flush()?;
    Ok(())
}

/// Artifact listing with payment states
pub fn render_status(artifacts: &[ArtifactInfo]) -> String {
    let summary = StatusSummary::from_artifacts(artifacts);
    let mut content = String::new();
    content.push_str(&format!(
        "Total comisiones: {} | Pagadas: {} | Pendientes: {}\n\n",
        summary.total, summary.paid, summary.pending
    ));

    for (month, (paid, pending)) in &summary.by_month {
        content.push_str(&format!("   {}: {} pagadas, {} por pagar\n", month, paid, pending));
    }
    if !summary.by_month.is_empty() {
        content.push('\n');
    }

    for artifact in artifacts {
        content.push_str(&format!(
            "   {}  {:<9}  {}\n",
            artifact.date.format("%Y-%m-%d"),
            artifact.state.to_string(),
            artifact.file_name
        ));
    }
    content
}
