use anyhow::{Context, Result};
use chip_express_analyzer::report::{render_aggregate, render_status, write_aggregate_csv};
use chip_express_analyzer::{
    list_artifacts, load_reference, toggle_payment_state, BatchProcessor, Config,
    EvaluationAggregator, FileOutcome, PaymentState,
};
use clap::{Arg, ArgMatches, Command};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let matches = Command::new("chip-express-analyzer")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Reconciles chip detail reports against the reference roster")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml")
                .global(true),
        )
        .subcommand_required(true)
        .subcommand(Command::new("run").about("Match pending detail files and write a new artifact"))
        .subcommand(Command::new("status").about("List artifacts and their payment state"))
        .subcommand(
            Command::new("toggle")
                .about("Switch an artifact between POR_PAGAR and PAGADO")
                .arg(Arg::new("file").required(true).value_name("FILE")),
        )
        .subcommand(
            Command::new("report")
                .about("Analyse paid artifacts")
                .arg(
                    Arg::new("csv")
                        .long("csv")
                        .value_name("PATH")
                        .help("Also export per-file figures as CSV"),
                ),
        )
        .get_matches();

    let config_file = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("config.toml");

    // Load or create configuration
    let config = if Path::new(config_file).exists() {
        Config::load_from_file(config_file)
            .with_context(|| format!("Failed to load configuration from {}", config_file))?
    } else {
        println!("📝 Creating default configuration file: {}", config_file);
        Config::default().save_to_file(config_file)?;
        println!(
            "⚠️  Please edit {} and set reference_file, then run the program again.",
            config_file
        );
        return Ok(());
    };

    for dir in [config.pending_dir(), config.archive_dir(), config.output_dir()] {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }

    match matches.subcommand() {
        Some(("run", _)) => run_batch(&config),
        Some(("status", _)) => show_status(&config),
        Some(("toggle", args)) => toggle(&config, args),
        Some(("report", args)) => report(&config, args),
        _ => Ok(()),
    }
}

fn run_batch(config: &Config) -> Result<()> {
    println!("📋 Reference workbook: {}", config.reference_file);
    println!("📂 Reading detail files from: {}", config.pending_directory);

    let processor = BatchProcessor::new(config);
    let timestamp = chrono::Local::now().naive_local();
    let result = match processor.run(timestamp) {
        Ok(result) => result,
        Err(e) => {
            println!("❌ Batch aborted: {}", e);
            return Err(e.into());
        }
    };

    for file in &result.files {
        let icon = match file.outcome {
            FileOutcome::Matched { .. } => "✅",
            FileOutcome::NoMatches => "⚠️ ",
            FileOutcome::Failed(_) => "❌",
        };
        println!("   {} {}", icon, file);
        let other = file.stages.other();
        if file.stages.first().count + other.count > 0 {
            println!(
                "      1ra: {} | otras: {} | comisión ${:.2}",
                file.stages.first().count,
                other.count,
                file.stages.total_commission()
            );
        }
        if !file.skipped_sheets.is_empty() {
            println!(
                "      reference sheets without {}: {}",
                config.key_column,
                file.skipped_sheets.join(", ")
            );
        }
    }

    match &result.artifact_path {
        Some(_) => println!("\n✅ {}", result),
        None if result.files.is_empty() => println!("\nℹ️  {}", result),
        None => println!("\n⚠️  {}", result),
    }
    Ok(())
}

fn show_status(config: &Config) -> Result<()> {
    let artifacts = list_artifacts(&config.output_dir())?;
    if artifacts.is_empty() {
        println!("⚠️  No artifacts in {}", config.output_directory);
        return Ok(());
    }
    print!("{}", render_status(&artifacts));
    Ok(())
}

fn toggle(config: &Config, args: &ArgMatches) -> Result<()> {
    let file = args
        .get_one::<String>("file")
        .context("missing artifact file name")?;
    let path = if Path::new(file).exists() {
        PathBuf::from(file)
    } else {
        config.output_dir().join(file)
    };

    let new_path = toggle_payment_state(&path)
        .with_context(|| format!("Failed to toggle {}", path.display()))?;
    println!("✅ Estado actualizado: {}", new_path.display());
    Ok(())
}

fn report(config: &Config, args: &ArgMatches) -> Result<()> {
    let paid: Vec<PathBuf> = list_artifacts(&config.output_dir())?
        .into_iter()
        .filter(|a| a.state == PaymentState::Paid)
        .map(|a| a.path)
        .collect();
    if paid.is_empty() {
        println!("⚠️  No paid artifacts to analyse");
        return Ok(());
    }

    let reference_rows = match load_reference(&config.reference_path()) {
        Ok(reference) => reference.keyed_row_count(&config.key_column),
        Err(e) => {
            warn!("conversion rate unavailable: {}", e);
            0
        }
    };

    let aggregator = EvaluationAggregator::new(config);
    let aggregate = aggregator.aggregate_paid(&paid, reference_rows);
    print!("{}", render_aggregate(&aggregate));

    if let Some(csv_path) = args.get_one::<String>("csv") {
        write_aggregate_csv(&aggregate, Path::new(csv_path))?;
        println!("📄 CSV written to {}", csv_path);
    }
    Ok(())
}
