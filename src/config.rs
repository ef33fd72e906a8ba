use crate::columns::{
    DEFAULT_COMMISSION_COLUMNS, DEFAULT_DATE_COLUMNS, DEFAULT_PHONE_COLUMNS, DEFAULT_STAGE_COLUMNS,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Multi-sheet reference workbook (the base roster)
    pub reference_file: String,
    // Working directories
    pub pending_directory: String,
    pub archive_directory: String,
    pub output_directory: String,
    /// Join key column in every reference sheet
    pub key_column: String,
    // Accepted header spellings, highest priority first
    pub phone_columns: Vec<String>,
    pub stage_columns: Vec<String>,
    pub commission_columns: Vec<String>,
    pub date_columns: Vec<String>,
    // Imputed commission per line when an artifact carries no amount
    pub first_stage_rate: f64,
    pub other_stage_rate: f64,
    pub archive_policy: ArchivePolicy,
}

/// When successfully processed detail files leave the pending directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchivePolicy {
    /// Archive only when the batch as a whole produced an artifact
    #[serde(rename = "on_batch_output")]
    OnBatchOutput,
    /// Archive every file that was processed without error
    #[serde(rename = "on_file_success")]
    OnFileSuccess,
}

impl Default for ArchivePolicy {
    fn default() -> Self {
        ArchivePolicy::OnBatchOutput
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reference_file: "data/CHIPS RUTA.xlsx".to_string(),
            pending_directory: "Detalle".to_string(),
            archive_directory: "Detalle historico".to_string(),
            output_directory: "Resultados".to_string(),
            key_column: "CEL".to_string(),
            phone_columns: to_strings(DEFAULT_PHONE_COLUMNS),
            stage_columns: to_strings(DEFAULT_STAGE_COLUMNS),
            commission_columns: to_strings(DEFAULT_COMMISSION_COLUMNS),
            date_columns: to_strings(DEFAULT_DATE_COLUMNS),
            first_stage_rate: 25.0,
            other_stage_rate: 25.0,
            archive_policy: ArchivePolicy::default(),
        }
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl Config {
    pub fn load_from_file(file_path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(file_path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", file_path, e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, file_path: &str) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(file_path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.key_column.trim().is_empty() {
            return Err(Error::Config("key_column must not be empty".to_string()));
        }
        if self.phone_columns.is_empty() {
            return Err(Error::Config(
                "phone_columns must list at least one header".to_string(),
            ));
        }
        if self.first_stage_rate < 0.0 || self.other_stage_rate < 0.0 {
            return Err(Error::Config(
                "commission rates must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn reference_path(&self) -> PathBuf {
        PathBuf::from(&self.reference_file)
    }

    pub fn pending_dir(&self) -> PathBuf {
        PathBuf::from(&self.pending_directory)
    }

    pub fn archive_dir(&self) -> PathBuf {
        PathBuf::from(&self.archive_directory)
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.output_directory)
    }
}
