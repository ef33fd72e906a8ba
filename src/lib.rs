//! Reconciles chip detail reports against a multi-sheet reference roster,
//! archives processed reports and analyses paid commission artifacts.

pub mod artifact;
pub mod batch;
pub mod columns;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod ingest;
pub mod join;
pub mod reference;
pub mod report;
pub mod table;

pub use artifact::{
    list_artifacts, toggle_payment_state, write_artifact, ArtifactInfo, PaymentState,
};
pub use batch::{archive, list_pending_detail_files, BatchProcessor, BatchResult, FileOutcome};
pub use config::{ArchivePolicy, Config};
pub use error::{Error, Result};
pub use evaluation::{AggregateReport, EvaluationAggregator, Stage};
pub use reference::{load_reference, ReferenceDataset};
