use crate::artifact::{parse_artifact_name, read_artifact, ArtifactInfo, PaymentState};
use crate::columns::ColumnResolver;
use crate::config::Config;
use crate::table::Table;
use chrono::NaiveDate;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    First,
    Second,
    Third,
    Fourth,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::First, Stage::Second, Stage::Third, Stage::Fourth];

    pub fn index(self) -> usize {
        match self {
            Stage::First => 0,
            Stage::Second => 1,
            Stage::Third => 2,
            Stage::Fourth => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::First => "1ra",
            Stage::Second => "2da",
            Stage::Third => "3ra",
            Stage::Fourth => "4ta",
        }
    }
}

/// Ordinal words and numeral per stage. Words match as lowercase substrings.
const STAGE_RULES: [(Stage, &[&str], char); 4] = [
    (Stage::First, &["first", "primer"], '1'),
    (Stage::Second, &["second", "segund"], '2'),
    (Stage::Third, &["third", "tercer"], '3'),
    (Stage::Fourth, &["fourth", "cuart"], '4'),
];

/// What may follow a stage numeral: ordinal suffix, letter or degree sign
const NUMERAL_SUFFIXES: &str = "st|nd|rd|th|ra|er|da|do|ta|to|a|°|º|ª";

fn stage_patterns() -> &'static [(Stage, Regex)] {
    static PATTERNS: OnceLock<Vec<(Stage, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        STAGE_RULES
            .iter()
            .map(|(stage, words, numeral)| {
                // a numeral preceded by another digit is part of a larger number
                let pattern = format!(
                    "{}|(?:^|[^0-9]){}(?:{})",
                    words.join("|"),
                    numeral,
                    NUMERAL_SUFFIXES
                );
                let regex = Regex::new(&pattern).expect("stage pattern is valid");
                (*stage, regex)
            })
            .collect()
    })
}

/// Stage named by free evaluation text, if any
pub fn classify_stage(text: &str) -> Option<Stage> {
    let lower = text.to_lowercase();
    stage_patterns()
        .iter()
        .find(|(_, regex)| regex.is_match(&lower))
        .map(|(stage, _)| *stage)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTally {
    pub count: usize,
    pub commission: f64,
}

impl StageTally {
    fn add(&mut self, other: StageTally) {
        self.count += other.count;
        self.commission += other.commission;
    }
}

/// Per-stage counts and commissions
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageBreakdown {
    pub stages: [StageTally; 4],
}

impl StageBreakdown {
    pub fn stage(&self, stage: Stage) -> StageTally {
        self.stages[stage.index()]
    }

    pub fn first(&self) -> StageTally {
        self.stage(Stage::First)
    }

    /// Stages 2 to 4 combined
    pub fn other(&self) -> StageTally {
        let mut tally = StageTally::default();
        for stage in &Stage::ALL[1..] {
            tally.add(self.stage(*stage));
        }
        tally
    }

    pub fn total_commission(&self) -> f64 {
        self.first().commission + self.other().commission
    }

    /// Other-stage commission minus first-stage commission
    pub fn commission_difference(&self) -> f64 {
        self.other().commission - self.first().commission
    }

    /// Other-stage over first-stage commission; a zero first stage counts as 1
    pub fn commission_ratio(&self) -> f64 {
        let first = self.first().commission;
        let denominator = if first == 0.0 { 1.0 } else { first };
        self.other().commission / denominator
    }

    pub(crate) fn record(&mut self, stage: Stage, commission: f64) {
        let tally = &mut self.stages[stage.index()];
        tally.count += 1;
        tally.commission += commission;
    }

    fn merge(&mut self, other: &StageBreakdown) {
        for (mine, theirs) in self.stages.iter_mut().zip(other.stages.iter()) {
            mine.add(*theirs);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactSummary {
    pub file_name: String,
    /// Latest recharge date in the artifact, or the file name date when the
    /// artifact carries none
    pub date: NaiveDate,
    /// `YYYY-MM` of `date`
    pub period: String,
    pub breakdown: StageBreakdown,
    /// Rows whose evaluation text matched no stage
    pub unclassified: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodTotals {
    pub artifacts: usize,
    pub breakdown: StageBreakdown,
    ratio_sum: f64,
}

impl PeriodTotals {
    /// Mean of the per-artifact commission ratios in this period
    pub fn mean_commission_ratio(&self) -> f64 {
        if self.artifacts == 0 {
            0.0
        } else {
            self.ratio_sum / self.artifacts as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedArtifact {
    pub file: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateReport {
    /// Newest first
    pub artifacts: Vec<ArtifactSummary>,
    pub skipped: Vec<SkippedArtifact>,
    pub periods: BTreeMap<String, PeriodTotals>,
    pub totals: StageBreakdown,
    pub reference_rows: usize,
}

/// Share of the previous stage's lines that reached the next one (0 when empty)
pub fn retention_rate(from: StageTally, to: StageTally) -> f64 {
    if from.count == 0 {
        0.0
    } else {
        to.count as f64 / from.count as f64
    }
}

impl AggregateReport {
    /// 1→2, 2→3 and 3→4 retention over all artifacts
    pub fn retention_rates(&self) -> [f64; 3] {
        let s = &self.totals.stages;
        [
            retention_rate(s[0], s[1]),
            retention_rate(s[1], s[2]),
            retention_rate(s[2], s[3]),
        ]
    }

    /// First-stage lines over the reference population (0 when there is none)
    pub fn conversion_rate(&self) -> f64 {
        if self.reference_rows == 0 {
            0.0
        } else {
            self.totals.first().count as f64 / self.reference_rows as f64
        }
    }
}

/// Per-line commission used when an artifact has no usable amount
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommissionRates {
    pub first_stage: f64,
    pub other_stage: f64,
}

impl CommissionRates {
    pub fn from_config(config: &Config) -> Self {
        Self {
            first_stage: config.first_stage_rate,
            other_stage: config.other_stage_rate,
        }
    }

    pub(crate) fn for_stage(&self, stage: Stage) -> f64 {
        match stage {
            Stage::First => self.first_stage,
            _ => self.other_stage,
        }
    }
}

pub struct EvaluationAggregator {
    stage: ColumnResolver,
    commission: ColumnResolver,
    date: ColumnResolver,
    rates: CommissionRates,
}

impl EvaluationAggregator {
    pub fn new(config: &Config) -> Self {
        Self {
            stage: ColumnResolver::new(&config.stage_columns),
            commission: ColumnResolver::new(&config.commission_columns),
            date: ColumnResolver::new(&config.date_columns),
            rates: CommissionRates::from_config(config),
        }
    }

    /// Reduce every `PAGADO` artifact among `artifact_paths`. Anything else is
    /// listed in `skipped` with the reason.
    pub fn aggregate_paid(&self, artifact_paths: &[PathBuf], reference_rows: usize) -> AggregateReport {
        let mut report = AggregateReport {
            reference_rows,
            ..AggregateReport::default()
        };
        let mut ordered: Vec<(ArtifactInfo, ArtifactSummary)> = Vec::new();

        for path in artifact_paths {
            let info = match parse_artifact_name(path) {
                Ok(info) => info,
                Err(e) => {
                    report.skipped.push(skipped(&path.display().to_string(), e.to_string()));
                    continue;
                }
            };
            if info.state != PaymentState::Paid {
                debug!(file = %info.file_name, "not paid, ignored");
                report
                    .skipped
                    .push(skipped(&info.file_name, "not tagged PAGADO".to_string()));
                continue;
            }

            let summary = read_artifact(path).map_err(|e| e.to_string()).and_then(|table| {
                self.summarize(&info, &table)
            });
            match summary {
                Ok(summary) => ordered.push((info, summary)),
                Err(reason) => {
                    warn!(file = %info.file_name, "artifact skipped: {}", reason);
                    report.skipped.push(skipped(&info.file_name, reason));
                }
            }
        }

        ordered.sort_by(|(a_info, a), (b_info, b)| {
            (b.date, b_info.time)
                .cmp(&(a.date, a_info.time))
                .then_with(|| a.file_name.cmp(&b.file_name))
        });

        for (_, summary) in ordered {
            let period = report.periods.entry(summary.period.clone()).or_default();
            period.artifacts += 1;
            period.breakdown.merge(&summary.breakdown);
            period.ratio_sum += summary.breakdown.commission_ratio();
            report.totals.merge(&summary.breakdown);
            report.artifacts.push(summary);
        }

        report
    }

    /// Classify and total one artifact's rows
    pub fn summarize(&self, info: &ArtifactInfo, table: &Table) -> Result<ArtifactSummary, String> {
        let stage_column = self
            .stage
            .resolve(&table.headers)
            .ok_or_else(|| format!("no evaluation column (expected one of: {})", self.stage.describe()))?;
        let stage_idx = table.column_index(stage_column).unwrap_or_default();
        let commission_idx = self
            .commission
            .resolve(&table.headers)
            .and_then(|c| table.column_index(c));

        let date_idx = self.date.resolve(&table.headers).and_then(|c| table.column_index(c));
        let recharge_date =
            date_idx.and_then(|i| table.rows.iter().filter_map(|row| row[i].as_date()).max());
        if recharge_date.is_none() {
            debug!(file = %info.file_name, "no recharge dates, using the file name date");
        }
        let date = recharge_date.unwrap_or(info.date);

        let mut breakdown = StageBreakdown::default();
        let mut unclassified = 0;

        for row in &table.rows {
            let Some(stage) = classify_stage(&row[stage_idx].to_string()) else {
                unclassified += 1;
                continue;
            };
            let commission = commission_idx
                .and_then(|i| row[i].as_number())
                .unwrap_or_else(|| self.rates.for_stage(stage));
            breakdown.record(stage, commission);
        }

        Ok(ArtifactSummary {
            file_name: info.file_name.clone(),
            date,
            period: date.format("%Y-%m").to_string(),
            breakdown,
            unclassified,
        })
    }
}

fn skipped(file: &str, reason: String) -> SkippedArtifact {
    SkippedArtifact {
        file: file.to_string(),
        reason,
    }
}
