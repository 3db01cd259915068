//! Normalized report documents and the collector contract.

pub mod collector;
pub mod collectors;
pub mod render;

pub use collector::{CollectError, CollectorRegistry, ReportCollector};

use chrono::{DateTime, NaiveDate, Utc};

/// Identity and provenance of a generated report.
#[derive(Debug, Clone)]
pub struct ReportMetadata {
    pub report_type_id: String,
    pub report_name: String,
    pub generated_at: DateTime<Utc>,
    /// The parameter bag the report was requested with.
    pub parameters: serde_json::Value,
    /// Total rows across all datasets.
    pub total_records: usize,
    /// Names of the data sources that contributed datasets.
    pub sources: Vec<String>,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
}

/// A single tabular dataset inside a report.
#[derive(Debug, Clone)]
pub struct ReportDataset {
    pub source_name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ReportDataset {
    pub fn new(source_name: impl Into<String>, columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            source_name: source_name.into(),
            columns,
            rows,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// An aggregate key metric shown in the report's summary section.
#[derive(Debug, Clone)]
pub struct SummaryMetric {
    pub name: String,
    pub value: String,
}

impl SummaryMetric {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A fully collected report, ready for rendering.
///
/// Built fresh on every firing and discarded after rendering; only the
/// rendered artifact and the run record outlive it.
#[derive(Debug, Clone)]
pub struct ReportData {
    pub metadata: ReportMetadata,
    pub data: Vec<ReportDataset>,
    pub summary: Option<Vec<SummaryMetric>>,
}

impl ReportData {
    /// Assemble a report, deriving record counts and source names from the
    /// datasets.
    pub fn assemble(
        report_type_id: impl Into<String>,
        report_name: impl Into<String>,
        parameters: serde_json::Value,
        date_range: Option<(NaiveDate, NaiveDate)>,
        data: Vec<ReportDataset>,
        summary: Option<Vec<SummaryMetric>>,
    ) -> Self {
        let total_records = data.iter().map(|d| d.row_count()).sum();
        let sources = data.iter().map(|d| d.source_name.clone()).collect();
        Self {
            metadata: ReportMetadata {
                report_type_id: report_type_id.into(),
                report_name: report_name.into(),
                generated_at: Utc::now(),
                parameters,
                total_records,
                sources,
                date_range,
            },
            data,
            summary,
        }
    }
}
