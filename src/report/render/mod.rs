//! Report rendering: [`ReportData`] to bytes in one of the supported
//! output formats.
//!
//! Rendering is deterministic: identical report data and format produce
//! the same sheets, tables and rows in the same order.

mod csv;
mod excel;
mod pdf;

use super::ReportData;
use crate::job_store::ReportFormat;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    /// The requested format string is not one of pdf / excel / csv.
    /// Raised at the API boundary where formats arrive as strings; the
    /// typed [`ReportFormat`] keeps the engine itself total.
    #[error("unsupported report format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to render {format} report: {message}")]
    RenderFailed {
        format: &'static str,
        message: String,
    },
}

/// Parse a format string, failing with the offending value.
pub fn parse_format(s: &str) -> Result<ReportFormat, RenderError> {
    ReportFormat::parse(s).ok_or_else(|| RenderError::UnsupportedFormat(s.to_string()))
}

/// Render a report into the requested format.
pub fn render(report: &ReportData, format: ReportFormat) -> Result<Vec<u8>, RenderError> {
    match format {
        ReportFormat::Csv => Ok(csv::render_csv(report).into_bytes()),
        ReportFormat::Excel => excel::render_excel(report),
        ReportFormat::Pdf => Ok(pdf::render_pdf(report)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{ReportDataset, SummaryMetric};

    pub(super) fn sample_report() -> ReportData {
        ReportData::assemble(
            "alarms",
            "Alarm Summary",
            serde_json::json!({"cell_id": 7}),
            None,
            vec![
                ReportDataset::new(
                    "active_alarms",
                    vec!["code".to_string(), "message".to_string()],
                    vec![
                        vec!["E-101".to_string(), "servo fault".to_string()],
                        vec!["E-204".to_string(), "estop engaged".to_string()],
                    ],
                ),
                ReportDataset::new(
                    "alarm_history",
                    vec!["code".to_string(), "count".to_string()],
                    vec![vec!["E-101".to_string(), "4".to_string()]],
                ),
            ],
            Some(vec![
                SummaryMetric::new("Active Alarms", "2"),
                SummaryMetric::new("Cells Affected", "1"),
            ]),
        )
    }

    #[test]
    fn test_parse_format_names_offending_value() {
        assert!(parse_format("pdf").is_ok());
        assert!(parse_format("excel").is_ok());
        assert!(parse_format("csv").is_ok());

        let err = parse_format("docx").unwrap_err();
        assert!(err.to_string().contains("docx"));
    }

    #[test]
    fn test_render_dispatches_all_formats() {
        let report = sample_report();
        for format in [ReportFormat::Pdf, ReportFormat::Excel, ReportFormat::Csv] {
            let bytes = render(&report, format).unwrap();
            assert!(!bytes.is_empty());
        }
    }

    #[test]
    fn test_render_is_structurally_deterministic() {
        let report = sample_report();
        let a = render(&report, ReportFormat::Csv).unwrap();
        let b = render(&report, ReportFormat::Csv).unwrap();
        assert_eq!(a, b);
    }
}
