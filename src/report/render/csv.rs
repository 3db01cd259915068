//! CSV rendering.
//!
//! Output layout: a summary block, a blank line, then one block per
//! dataset (source name, header row, data rows) separated by blank lines.
//! Field escaping follows RFC4180: fields containing comma, quote, CR or
//! LF are quoted, with inner quotes doubled.

use crate::report::ReportData;

/// Escape a single field per RFC4180.
fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn write_row(out: &mut String, fields: &[String]) {
    let line = fields
        .iter()
        .map(|f| escape_field(f))
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&line);
    out.push('\n');
}

pub fn render_csv(report: &ReportData) -> String {
    let mut out = String::new();

    // Summary block
    write_row(
        &mut out,
        &["Report".to_string(), report.metadata.report_name.clone()],
    );
    write_row(
        &mut out,
        &["Type".to_string(), report.metadata.report_type_id.clone()],
    );
    write_row(
        &mut out,
        &[
            "Generated".to_string(),
            report.metadata.generated_at.to_rfc3339(),
        ],
    );
    write_row(
        &mut out,
        &[
            "Total Records".to_string(),
            report.metadata.total_records.to_string(),
        ],
    );
    if let Some((from, to)) = report.metadata.date_range {
        write_row(
            &mut out,
            &["Date Range".to_string(), format!("{} - {}", from, to)],
        );
    }
    if let Some(summary) = &report.summary {
        for metric in summary {
            write_row(&mut out, &[metric.name.clone(), metric.value.clone()]);
        }
    }

    // Dataset blocks
    for dataset in &report.data {
        out.push('\n');
        write_row(&mut out, std::slice::from_ref(&dataset.source_name));
        write_row(&mut out, &dataset.columns);
        for row in &dataset.rows {
            write_row(&mut out, row);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::render::tests::sample_report;
    use crate::report::{ReportData, ReportDataset};

    /// Minimal RFC4180 parser used to verify the escaping round-trips.
    fn parse_csv_line(line: &str) -> Vec<String> {
        let mut fields = Vec::new();
        let mut field = String::new();
        let mut chars = line.chars().peekable();
        let mut in_quotes = false;

        while let Some(c) = chars.next() {
            if in_quotes {
                if c == '"' {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                } else {
                    field.push(c);
                }
            } else {
                match c {
                    '"' => in_quotes = true,
                    ',' => fields.push(std::mem::take(&mut field)),
                    _ => field.push(c),
                }
            }
        }
        fields.push(field);
        fields
    }

    #[test]
    fn test_escape_plain_field_unchanged() {
        assert_eq!(escape_field("hello"), "hello");
        assert_eq!(escape_field("E-101"), "E-101");
    }

    #[test]
    fn test_escape_comma_quote_newline() {
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_field("line1\nline2"), "\"line1\nline2\"");
    }

    #[test]
    fn test_spec_escaping_example() {
        // The cell `a,"b"\nc` must render as `"a,""b""\nc"`
        let cell = "a,\"b\"\nc";
        assert_eq!(escape_field(cell), "\"a,\"\"b\"\"\nc\"");
    }

    #[test]
    fn test_escaping_roundtrip() {
        let original = "a,\"b\"\nc";
        let report = ReportData::assemble(
            "t",
            "Roundtrip",
            serde_json::Value::Null,
            None,
            vec![ReportDataset::new(
                "rows",
                vec!["value".to_string()],
                vec![vec![original.to_string()]],
            )],
            None,
        );
        let rendered = render_csv(&report);

        // The quoted field spans a physical newline; reassemble the logical
        // line before parsing.
        let row_start = rendered.find("\"a,").unwrap();
        let logical_line = &rendered[row_start..rendered.len() - 1];
        let fields = parse_csv_line(logical_line);
        assert_eq!(fields, vec![original.to_string()]);
    }

    #[test]
    fn test_layout_summary_blank_line_datasets() {
        let report = sample_report();
        let rendered = render_csv(&report);
        let lines: Vec<&str> = rendered.lines().collect();

        assert_eq!(lines[0], "Report,Alarm Summary");
        assert_eq!(lines[1], "Type,alarms");
        assert!(lines[2].starts_with("Generated,"));
        assert_eq!(lines[3], "Total Records,3");
        assert_eq!(lines[4], "Active Alarms,2");
        assert_eq!(lines[5], "Cells Affected,1");
        assert_eq!(lines[6], "");
        assert_eq!(lines[7], "active_alarms");
        assert_eq!(lines[8], "code,message");
        assert_eq!(lines[9], "E-101,servo fault");
        assert_eq!(lines[10], "E-204,estop engaged");
        assert_eq!(lines[11], "");
        assert_eq!(lines[12], "alarm_history");
        assert_eq!(lines[13], "code,count");
        assert_eq!(lines[14], "E-101,4");
    }
}
