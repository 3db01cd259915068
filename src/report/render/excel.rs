//! Excel (OOXML spreadsheet) rendering.
//!
//! An `.xlsx` file is a zip archive of XML parts; the workbook is written
//! directly with the `zip` crate. Sheet 1 holds the summary, followed by
//! one sheet per dataset. Sheet names are sanitized to Excel's 31-char
//! limit with non-alphanumerics replaced, and deduplicated on collision.

use super::RenderError;
use crate::report::{ReportData, ReportDataset};
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const MAX_SHEET_NAME_LEN: usize = 31;

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Sanitize a dataset name into a legal, unique sheet name.
fn sanitize_sheet_name(name: &str, used: &[String]) -> String {
    let mut base: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if base.is_empty() {
        base = "Sheet".to_string();
    }
    base.truncate(MAX_SHEET_NAME_LEN);

    if !used.iter().any(|u| u == &base) {
        return base;
    }
    let mut counter = 2;
    loop {
        let suffix = format!("_{}", counter);
        let mut candidate = base.clone();
        candidate.truncate(MAX_SHEET_NAME_LEN - suffix.len());
        candidate.push_str(&suffix);
        if !used.iter().any(|u| u == &candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// A cell is numeric only when its text round-trips through a number, so
/// values like "007" stay text.
fn is_numeric(field: &str) -> bool {
    if let Ok(i) = field.parse::<i64>() {
        return i.to_string() == field;
    }
    if let Ok(f) = field.parse::<f64>() {
        return f.is_finite() && f.to_string() == field;
    }
    false
}

fn cell_xml(field: &str) -> String {
    if is_numeric(field) {
        format!("<c t=\"n\"><v>{}</v></c>", field)
    } else {
        format!(
            "<c t=\"inlineStr\"><is><t xml:space=\"preserve\">{}</t></is></c>",
            xml_escape(field)
        )
    }
}

fn sheet_xml(rows: &[Vec<String>]) -> String {
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\"><sheetData>",
    );
    for row in rows {
        out.push_str("<row>");
        for field in row {
            out.push_str(&cell_xml(field));
        }
        out.push_str("</row>");
    }
    out.push_str("</sheetData></worksheet>");
    out
}

fn summary_rows(report: &ReportData) -> Vec<Vec<String>> {
    let mut rows = vec![
        vec!["Report".to_string(), report.metadata.report_name.clone()],
        vec!["Type".to_string(), report.metadata.report_type_id.clone()],
        vec![
            "Generated".to_string(),
            report.metadata.generated_at.to_rfc3339(),
        ],
        vec![
            "Total Records".to_string(),
            report.metadata.total_records.to_string(),
        ],
    ];
    if let Some((from, to)) = report.metadata.date_range {
        rows.push(vec![
            "Date Range".to_string(),
            format!("{} - {}", from, to),
        ]);
    }
    if let Some(summary) = &report.summary {
        for metric in summary {
            rows.push(vec![metric.name.clone(), metric.value.clone()]);
        }
    }
    rows
}

fn dataset_rows(dataset: &ReportDataset) -> Vec<Vec<String>> {
    let mut rows = Vec::with_capacity(dataset.rows.len() + 1);
    rows.push(dataset.columns.clone());
    rows.extend(dataset.rows.iter().cloned());
    rows
}

fn content_types_xml(sheet_count: usize) -> String {
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
         <Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
         <Default Extension=\"xml\" ContentType=\"application/xml\"/>\
         <Override PartName=\"/xl/workbook.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml\"/>",
    );
    for i in 1..=sheet_count {
        out.push_str(&format!(
            "<Override PartName=\"/xl/worksheets/sheet{}.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml\"/>",
            i
        ));
    }
    out.push_str("</Types>");
    out
}

fn root_rels_xml() -> &'static str {
    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
     <Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
     <Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument\" Target=\"xl/workbook.xml\"/>\
     </Relationships>"
}

fn workbook_xml(sheet_names: &[String]) -> String {
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <workbook xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" \
         xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\"><sheets>",
    );
    for (i, name) in sheet_names.iter().enumerate() {
        out.push_str(&format!(
            "<sheet name=\"{}\" sheetId=\"{}\" r:id=\"rId{}\"/>",
            xml_escape(name),
            i + 1,
            i + 1
        ));
    }
    out.push_str("</sheets></workbook>");
    out
}

fn workbook_rels_xml(sheet_count: usize) -> String {
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">",
    );
    for i in 1..=sheet_count {
        out.push_str(&format!(
            "<Relationship Id=\"rId{}\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet\" Target=\"worksheets/sheet{}.xml\"/>",
            i, i
        ));
    }
    out.push_str("</Relationships>");
    out
}

pub fn render_excel(report: &ReportData) -> Result<Vec<u8>, RenderError> {
    let fail = |e: &dyn std::fmt::Display| RenderError::RenderFailed {
        format: "excel",
        message: e.to_string(),
    };

    let mut sheet_names = vec!["Summary".to_string()];
    let mut sheets = vec![summary_rows(report)];
    for dataset in &report.data {
        let name = sanitize_sheet_name(&dataset.source_name, &sheet_names);
        sheet_names.push(name);
        sheets.push(dataset_rows(dataset));
    }

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let put = |writer: &mut ZipWriter<Cursor<Vec<u8>>>,
                   name: &str,
                   content: &str|
     -> Result<(), RenderError> {
        writer.start_file(name, options).map_err(|e| fail(&e))?;
        writer.write_all(content.as_bytes()).map_err(|e| fail(&e))
    };

    put(
        &mut writer,
        "[Content_Types].xml",
        &content_types_xml(sheets.len()),
    )?;
    put(&mut writer, "_rels/.rels", root_rels_xml())?;
    put(&mut writer, "xl/workbook.xml", &workbook_xml(&sheet_names))?;
    put(
        &mut writer,
        "xl/_rels/workbook.xml.rels",
        &workbook_rels_xml(sheets.len()),
    )?;
    for (i, rows) in sheets.iter().enumerate() {
        put(
            &mut writer,
            &format!("xl/worksheets/sheet{}.xml", i + 1),
            &sheet_xml(rows),
        )?;
    }

    let cursor = writer.finish().map_err(|e| fail(&e))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::render::tests::sample_report;
    use std::io::Read;

    fn read_archive_file(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
        let mut file = archive.by_name(name).unwrap();
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        content
    }

    #[test]
    fn test_sanitize_sheet_name() {
        assert_eq!(sanitize_sheet_name("alarms", &[]), "alarms");
        assert_eq!(sanitize_sheet_name("active alarms!", &[]), "active_alarms_");
        assert_eq!(sanitize_sheet_name("", &[]), "Sheet");

        let long = "a".repeat(40);
        assert_eq!(sanitize_sheet_name(&long, &[]).len(), MAX_SHEET_NAME_LEN);
    }

    #[test]
    fn test_sanitize_sheet_name_dedupes() {
        let used = vec!["alarms".to_string()];
        assert_eq!(sanitize_sheet_name("alarms", &used), "alarms_2");

        let used = vec!["alarms".to_string(), "alarms_2".to_string()];
        assert_eq!(sanitize_sheet_name("alarms", &used), "alarms_3");

        // Deduplication still respects the length limit
        let long = "a".repeat(31);
        let used = vec![long.clone()];
        let deduped = sanitize_sheet_name(&long, &used);
        assert!(deduped.len() <= MAX_SHEET_NAME_LEN);
        assert!(deduped.ends_with("_2"));
    }

    #[test]
    fn test_numeric_detection_roundtrips() {
        assert!(is_numeric("42"));
        assert!(is_numeric("-3"));
        assert!(is_numeric("3.5"));
        assert!(!is_numeric("007"));
        assert!(!is_numeric("E-101"));
        assert!(!is_numeric(""));
        assert!(!is_numeric("1.0")); // would re-render as "1"
    }

    #[test]
    fn test_workbook_structure() {
        let report = sample_report();
        let bytes = render_excel(&report).unwrap();

        // Zip magic
        assert_eq!(&bytes[0..2], b"PK");

        let workbook = read_archive_file(&bytes, "xl/workbook.xml");
        assert!(workbook.contains("name=\"Summary\""));
        assert!(workbook.contains("name=\"active_alarms\""));
        assert!(workbook.contains("name=\"alarm_history\""));

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.clone())).unwrap();
        let names: Vec<String> = archive.file_names().map(|s| s.to_string()).collect();
        assert!(names.contains(&"[Content_Types].xml".to_string()));
        assert!(names.contains(&"_rels/.rels".to_string()));
        assert!(names.contains(&"xl/_rels/workbook.xml.rels".to_string()));
        assert!(names.contains(&"xl/worksheets/sheet1.xml".to_string()));
        assert!(names.contains(&"xl/worksheets/sheet3.xml".to_string()));
        drop(archive);

        // Summary sheet carries the metrics
        let summary = read_archive_file(&bytes, "xl/worksheets/sheet1.xml");
        assert!(summary.contains("Alarm Summary"));
        assert!(summary.contains("Active Alarms"));

        // Dataset sheet carries header and rows
        let sheet2 = read_archive_file(&bytes, "xl/worksheets/sheet2.xml");
        assert!(sheet2.contains("servo fault"));
        assert!(sheet2.contains("<t xml:space=\"preserve\">code</t>"));
    }

    #[test]
    fn test_cells_escape_xml() {
        let report = crate::report::ReportData::assemble(
            "t",
            "Escapes <&>",
            serde_json::Value::Null,
            None,
            vec![crate::report::ReportDataset::new(
                "rows",
                vec!["v".to_string()],
                vec![vec!["a<b & c>\"d\"".to_string()]],
            )],
            None,
        );
        let bytes = render_excel(&report).unwrap();
        let sheet = read_archive_file(&bytes, "xl/worksheets/sheet2.xml");
        assert!(sheet.contains("a&lt;b &amp; c&gt;&quot;d&quot;"));
        assert!(!sheet.contains("a<b"));
    }
}
