//! PDF rendering.
//!
//! Writes a minimal PDF 1.4 document by hand: a catalog, a page tree, two
//! standard fonts (Helvetica-Bold for headings, Courier for table text)
//! and one content stream per page. Layout is line-oriented: a header
//! block, the summary section, then one fixed-width table per dataset,
//! paginated at a fixed line count.

use crate::report::{ReportData, ReportDataset};

const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
const MARGIN: f32 = 50.0;
const LEADING: f32 = 13.0;
const LINES_PER_PAGE: usize = 54;
/// Column width cap keeps wide cells from pushing tables off the page.
const MAX_COLUMN_WIDTH: usize = 28;

#[derive(Debug, Clone, Copy, PartialEq)]
enum FontSel {
    Heading(f32),
    Body(f32),
}

struct Line {
    text: String,
    font: FontSel,
}

impl Line {
    fn heading(text: impl Into<String>, size: f32) -> Self {
        Self {
            text: text.into(),
            font: FontSel::Heading(size),
        }
    }

    fn body(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            font: FontSel::Body(9.0),
        }
    }

    fn blank() -> Self {
        Self::body("")
    }
}

fn truncate_cell(cell: &str, width: usize) -> String {
    if cell.chars().count() <= width {
        cell.to_string()
    } else {
        let truncated: String = cell.chars().take(width.saturating_sub(1)).collect();
        format!("{}~", truncated)
    }
}

/// Render a dataset as fixed-width text rows (header, separator, data).
fn table_lines(dataset: &ReportDataset) -> Vec<String> {
    let column_count = dataset.columns.len();
    let mut widths: Vec<usize> = dataset.columns.iter().map(|c| c.chars().count()).collect();
    for row in &dataset.rows {
        for (i, cell) in row.iter().enumerate().take(column_count) {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }
    for w in widths.iter_mut() {
        *w = (*w).min(MAX_COLUMN_WIDTH).max(1);
    }

    let format_row = |cells: &[String]| -> String {
        let mut parts = Vec::with_capacity(column_count);
        for i in 0..column_count {
            let cell = cells.get(i).map(String::as_str).unwrap_or("");
            parts.push(format!("{:<1$}", truncate_cell(cell, widths[i]), widths[i]));
        }
        parts.join("  ").trim_end().to_string()
    };

    let mut lines = Vec::with_capacity(dataset.rows.len() + 2);
    lines.push(format_row(&dataset.columns));
    lines.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("  "),
    );
    for row in &dataset.rows {
        lines.push(format_row(row));
    }
    lines
}

fn build_lines(report: &ReportData) -> Vec<Line> {
    let mut lines = Vec::new();

    lines.push(Line::heading(&report.metadata.report_name, 16.0));
    lines.push(Line::body(format!(
        "Type: {}",
        report.metadata.report_type_id
    )));
    lines.push(Line::body(format!(
        "Generated: {}",
        report.metadata.generated_at.to_rfc3339()
    )));
    lines.push(Line::body(format!(
        "Total records: {}",
        report.metadata.total_records
    )));
    if let Some((from, to)) = report.metadata.date_range {
        lines.push(Line::body(format!("Date range: {} - {}", from, to)));
    }
    lines.push(Line::blank());

    if let Some(summary) = &report.summary {
        lines.push(Line::heading("Summary", 12.0));
        for metric in summary {
            lines.push(Line::body(format!("{}: {}", metric.name, metric.value)));
        }
        lines.push(Line::blank());
    }

    for dataset in &report.data {
        lines.push(Line::heading(
            format!("{} ({} rows)", dataset.source_name, dataset.row_count()),
            12.0,
        ));
        for text in table_lines(dataset) {
            lines.push(Line::body(text));
        }
        lines.push(Line::blank());
    }

    lines
}

/// Escape text for a PDF literal string. Non-ASCII characters are replaced;
/// the built-in fonts carry no wider encoding.
fn escape_pdf_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

fn page_content(lines: &[Line]) -> Vec<u8> {
    let mut content = String::new();
    content.push_str("BT\n");
    content.push_str(&format!("{} TL\n", LEADING));
    content.push_str(&format!(
        "1 0 0 1 {} {} Tm\n",
        MARGIN,
        PAGE_HEIGHT - MARGIN - LEADING
    ));

    let mut current_font: Option<FontSel> = None;
    for line in lines {
        if current_font != Some(line.font) {
            let (name, size) = match line.font {
                FontSel::Heading(size) => ("/F1", size),
                FontSel::Body(size) => ("/F2", size),
            };
            content.push_str(&format!("{} {} Tf\n", name, size));
            current_font = Some(line.font);
        }
        if line.text.is_empty() {
            content.push_str("T*\n");
        } else {
            content.push_str(&format!("({}) Tj T*\n", escape_pdf_text(&line.text)));
        }
    }

    content.push_str("ET\n");
    content.into_bytes()
}

pub fn render_pdf(report: &ReportData) -> Vec<u8> {
    let lines = build_lines(report);
    let pages: Vec<&[Line]> = if lines.is_empty() {
        vec![&lines[..]]
    } else {
        lines.chunks(LINES_PER_PAGE).collect()
    };
    let page_count = pages.len();

    // Object layout: 1 catalog, 2 page tree, 3+4 fonts, then per page a
    // page object followed by its content stream.
    let mut objects: Vec<Vec<u8>> = Vec::new();

    let kids: Vec<String> = (0..page_count)
        .map(|i| format!("{} 0 R", 5 + 2 * i))
        .collect();
    objects.push(b"<< /Type /Catalog /Pages 2 0 R >>".to_vec());
    objects.push(
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            page_count
        )
        .into_bytes(),
    );
    objects.push(b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold >>".to_vec());
    objects.push(b"<< /Type /Font /Subtype /Type1 /BaseFont /Courier >>".to_vec());

    for (i, page_lines) in pages.iter().enumerate() {
        let content_id = 6 + 2 * i;
        objects.push(
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] \
                 /Resources << /Font << /F1 3 0 R /F2 4 0 R >> >> /Contents {} 0 R >>",
                PAGE_WIDTH, PAGE_HEIGHT, content_id
            )
            .into_bytes(),
        );

        let stream = page_content(page_lines);
        let mut obj = format!("<< /Length {} >>\nstream\n", stream.len()).into_bytes();
        obj.extend_from_slice(&stream);
        obj.extend_from_slice(b"endstream");
        objects.push(obj);
    }

    let mut out: Vec<u8> = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n", i + 1).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
    }

    let xref_offset = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in &offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_offset
        )
        .as_bytes(),
    );

    out
}
