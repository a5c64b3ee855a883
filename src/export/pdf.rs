//! Minimal PDF writer for financial report export.
//!
//! Builds the document bytes directly: catalog, page tree, Helvetica
//! core fonts, one content stream per page, cross-reference table,
//! trailer. Text-only output is all the report needs, so no external
//! PDF machinery is involved.

use crate::notifications::format_idr;
use crate::reports::FinancialReport;

// Page geometry (A4, points)
const PAGE_WIDTH: f64 = 595.28;
const PAGE_HEIGHT: f64 = 841.89;
const MARGIN: f64 = 50.0;
const LINE_HEIGHT: f64 = 14.0;

/// Escape a string for a PDF literal string object.
fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            '\n' | '\r' => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

/// Builder for multi-page, text-only PDF documents.
///
/// ```rust,ignore
/// let data = PdfBuilder::new()
///     .text(50.0, 780.0, 16.0, true, "Financial Report")
///     .hline(50.0, 545.0, 770.0)
///     .text(50.0, 750.0, 10.0, false, "Revenue: Rp 1.500.000")
///     .build();
/// ```
pub struct PdfBuilder {
    pages: Vec<String>,
    current: String,
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self {
            pages: Vec::new(),
            current: String::new(),
        }
    }

    /// Place a line of text with its baseline at (x, y), origin bottom-left.
    pub fn text(mut self, x: f64, y: f64, size: f64, bold: bool, text: &str) -> Self {
        let font = if bold { "F2" } else { "F1" };
        self.current.push_str(&format!(
            "BT /{font} {size:.1} Tf 1 0 0 1 {x:.2} {y:.2} Tm ({}) Tj ET\n",
            escape_text(text)
        ));
        self
    }

    /// Draw a horizontal rule at height y.
    pub fn hline(mut self, x1: f64, x2: f64, y: f64) -> Self {
        self.current.push_str(&format!(
            "0.5 w {x1:.2} {y:.2} m {x2:.2} {y:.2} l S\n"
        ));
        self
    }

    /// Finish the current page and start a new one.
    pub fn new_page(mut self) -> Self {
        self.pages.push(std::mem::take(&mut self.current));
        self
    }

    /// Serialize the document.
    pub fn build(mut self) -> Vec<u8> {
        if !self.current.is_empty() || self.pages.is_empty() {
            self.pages.push(std::mem::take(&mut self.current));
        }

        // Object layout:
        //   1 catalog, 2 page tree, 3 Helvetica, 4 Helvetica-Bold,
        //   then (page, content) object pairs starting at 5.
        let page_count = self.pages.len();
        let first_page_obj = 5;
        let total_objects = 4 + page_count * 2;

        let kids: Vec<String> = (0..page_count)
            .map(|i| format!("{} 0 R", first_page_obj + i * 2))
            .collect();

        let mut objects: Vec<String> = vec![
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            format!(
                "<< /Type /Pages /Kids [{}] /Count {} >>",
                kids.join(" "),
                page_count
            ),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold >>".to_string(),
        ];

        for (i, content) in self.pages.iter().enumerate() {
            let content_obj = first_page_obj + i * 2 + 1;
            objects.push(format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {PAGE_WIDTH:.2} {PAGE_HEIGHT:.2}] \
                 /Resources << /Font << /F1 3 0 R /F2 4 0 R >> >> /Contents {content_obj} 0 R >>"
            ));
            objects.push(format!(
                "<< /Length {} >>\nstream\n{content}endstream",
                content.len()
            ));
        }

        let mut out: Vec<u8> = Vec::with_capacity(2048);
        out.extend_from_slice(b"%PDF-1.4\n");

        let mut offsets: Vec<usize> = Vec::with_capacity(total_objects);
        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", i + 1).as_bytes());
        }

        let xref_offset = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n", total_objects + 1).as_bytes());
        out.extend_from_slice(b"0000000000 65535 f \n");
        for offset in &offsets {
            out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
                total_objects + 1
            )
            .as_bytes(),
        );

        out
    }
}

impl Default for PdfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Report layout
// ---------------------------------------------------------------------------

/// Cursor that lays report lines down a page and breaks when full.
struct ReportWriter {
    builder: PdfBuilder,
    y: f64,
}

impl ReportWriter {
    fn new() -> Self {
        Self {
            builder: PdfBuilder::new(),
            y: PAGE_HEIGHT - MARGIN,
        }
    }

    fn ensure_room(&mut self, needed: f64) {
        if self.y - needed < MARGIN {
            let builder = std::mem::take(&mut self.builder);
            self.builder = builder.new_page();
            self.y = PAGE_HEIGHT - MARGIN;
        }
    }

    fn line(&mut self, size: f64, bold: bool, text: &str) {
        self.ensure_room(LINE_HEIGHT);
        let builder = std::mem::take(&mut self.builder);
        self.builder = builder.text(MARGIN, self.y, size, bold, text);
        self.y -= LINE_HEIGHT;
    }

    /// A label on the left, a value right-aligned-ish in a second column.
    fn pair(&mut self, label: &str, value: &str) {
        self.ensure_room(LINE_HEIGHT);
        let builder = std::mem::take(&mut self.builder);
        self.builder = builder
            .text(MARGIN, self.y, 10.0, false, label)
            .text(320.0, self.y, 10.0, false, value);
        self.y -= LINE_HEIGHT;
    }

    fn rule(&mut self) {
        self.ensure_room(LINE_HEIGHT);
        let builder = std::mem::take(&mut self.builder);
        self.builder = builder.hline(MARGIN, PAGE_WIDTH - MARGIN, self.y + 4.0);
        self.y -= LINE_HEIGHT / 2.0;
    }

    fn gap(&mut self) {
        self.y -= LINE_HEIGHT / 2.0;
    }
}

/// Render a financial report as a PDF document.
pub fn render_financial_report(report: &FinancialReport, store_name: &str) -> Vec<u8> {
    let mut w = ReportWriter::new();

    w.line(16.0, true, &format!("{store_name} - Financial Report"));
    w.line(
        10.0,
        false,
        &format!(
            "Period: {} ({} to {})",
            report.period, report.date_from, report.date_to
        ),
    );
    w.line(9.0, false, &format!("Generated: {}", report.generated_at));
    w.rule();
    w.gap();

    w.line(12.0, true, "Summary");
    w.pair("Revenue (confirmed payments)", &format_idr(report.revenue));
    w.pair("Expenses", &format_idr(report.expense_total));
    w.pair("Net income", &format_idr(report.net_income));
    w.pair("Orders placed", &report.orders_total.to_string());
    for (status, count) in &report.orders_by_status {
        w.pair(&format!("  {status}"), &count.to_string());
    }
    w.gap();

    w.line(12.0, true, "Payments by method");
    if report.payment_methods.is_empty() {
        w.line(10.0, false, "No confirmed payments in this period.");
    }
    for method in &report.payment_methods {
        w.pair(
            &format!("{} ({} payment(s))", method.method, method.count),
            &format_idr(method.amount),
        );
    }
    w.gap();

    w.line(12.0, true, "Top products");
    if report.top_products.is_empty() {
        w.line(10.0, false, "No items sold in this period.");
    }
    for (rank, product) in report.top_products.iter().enumerate() {
        w.pair(
            &format!("{}. {} x{:.0}", rank + 1, product.name, product.quantity),
            &format_idr(product.revenue),
        );
    }
    w.gap();

    w.line(12.0, true, "Expenses by category");
    if report.expenses_by_category.is_empty() {
        w.line(10.0, false, "No expenses in this period.");
    }
    for category in &report.expenses_by_category {
        w.pair(&category.category, &format_idr(category.amount));
    }
    w.gap();

    // The daily series only earns space on multi-day reports
    if report.daily_revenue.len() > 1 {
        w.line(12.0, true, "Daily revenue");
        for day in &report.daily_revenue {
            w.pair(
                &format!("{} ({} order(s))", day.date, day.orders),
                &format_idr(day.revenue),
            );
        }
    }

    w.builder.build()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reports::{DayPoint, MethodBreakdown, TopProduct};
    use std::collections::BTreeMap;

    fn sample_report() -> FinancialReport {
        FinancialReport {
            period: "weekly".into(),
            date_from: "2025-03-10".into(),
            date_to: "2025-03-16".into(),
            revenue: 100000.0,
            expense_total: 30000.0,
            net_income: 70000.0,
            orders_total: 2,
            orders_by_status: BTreeMap::from([("completed".to_string(), 2)]),
            payment_methods: vec![MethodBreakdown {
                method: "cash".into(),
                count: 1,
                amount: 100000.0,
            }],
            top_products: vec![TopProduct {
                name: "Flyer A5 (Glossy)".into(),
                quantity: 100.0,
                revenue: 75000.0,
            }],
            expenses_by_category: vec![],
            daily_revenue: (0..7)
                .map(|i| DayPoint {
                    date: format!("2025-03-1{i}"),
                    revenue: 0.0,
                    orders: 0,
                })
                .collect(),
            generated_at: "2025-03-16T20:00:00Z".into(),
        }
    }

    #[test]
    fn build_emits_wellformed_pdf_envelope() {
        let data = PdfBuilder::new()
            .text(50.0, 780.0, 16.0, true, "Hello")
            .build();

        assert!(data.starts_with(b"%PDF-1.4"));
        assert!(data.ends_with(b"%%EOF\n"));

        let text = String::from_utf8_lossy(&data);
        assert!(text.contains("/Type /Catalog"));
        assert!(text.contains("/BaseFont /Helvetica"));
        assert!(text.contains("(Hello) Tj"));
        assert!(text.contains("/Count 1"));
    }

    #[test]
    fn parentheses_and_backslashes_are_escaped() {
        let data = PdfBuilder::new()
            .text(50.0, 780.0, 10.0, false, r"Flyer (A5) \ glossy")
            .build();
        let text = String::from_utf8_lossy(&data);
        assert!(text.contains(r"(Flyer \(A5\) \\ glossy) Tj"));
    }

    #[test]
    fn xref_offsets_point_at_objects() {
        let data = PdfBuilder::new().text(50.0, 780.0, 10.0, false, "x").build();
        let text = String::from_utf8_lossy(&data);

        // Every xref entry must point at an "N 0 obj" header
        // (skip the header lines and the free-list entry)
        let xref_at = text.find("xref\n").expect("xref section");
        for (i, line) in text[xref_at..].lines().skip(3).enumerate() {
            if !line.ends_with("n ") {
                break;
            }
            let offset: usize = line[..10].parse().expect("offset");
            let expected = format!("{} 0 obj", i + 1);
            assert!(
                text[offset..].starts_with(&expected),
                "xref entry {i} does not point at {expected}"
            );
        }
    }

    #[test]
    fn long_reports_flow_onto_extra_pages() {
        let mut report = sample_report();
        report.daily_revenue = (0..120)
            .map(|i| DayPoint {
                date: format!("2025-01-{:02}", (i % 28) + 1),
                revenue: 1000.0,
                orders: 1,
            })
            .collect();

        let data = render_financial_report(&report, "Inkwell Print");
        let text = String::from_utf8_lossy(&data);
        let pages = text.matches("/Type /Page ").count();
        assert!(pages >= 2, "expected multiple pages, got {pages}");
    }

    #[test]
    fn report_renders_summary_figures() {
        let data = render_financial_report(&sample_report(), "Inkwell Print");
        let text = String::from_utf8_lossy(&data);

        assert!(text.contains("Inkwell Print - Financial Report"));
        assert!(text.contains("Rp 100.000"));
        assert!(text.contains("Net income"));
        assert!(text.contains(r"Flyer A5 \(Glossy\) x100"));
    }
}
