//! XLSX workbook writer for financial report export.
//!
//! An .xlsx file is a zip container of SpreadsheetML parts, so the
//! workbook is assembled entry-by-entry with `zip::ZipWriter`. Cells
//! use inline strings, which keeps the writer free of a shared-string
//! table.

use std::io::{Cursor, Write};

use crate::reports::FinancialReport;

/// One spreadsheet cell.
#[derive(Debug, Clone)]
pub enum Cell {
    Text(String),
    Number(f64),
    Int(i64),
    Empty,
}

impl Cell {
    fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }
}

/// A sheet under construction: a name plus rows of cells.
pub struct Sheet {
    name: String,
    rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rows: Vec::new(),
        }
    }

    pub fn row(&mut self, cells: Vec<Cell>) {
        self.rows.push(cells);
    }

    pub fn blank_row(&mut self) {
        self.rows.push(Vec::new());
    }
}

/// Escape a string for XML text content.
fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Spreadsheet column letters: 0 -> A, 25 -> Z, 26 -> AA.
fn column_letters(mut index: usize) -> String {
    let mut out = String::new();
    loop {
        out.insert(0, (b'A' + (index % 26) as u8) as char);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    out
}

fn render_sheet_xml(sheet: &Sheet) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">\
         <sheetData>",
    );

    for (row_idx, row) in sheet.rows.iter().enumerate() {
        let row_num = row_idx + 1;
        xml.push_str(&format!("<row r=\"{row_num}\">"));
        for (col_idx, cell) in row.iter().enumerate() {
            let cell_ref = format!("{}{row_num}", column_letters(col_idx));
            match cell {
                Cell::Text(value) => xml.push_str(&format!(
                    "<c r=\"{cell_ref}\" t=\"inlineStr\"><is><t>{}</t></is></c>",
                    xml_escape(value)
                )),
                Cell::Number(value) => {
                    xml.push_str(&format!("<c r=\"{cell_ref}\"><v>{value}</v></c>"))
                }
                Cell::Int(value) => {
                    xml.push_str(&format!("<c r=\"{cell_ref}\"><v>{value}</v></c>"))
                }
                Cell::Empty => xml.push_str(&format!("<c r=\"{cell_ref}\"/>")),
            }
        }
        xml.push_str("</row>");
    }

    xml.push_str("</sheetData></worksheet>");
    xml
}

/// Serialize sheets into a complete .xlsx byte buffer.
pub fn build_workbook(sheets: &[Sheet]) -> Result<Vec<u8>, String> {
    if sheets.is_empty() {
        return Err("Workbook needs at least one sheet".into());
    }

    let cursor = Cursor::new(Vec::new());
    let mut zip = zip::ZipWriter::new(cursor);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let mut write_entry = |zip: &mut zip::ZipWriter<Cursor<Vec<u8>>>,
                           name: &str,
                           content: &str|
     -> Result<(), String> {
        zip.start_file(name, options)
            .map_err(|e| format!("zip entry {name}: {e}"))?;
        zip.write_all(content.as_bytes())
            .map_err(|e| format!("zip write {name}: {e}"))?;
        Ok(())
    };

    // [Content_Types].xml
    let mut content_types = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
         <Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
         <Default Extension=\"xml\" ContentType=\"application/xml\"/>\
         <Override PartName=\"/xl/workbook.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml\"/>\
         <Override PartName=\"/xl/styles.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml\"/>",
    );
    for i in 1..=sheets.len() {
        content_types.push_str(&format!(
            "<Override PartName=\"/xl/worksheets/sheet{i}.xml\" \
             ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml\"/>"
        ));
    }
    content_types.push_str("</Types>");
    write_entry(&mut zip, "[Content_Types].xml", &content_types)?;

    // Package relationships
    write_entry(
        &mut zip,
        "_rels/.rels",
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
         <Relationship Id=\"rId1\" \
          Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument\" \
          Target=\"xl/workbook.xml\"/>\
         </Relationships>",
    )?;

    // Workbook
    let mut workbook = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <workbook xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" \
          xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\">\
         <sheets>",
    );
    for (i, sheet) in sheets.iter().enumerate() {
        workbook.push_str(&format!(
            "<sheet name=\"{}\" sheetId=\"{}\" r:id=\"rId{}\"/>",
            xml_escape(&sheet.name),
            i + 1,
            i + 1
        ));
    }
    workbook.push_str("</sheets></workbook>");
    write_entry(&mut zip, "xl/workbook.xml", &workbook)?;

    // Workbook relationships (sheets + styles)
    let mut workbook_rels = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">",
    );
    for i in 1..=sheets.len() {
        workbook_rels.push_str(&format!(
            "<Relationship Id=\"rId{i}\" \
             Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet\" \
             Target=\"worksheets/sheet{i}.xml\"/>"
        ));
    }
    workbook_rels.push_str(&format!(
        "<Relationship Id=\"rId{}\" \
         Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles\" \
         Target=\"styles.xml\"/>",
        sheets.len() + 1
    ));
    workbook_rels.push_str("</Relationships>");
    write_entry(&mut zip, "xl/_rels/workbook.xml.rels", &workbook_rels)?;

    // Minimal styles part
    write_entry(
        &mut zip,
        "xl/styles.xml",
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <styleSheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">\
         <fonts count=\"1\"><font><sz val=\"11\"/><name val=\"Calibri\"/></font></fonts>\
         <fills count=\"1\"><fill><patternFill patternType=\"none\"/></fill></fills>\
         <borders count=\"1\"><border/></borders>\
         <cellStyleXfs count=\"1\"><xf/></cellStyleXfs>\
         <cellXfs count=\"1\"><xf xfId=\"0\"/></cellXfs>\
         </styleSheet>",
    )?;

    // Worksheets
    for (i, sheet) in sheets.iter().enumerate() {
        write_entry(
            &mut zip,
            &format!("xl/worksheets/sheet{}.xml", i + 1),
            &render_sheet_xml(sheet),
        )?;
    }

    let cursor = zip
        .finish()
        .map_err(|e| format!("finish workbook zip: {e}"))?;
    Ok(cursor.into_inner())
}

// ---------------------------------------------------------------------------
// Report layout
// ---------------------------------------------------------------------------

/// Render a financial report as an .xlsx workbook.
pub fn render_financial_report(report: &FinancialReport) -> Result<Vec<u8>, String> {
    let mut summary = Sheet::new("Summary");
    summary.row(vec![Cell::text("Financial Report")]);
    summary.row(vec![Cell::text("Period"), Cell::text(&report.period)]);
    summary.row(vec![Cell::text("From"), Cell::text(&report.date_from)]);
    summary.row(vec![Cell::text("To"), Cell::text(&report.date_to)]);
    summary.row(vec![
        Cell::text("Generated"),
        Cell::text(&report.generated_at),
    ]);
    summary.blank_row();
    summary.row(vec![Cell::text("Revenue"), Cell::Number(report.revenue)]);
    summary.row(vec![
        Cell::text("Expenses"),
        Cell::Number(report.expense_total),
    ]);
    summary.row(vec![
        Cell::text("Net income"),
        Cell::Number(report.net_income),
    ]);
    summary.row(vec![
        Cell::text("Orders placed"),
        Cell::Int(report.orders_total),
    ]);
    summary.blank_row();
    summary.row(vec![Cell::text("Orders by status")]);
    for (status, count) in &report.orders_by_status {
        summary.row(vec![Cell::text(status), Cell::Int(*count)]);
    }

    let mut payments = Sheet::new("Payments");
    payments.row(vec![
        Cell::text("Method"),
        Cell::text("Count"),
        Cell::text("Amount"),
    ]);
    for method in &report.payment_methods {
        payments.row(vec![
            Cell::text(&method.method),
            Cell::Int(method.count),
            Cell::Number(method.amount),
        ]);
    }

    let mut products = Sheet::new("Top Products");
    products.row(vec![
        Cell::text("Product"),
        Cell::text("Quantity"),
        Cell::text("Revenue"),
    ]);
    for product in &report.top_products {
        products.row(vec![
            Cell::text(&product.name),
            Cell::Number(product.quantity),
            Cell::Number(product.revenue),
        ]);
    }

    let mut expenses = Sheet::new("Expenses");
    expenses.row(vec![Cell::text("Category"), Cell::text("Amount")]);
    for category in &report.expenses_by_category {
        expenses.row(vec![
            Cell::text(&category.category),
            Cell::Number(category.amount),
        ]);
    }

    let mut daily = Sheet::new("Daily Revenue");
    daily.row(vec![
        Cell::text("Date"),
        Cell::text("Orders"),
        Cell::text("Revenue"),
    ]);
    for day in &report.daily_revenue {
        daily.row(vec![
            Cell::text(&day.date),
            Cell::Int(day.orders),
            Cell::Number(day.revenue),
        ]);
    }

    build_workbook(&[summary, payments, products, expenses, daily])
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reports::{DayPoint, MethodBreakdown, TopProduct};
    use std::collections::BTreeMap;
    use std::io::Read;

    fn sample_report() -> FinancialReport {
        FinancialReport {
            period: "monthly".into(),
            date_from: "2025-03-01".into(),
            date_to: "2025-03-31".into(),
            revenue: 2500000.0,
            expense_total: 800000.0,
            net_income: 1700000.0,
            orders_total: 12,
            orders_by_status: BTreeMap::from([
                ("completed".to_string(), 10),
                ("cancelled".to_string(), 2),
            ]),
            payment_methods: vec![
                MethodBreakdown {
                    method: "cash".into(),
                    count: 5,
                    amount: 900000.0,
                },
                MethodBreakdown {
                    method: "transfer".into(),
                    count: 6,
                    amount: 1600000.0,
                },
            ],
            top_products: vec![TopProduct {
                name: "Stickers & Labels".into(),
                quantity: 500.0,
                revenue: 750000.0,
            }],
            expenses_by_category: vec![],
            daily_revenue: vec![DayPoint {
                date: "2025-03-01".into(),
                revenue: 100000.0,
                orders: 1,
            }],
            generated_at: "2025-04-01T08:00:00Z".into(),
        }
    }

    fn read_entry(data: &[u8], name: &str) -> String {
        let mut archive =
            zip::ZipArchive::new(Cursor::new(data.to_vec())).expect("open workbook zip");
        let mut file = archive.by_name(name).expect("entry should exist");
        let mut content = String::new();
        file.read_to_string(&mut content).expect("read entry");
        content
    }

    #[test]
    fn column_letters_roll_over() {
        assert_eq!(column_letters(0), "A");
        assert_eq!(column_letters(25), "Z");
        assert_eq!(column_letters(26), "AA");
        assert_eq!(column_letters(27), "AB");
        assert_eq!(column_letters(701), "ZZ");
    }

    #[test]
    fn workbook_is_a_zip_with_required_parts() {
        let data = render_financial_report(&sample_report()).expect("workbook");

        // PK zip magic
        assert_eq!(&data[..2], b"PK");

        for part in [
            "[Content_Types].xml",
            "_rels/.rels",
            "xl/workbook.xml",
            "xl/_rels/workbook.xml.rels",
            "xl/styles.xml",
            "xl/worksheets/sheet1.xml",
            "xl/worksheets/sheet5.xml",
        ] {
            let _ = read_entry(&data, part);
        }

        let workbook = read_entry(&data, "xl/workbook.xml");
        assert!(workbook.contains("name=\"Summary\""));
        assert!(workbook.contains("name=\"Daily Revenue\""));
    }

    #[test]
    fn sheet_cells_carry_values_and_escaped_text() {
        let data = render_financial_report(&sample_report()).expect("workbook");

        let summary = read_entry(&data, "xl/worksheets/sheet1.xml");
        assert!(summary.contains("<v>2500000</v>"));
        assert!(summary.contains("<t>Net income</t>"));

        // "&" in the product name must be escaped
        let products = read_entry(&data, "xl/worksheets/sheet3.xml");
        assert!(products.contains("Stickers &amp; Labels"));
    }

    #[test]
    fn empty_workbook_is_rejected() {
        assert!(build_workbook(&[]).is_err());
    }
}
