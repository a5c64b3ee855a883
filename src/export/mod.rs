//! Report export backends: PDF (hand-built document writer) and XLSX
//! (SpreadsheetML workbook in a zip container).

pub mod pdf;
pub mod xlsx;
