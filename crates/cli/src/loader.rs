//! CSV grid loader.
//!
//! Reads a CSV file (or stdin for `-`) into rows of raw cell text and loads
//! them into a workbook through the engine's normal write path.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use abacus_engine::WorkbookRegistry;

use crate::CliError;

pub fn read_rows(path: &Path, delimiter: u8) -> Result<Vec<Vec<String>>, CliError> {
    let mut content = String::new();
    if path == Path::new("-") {
        io::stdin()
            .read_to_string(&mut content)
            .map_err(|e| CliError::io(format!("stdin: {}", e)))?;
    } else {
        File::open(path)
            .and_then(|mut f| f.read_to_string(&mut content))
            .map_err(|e| CliError::io(format!("{}: {}", path.display(), e)))?;
    }
    parse_rows(&content, delimiter)
}

/// Rows may have different lengths. Empty fields stay empty strings and are
/// skipped on load.
pub fn parse_rows(content: &str, delimiter: u8) -> Result<Vec<Vec<String>>, CliError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for (row_idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| CliError::io(format!("line {}: {}", row_idx + 1, e)))?;
        rows.push(record.iter().map(|field| field.trim().to_string()).collect());
    }
    Ok(rows)
}

/// Replace `document_id` with a fresh workbook holding `rows` on `sheet`.
pub fn load_document(
    registry: &mut WorkbookRegistry,
    document_id: &str,
    sheet: &str,
    rows: &[Vec<String>],
) -> Result<(), CliError> {
    registry.unload(document_id);
    let report = registry
        .workbook_mut(document_id)
        .import_rows(sheet, rows)
        .map_err(|e| CliError::calc(e.to_string()))?;
    log::debug!(
        "loaded {} rows into {}!{} ({} formulas computed)",
        rows.len(),
        document_id,
        sheet,
        report.cells_recomputed
    );
    Ok(())
}
