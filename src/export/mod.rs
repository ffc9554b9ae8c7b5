//! Stock-history report writer.
//!
//! Lays the snapshot history out as a spreadsheet-style matrix: one row per
//! product, one column per check date, blank cells where a date has no
//! snapshot. Plain CSV so the file opens directly in any spreadsheet tool.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::models::ProductHistory;

/// Writes the full history matrix to `path`, replacing any previous report.
pub fn write_history_csv(path: &Path, dates: &[String], products: &[ProductHistory]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create report file {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    let mut header = vec!["name".to_string(), "url".to_string(), "category".to_string()];
    header.extend(dates.iter().cloned());
    write_row(&mut writer, &header)?;

    for product in products {
        let mut row = vec![
            product.name.clone(),
            product.url.clone(),
            product.category.clone(),
        ];
        for date in dates {
            row.push(
                product
                    .counts
                    .get(date)
                    .map(|count| count.to_string())
                    .unwrap_or_default(),
            );
        }
        write_row(&mut writer, &row)?;
    }

    writer.flush()?;
    info!(
        products = products.len(),
        dates = dates.len(),
        path = %path.display(),
        "history report written"
    );
    Ok(())
}

fn write_row<W: Write>(writer: &mut W, fields: &[String]) -> Result<()> {
    let line = fields
        .iter()
        .map(|field| escape_field(field))
        .collect::<Vec<_>>()
        .join(",");
    writeln!(writer, "{line}")?;
    Ok(())
}

/// RFC 4180 quoting: fields carrying separators or quotes get wrapped, with
/// inner quotes doubled.
fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
