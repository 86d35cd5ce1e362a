//! Recipient list parsing from CSV uploads.

use log::{debug, info};
use thiserror::Error;

use crate::session::Recipient;

/// Columns every upload must carry, in the order they are reported.
pub const REQUIRED_COLUMNS: [&str; 4] = ["title", "first_name", "last_name", "email"];

/// Upload-level failures. Row-level problems end up in [`ParsedRecipients::errors`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CsvError {
    #[error("CSV must be UTF-8 encoded")]
    Encoding,

    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Unable to read CSV: {0}")]
    Parse(String),
}

/// Valid recipients in file order plus one message per rejected row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedRecipients {
    pub recipients: Vec<Recipient>,
    pub errors: Vec<String>,
}

/// Parses an uploaded CSV into recipients.
///
/// Headers are matched case-insensitively after trimming. Rows are numbered
/// as in a spreadsheet, so the first data row is row 2.
pub fn parse_recipients(bytes: &[u8]) -> Result<ParsedRecipients, CsvError> {
    let text = std::str::from_utf8(bytes).map_err(|_| CsvError::Encoding)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| CsvError::Parse(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|column| !headers.iter().any(|h| h == *column))
        .map(|column| column.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(CsvError::MissingColumns(missing));
    }

    // Later duplicates of a header win, as with a dict keyed by header
    let position = |column: &str| headers.iter().rposition(|h| h == column);
    let columns: Vec<Option<usize>> = REQUIRED_COLUMNS.iter().map(|&c| position(c)).collect();

    let mut parsed = ParsedRecipients::default();
    for (index, record) in reader.records().enumerate() {
        let row_number = index + 2;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                parsed.errors.push(format!("Row {}: {}", row_number, e));
                continue;
            }
        };

        let field = |i: usize| columns[i].and_then(|c| record.get(c)).unwrap_or("");
        match Recipient::new(field(0), field(1), field(2), field(3)) {
            Ok(recipient) => parsed.recipients.push(recipient),
            Err(e) => {
                debug!("Rejected CSV row {}: {}", row_number, e);
                parsed.errors.push(format!("Row {}: {}", row_number, e));
            }
        }
    }

    info!(
        "Parsed {} recipients ({} rows rejected)",
        parsed.recipients.len(),
        parsed.errors.len()
    );
    Ok(parsed)
}
