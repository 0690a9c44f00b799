//! Sequential invoice numbering derived from the archive contents.
//!
//! Numbers have the form `<n>/2/2`. The next `n` for a year is the number of
//! archived PDFs in `<archive_root>/<year>` whose file name carries a
//! `<n>-2-2` segment, plus one. Nothing is persisted besides the archive
//! itself, so deleting an archived file changes future numbering.

use lazy_static::lazy_static;
use regex::Regex;
use std::fs;
use std::io;
use std::path::Path;

/// Fixed suffix of every invoice number (`<n>/2/2`).
pub const SEQUENCE_SUFFIX: &str = "2/2";

lazy_static! {
    static ref SEQUENCE_SEGMENT: Regex =
        Regex::new(r"(?:^|[^0-9])[0-9]+-2-2(?:[^0-9]|$)").expect("sequence pattern is valid");
}

/// Whether `year` is a four digit year string.
pub fn is_valid_year(year: &str) -> bool {
    year.len() == 4 && year.chars().all(|c| c.is_ascii_digit())
}

/// Whether an archived file name counts towards the sequence.
pub fn is_sequence_file(file_name: &str) -> bool {
    let is_pdf = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

    is_pdf && SEQUENCE_SEGMENT.is_match(file_name)
}

/// Compute the next sequence number for `year` under `archive_root`.
///
/// Returns 1 when the year folder does not exist. Any other I/O failure is
/// propagated.
pub fn next_number(archive_root: &Path, year: &str) -> io::Result<u32> {
    if !is_valid_year(year) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("year must have four digits, got '{}'", year),
        ));
    }

    let year_folder = archive_root.join(year);
    let entries = match fs::read_dir(&year_folder) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(1),
        Err(e) => return Err(e),
    };

    let mut count: u32 = 0;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if entry.file_name().to_str().is_some_and(is_sequence_file) {
            count += 1;
        }
    }

    log::debug!(
        "Found {} numbered invoices in {}",
        count,
        year_folder.display()
    );

    Ok(count + 1)
}

/// Render a sequence number as an invoice number, e.g. `7/2/2`.
pub fn format_invoice_number(sequence: u32) -> String {
    format!("{}/{}", sequence, SEQUENCE_SUFFIX)
}
