//! Header and file-name sanitization.
//!
//! Turns arbitrary CSV header text into identifiers that are safe to quote
//! into DDL/DML: ASCII alphanumerics and underscores only, never starting
//! with a digit, never empty, and unique within one header row.

use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

/// PostgreSQL truncates identifiers longer than this many bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Table name used when a file name sanitizes to nothing.
pub const FALLBACK_TABLE_NAME: &str = "upload";

static ILLEGAL_CHARS: OnceLock<Regex> = OnceLock::new();

fn illegal_chars() -> &'static Regex {
    ILLEGAL_CHARS.get_or_init(|| Regex::new(r"[^A-Za-z0-9_]").expect("Invalid identifier regex"))
}

/// Sanitize a header row into unique column identifiers, position for position.
///
/// ```rust
/// use csv_import_server::import::sanitizer::sanitize_column_names;
///
/// assert_eq!(
///     sanitize_column_names(&["1st Name", "1st Name"]),
///     vec!["col_1st_Name", "col_1st_Name_1"]
/// );
/// assert_eq!(sanitize_column_names(&["a", " ", "b"]), vec!["a", "col_2", "b"]);
/// ```
pub fn sanitize_column_names<S: AsRef<str>>(headers: &[S]) -> Vec<String> {
    sanitize_column_names_reserving(headers, &[])
}

/// Like [`sanitize_column_names`], but treats `reserved` names as already taken.
pub fn sanitize_column_names_reserving<S: AsRef<str>>(
    headers: &[S],
    reserved: &[&str],
) -> Vec<String> {
    let mut issued: HashSet<String> = reserved.iter().map(|name| name.to_string()).collect();

    headers
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            let base = sanitize_identifier(header.as_ref(), idx);
            let mut candidate = base.clone();
            let mut suffix = 1;
            while issued.contains(&candidate) {
                let tail = format!("_{}", suffix);
                let keep = base.len().min(MAX_IDENTIFIER_LEN - tail.len());
                candidate = format!("{}{}", &base[..keep], tail);
                suffix += 1;
            }
            issued.insert(candidate.clone());
            candidate
        })
        .collect()
}

/// Sanitize a single header at zero-based `position`, without deduplication.
fn sanitize_identifier(header: &str, position: usize) -> String {
    let trimmed = header.trim();
    let name = if trimmed.is_empty() {
        format!("col_{}", position + 1)
    } else {
        illegal_chars().replace_all(trimmed, "_").into_owned()
    };

    let mut name = if name.starts_with(|c: char| c.is_ascii_digit()) {
        format!("col_{}", name)
    } else {
        name
    };
    // ASCII only at this point, so any byte index is a char boundary.
    name.truncate(MAX_IDENTIFIER_LEN);
    name
}

/// Derive a destination table name from an uploaded file name.
///
/// Uses the file stem, replaces illegal characters with `_` and caps the
/// result at [`MAX_IDENTIFIER_LEN`] bytes.
pub fn sanitize_table_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("");

    let mut name = illegal_chars().replace_all(stem, "_").into_owned();
    name.truncate(MAX_IDENTIFIER_LEN);

    if name.is_empty() {
        FALLBACK_TABLE_NAME.to_string()
    } else {
        name
    }
}
