// Target list loading and validation

use crate::error::{BatchError, Result};
use std::fs;
use std::path::Path;
use tracing::warn;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPage {
    pub url: String,
}

/// A row that was skipped while reading a target list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    /// 1-based line number in the file, header included.
    pub line: u64,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct TargetList {
    pub pages: Vec<TargetPage>,
    pub skipped: Vec<SkippedRow>,
}

impl TargetList {
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn urls(&self) -> Vec<String> {
        self.pages.iter().map(|p| p.url.clone()).collect()
    }
}

/// Absolute http(s) url, or None.
pub fn parse_target_url(field: &str) -> Option<String> {
    let url = Url::parse(field.trim()).ok()?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Some(field.trim().to_string()),
        _ => None,
    }
}

/// Parse list content: a header row, then one target per row with the url in
/// the first column. Other columns are ignored; blank rows are skipped
/// silently and malformed rows with a warning.
pub fn parse_targets(content: &str) -> Result<TargetList> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut list = TargetList::default();
    for row in reader.records() {
        let row = row?;
        if row.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        let first = row.get(0).unwrap_or_default();
        match parse_target_url(first) {
            Some(url) => list.pages.push(TargetPage { url }),
            None => {
                let line = row.position().map(|p| p.line()).unwrap_or_default();
                let content = row.iter().collect::<Vec<_>>().join(",");
                warn!("Skipping invalid line {}: {}", line, content);
                list.skipped.push(SkippedRow { line, content });
            }
        }
    }
    Ok(list)
}

pub fn load_targets(path: &Path) -> Result<TargetList> {
    let content = fs::read_to_string(path).map_err(|e| {
        BatchError::Input(format!("could not read {}: {}", path.display(), e))
    })?;
    let list = parse_targets(&content)?;
    if list.is_empty() {
        return Err(BatchError::Input(format!(
            "no valid URLs found in {}",
            path.display()
        )));
    }
    Ok(list)
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub valid_count: usize,
    pub skipped: Vec<SkippedRow>,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check a target list without harvesting anything.
pub fn validate(path: &Path) -> ValidationReport {
    match load_targets(path) {
        Ok(list) => ValidationReport {
            valid_count: list.len(),
            skipped: list.skipped,
            errors: Vec::new(),
        },
        Err(e) => ValidationReport {
            errors: vec![e.to_string()],
            ..Default::default()
        },
    }
}
