use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Navigation to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("Script execution failed: {0}")]
    Script(String),

    #[error("Could not read page markup: {0}")]
    Markup(String),

    #[error("Invalid extractor pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ScanError {
    /// Whether the error concerns loading the page itself, as opposed to a
    /// single step on an already loaded page.
    pub fn is_page_level(&self) -> bool {
        matches!(self, ScanError::Navigation { .. } | ScanError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
