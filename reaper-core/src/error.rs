use reaper_scanner::ScanError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Authentication failed after {attempts} attempts: {message}")]
    Authentication { attempts: u32, message: String },

    #[error("Could not persist {what}: {source}")]
    Persistence {
        what: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid input list: {0}")]
    Input(String),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Browser session error: {0}")]
    Scan(#[from] ScanError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl BatchError {
    pub fn persistence(what: impl Into<String>, source: std::io::Error) -> Self {
        BatchError::Persistence {
            what: what.into(),
            source,
        }
    }

    /// Errors that end the whole batch rather than the current page.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BatchError::Scan(e) if e.is_page_level())
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;
