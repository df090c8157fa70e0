// Record sinks: CSV file and SQLite database

use crate::error::{BatchError, Result};
use chrono::Utc;
use reaper_scanner::{Record, SizeTag};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Csv,
    Sqlite,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Sqlite => "sqlite",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "sqlite" | "db" => Ok(OutputFormat::Sqlite),
            other => Err(format!("unknown output format '{}'", other)),
        }
    }
}

/// How a batch run ended, as recorded by sinks that track runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
        }
    }
}

/// Destination for harvested records. Every write must reach durable
/// storage before `append` returns Ok.
pub trait RecordSink: Send {
    fn append(&mut self, records: &[Record]) -> Result<()>;

    fn finish(&mut self, status: RunStatus) -> Result<()>;

    /// Where the records end up, for display.
    fn location(&self) -> String;
}

/// CSV header for a given set of size tags.
pub fn csv_header(size_tags: &[SizeTag]) -> Vec<String> {
    let mut header = vec!["id".to_string(), "entity_link".to_string()];
    header.extend(size_tags.iter().map(|tag| format!("asset_{}", tag)));
    header.extend(
        ["source_url", "scraped_at", "status", "id_source"]
            .iter()
            .map(|s| s.to_string()),
    );
    header
}

pub struct CsvSink {
    path: PathBuf,
    writer: csv::Writer<File>,
    size_tags: Vec<SizeTag>,
    written: usize,
}

impl CsvSink {
    /// Open today's `records_<date>.csv` in `output_dir`, appending when it exists.
    pub fn create(output_dir: &Path, size_tags: &[SizeTag]) -> Result<Self> {
        let path = output_dir.join(format!("records_{}.csv", Utc::now().format("%Y-%m-%d")));
        Self::open(path, size_tags)
    }

    pub fn open(path: PathBuf, size_tags: &[SizeTag]) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| BatchError::persistence(format!("output dir {}", parent.display()), e))?;
        }

        let is_new = !path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| BatchError::persistence(format!("record file {}", path.display()), e))?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

        if is_new {
            writer.write_record(csv_header(size_tags))?;
            writer
                .flush()
                .map_err(|e| BatchError::persistence(format!("record file {}", path.display()), e))?;
        }

        info!("Writing records to {}", path.display());
        Ok(Self {
            path,
            writer,
            size_tags: size_tags.to_vec(),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> usize {
        self.written
    }

    fn row(&self, record: &Record) -> Vec<String> {
        let mut row = vec![record.id.clone(), record.entity_link.as_str().to_string()];
        row.extend(
            self.size_tags
                .iter()
                .map(|tag| record.asset_url(tag).unwrap_or_default().to_string()),
        );
        row.push(record.source_url.clone());
        row.push(record.scraped_at.to_rfc3339());
        row.push(record.status.as_str().to_string());
        row.push(record.id_source.as_str().to_string());
        row
    }
}

impl RecordSink for CsvSink {
    fn append(&mut self, records: &[Record]) -> Result<()> {
        for record in records {
            let row = self.row(record);
            self.writer.write_record(&row)?;
        }
        self.writer
            .flush()
            .map_err(|e| BatchError::persistence(format!("record file {}", self.path.display()), e))?;
        self.written += records.len();
        debug!("Appended {} records to {}", records.len(), self.path.display());
        Ok(())
    }

    fn finish(&mut self, _status: RunStatus) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| BatchError::persistence(format!("record file {}", self.path.display()), e))
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}

pub struct SqliteSink {
    conn: Connection,
    path: PathBuf,
    session_id: String,
}

impl SqliteSink {
    /// Open the database and start a new harvest session in it.
    pub fn open(path: &Path, seed_count: usize, configuration: Option<&str>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| BatchError::persistence(format!("database dir {}", parent.display()), e))?;
        }
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let mut sink = Self {
            conn,
            path: path.to_path_buf(),
            session_id: String::new(),
        };
        sink.init_schema()?;
        sink.session_id = sink.create_session(seed_count, configuration)?;
        info!(
            "Writing records to {} (session {})",
            path.display(),
            sink.session_id
        );
        Ok(sink)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            -- Batch runs
            CREATE TABLE IF NOT EXISTS harvest_sessions (
    id TEXT PRIMARY KEY,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'failed', 'cancelled')),
    seed_count INTEGER NOT NULL,
    configuration TEXT        -- JSON configuration used
);

-- Harvested records, one row per content id
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    id_source TEXT NOT NULL CHECK(id_source IN ('content_hash', 'path_tail', 'synthesized')),
    entity_link TEXT NOT NULL,
    asset_urls TEXT NOT NULL,  -- JSON object keyed by size tag
    source_url TEXT NOT NULL,
    scraped_at TEXT NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('success', 'failed')),
    FOREIGN KEY(session_id) REFERENCES harvest_sessions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_records_session ON records(session_id);
CREATE INDEX IF NOT EXISTS idx_records_source ON records(source_url);
            ",
        )?;
        Ok(())
    }

    fn create_session(&self, seed_count: usize, configuration: Option<&str>) -> Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO harvest_sessions (id, start_time, status, seed_count, configuration) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![&session_id, current_timestamp(), "running", seed_count as i64, configuration],
        )?;
        Ok(session_id)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn session_status(&self, session_id: &str) -> Result<Option<String>> {
        let status = self
            .conn
            .query_row(
                "SELECT status FROM harvest_sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status)
    }

    pub fn record_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// `(id, entity_link, source_url)` for every record of a session.
    pub fn get_records_by_session(&self, session_id: &str) -> Result<Vec<(String, String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entity_link, source_url FROM records WHERE session_id = ?1 ORDER BY rowid",
        )?;
        let records = stmt
            .query_map(params![session_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

impl RecordSink for SqliteSink {
    fn append(&mut self, records: &[Record]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO records (
                    id, session_id, id_source, entity_link, asset_urls, source_url, scraped_at, status
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for record in records {
                let asset_urls = serde_json::to_string(&record.asset_urls)?;
                stmt.execute(params![
                    &record.id,
                    &self.session_id,
                    record.id_source.as_str(),
                    record.entity_link.as_str(),
                    asset_urls,
                    &record.source_url,
                    record.scraped_at.to_rfc3339(),
                    record.status.as_str(),
                ])?;
            }
        }
        tx.commit()?;
        debug!("Stored {} records in {}", records.len(), self.path.display());
        Ok(())
    }

    fn finish(&mut self, status: RunStatus) -> Result<()> {
        self.conn.execute(
            "UPDATE harvest_sessions SET status = ?1, end_time = ?2 WHERE id = ?3",
            params![status.as_str(), current_timestamp(), &self.session_id],
        )?;
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
