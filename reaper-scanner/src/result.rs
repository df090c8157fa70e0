use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Placeholder written for records whose owning entity could not be located.
pub const UNRESOLVED_LINK: &str = "unresolved";

/// Named rendition width of an asset (`236x`, `originals`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SizeTag(String);

impl SizeTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SizeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityLink {
    Resolved(String),
    Unresolved,
}

impl EntityLink {
    pub fn as_str(&self) -> &str {
        match self {
            EntityLink::Resolved(link) => link,
            EntityLink::Unresolved => UNRESOLVED_LINK,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, EntityLink::Resolved(_))
    }
}

/// How a record's content id was derived.
///
/// `Synthesized` ids are built from the clock and a random salt, so the same
/// asset seen twice gets two different ids. Such records cannot be
/// deduplicated across extraction passes or matched up after a resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdSource {
    ContentHash,
    PathTail,
    Synthesized,
}

impl IdSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdSource::ContentHash => "content_hash",
            IdSource::PathTail => "path_tail",
            IdSource::Synthesized => "synthesized",
        }
    }

    pub fn is_stable(&self) -> bool {
        !matches!(self, IdSource::Synthesized)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Success,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Success => "success",
            RecordStatus::Failed => "failed",
        }
    }
}

/// One harvested entity: an asset plus the metadata recovered around it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub id_source: IdSource,
    pub entity_link: EntityLink,
    pub asset_urls: BTreeMap<SizeTag, String>,
    pub source_url: String,
    pub scraped_at: DateTime<Utc>,
    pub status: RecordStatus,
}

impl Record {
    pub fn asset_url(&self, tag: &SizeTag) -> Option<&str> {
        self.asset_urls.get(tag).map(String::as_str)
    }
}

/// Why a page harvest stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// `no_new_content_limit` consecutive cycles produced nothing new.
    Exhausted,
    /// The scroll budget ran out while content was still arriving.
    ScrollCapReached,
    /// The operator interrupted the run mid-page.
    Cancelled,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::Exhausted => "exhausted",
            TerminationReason::ScrollCapReached => "scroll cap reached",
            TerminationReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HarvestOutcome {
    pub url: String,
    pub records: Vec<Record>,
    pub scrolls_performed: u32,
    pub reason: TerminationReason,
    /// Extraction or scroll steps that failed and were skipped.
    pub step_errors: usize,
}

impl HarvestOutcome {
    pub fn new(url: String) -> Self {
        Self {
            url,
            records: Vec::new(),
            scrolls_performed: 0,
            reason: TerminationReason::Exhausted,
            step_errors: 0,
        }
    }
}
