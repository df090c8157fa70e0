use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

/// Lifetime of a seen-id set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupScope {
    /// A fresh set per target page.
    #[default]
    Page,
    /// One set shared by every page of a batch run.
    Batch,
}

impl FromStr for DedupScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "page" => Ok(DedupScope::Page),
            "batch" => Ok(DedupScope::Batch),
            other => Err(format!("unknown dedup scope '{}'", other)),
        }
    }
}

/// Content-id gate consulted before a candidate record is kept.
///
/// Extraction re-runs over overlapping snapshots while a page scrolls, so the
/// same asset is seen many times. Only the first sighting is admitted. There
/// is no eviction; entries live as long as the deduplicator.
#[derive(Debug, Default, Clone)]
pub struct Deduplicator {
    seen: HashSet<String>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true and remembers `id` the first time it is offered.
    pub fn admit(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        self.seen.insert(id.to_string())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
