pub mod browser;
pub mod dedup;
pub mod error;
pub mod extractor;
pub mod harvester;
pub mod pacing;
pub mod result;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use browser::{Browser, BrowserLauncher, CancelFlag};
pub use dedup::{DedupScope, Deduplicator};
pub use error::ScanError;
pub use extractor::{ExtractorProfile, HeuristicExtractor, MarkupExtractor, Snapshot};
pub use harvester::{HarvestSettings, ScrollHarvester};
pub use pacing::{PacingPolicy, RetryPolicy};
pub use result::{EntityLink, HarvestOutcome, IdSource, Record, RecordStatus, SizeTag, TerminationReason};
