use crate::browser::{Browser, CancelFlag, scroll_by_script};
use crate::dedup::Deduplicator;
use crate::error::Result;
use crate::extractor::{MarkupExtractor, Snapshot};
use crate::pacing::PacingPolicy;
use crate::result::{HarvestOutcome, IdSource, TerminationReason};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Scroll budget applied when `max_scroll_attempts` is negative.
pub const UNBOUNDED_SCROLL_CAP: u32 = 999;

/// Called after each scroll cycle with the cycle number and the page's record count.
pub type ProgressCallback = Arc<dyn Fn(u32, usize) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct HarvestSettings {
    /// Upper bound on scroll cycles per page; negative means "until exhausted".
    pub max_scroll_attempts: i64,
    /// Consecutive empty cycles that end a page.
    pub no_new_content_limit: u32,
    pub pacing: PacingPolicy,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            max_scroll_attempts: -1,
            no_new_content_limit: 3,
            pacing: PacingPolicy::default(),
        }
    }
}

impl HarvestSettings {
    pub fn scroll_cap(&self) -> u32 {
        if self.max_scroll_attempts < 0 {
            UNBOUNDED_SCROLL_CAP
        } else {
            u32::try_from(self.max_scroll_attempts).unwrap_or(u32::MAX)
        }
    }

    /// A limit of zero would end every page before its first scroll.
    pub fn exhaustion_limit(&self) -> u32 {
        self.no_new_content_limit.max(1)
    }
}

/// Per-page scroll counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScrollState {
    pub scrolls_performed: u32,
    pub no_new_content_count: u32,
    pub previous_record_count: usize,
}

impl ScrollState {
    /// Fold the record count observed at the end of a cycle into the state.
    /// Returns the number of records the cycle added.
    pub fn finish_cycle(&mut self, record_count: usize) -> usize {
        self.scrolls_performed += 1;
        let added = record_count.saturating_sub(self.previous_record_count);
        if added > 0 {
            self.no_new_content_count = 0;
        } else {
            self.no_new_content_count += 1;
        }
        self.previous_record_count = record_count;
        added
    }
}

/// Drives one browser session through the scroll-and-extract loop of a page.
pub struct ScrollHarvester {
    extractor: Arc<dyn MarkupExtractor>,
    settings: HarvestSettings,
    cancel: CancelFlag,
    progress_callback: Option<ProgressCallback>,
}

impl ScrollHarvester {
    pub fn new(extractor: Arc<dyn MarkupExtractor>, settings: HarvestSettings) -> Self {
        Self {
            extractor,
            settings,
            cancel: CancelFlag::new(),
            progress_callback: None,
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn settings(&self) -> &HarvestSettings {
        &self.settings
    }

    /// Navigate to `url` and wait for it to settle. Navigation failures are
    /// returned; the caller decides whether to retry.
    pub async fn load<B>(&self, browser: &mut B, url: &str, timeout: Duration) -> Result<()>
    where
        B: Browser + ?Sized,
    {
        browser.navigate(url, timeout).await?;
        let settle = self.settings.pacing.jittered(self.settings.pacing.settle_after_load);
        browser.sleep(settle).await;
        Ok(())
    }

    /// Harvest the page currently loaded in `browser`.
    ///
    /// Failed scroll or extraction steps are logged and skipped; only
    /// `load` can fail a page. Records whose id `seen` already holds are
    /// dropped.
    pub async fn harvest<B>(
        &self,
        browser: &mut B,
        source_url: &str,
        seen: &mut Deduplicator,
    ) -> HarvestOutcome
    where
        B: Browser + ?Sized,
    {
        let cap = self.settings.scroll_cap();
        let limit = self.settings.exhaustion_limit();
        let pacing = &self.settings.pacing;

        let mut outcome = HarvestOutcome::new(source_url.to_string());
        let mut state = ScrollState::default();

        info!("Starting auto-scroll on {}", source_url);
        self.extract_pass(browser, source_url, seen, &mut outcome).await;
        state.previous_record_count = outcome.records.len();
        info!("Initial load: {} records", outcome.records.len());

        outcome.reason = 'cycles: loop {
            if state.no_new_content_count >= limit {
                break TerminationReason::Exhausted;
            }
            if state.scrolls_performed >= cap {
                break TerminationReason::ScrollCapReached;
            }

            for step in 0..pacing.scroll_steps {
                if self.cancel.is_cancelled() {
                    break 'cycles TerminationReason::Cancelled;
                }
                self.scroll(browser, pacing.step_distance_px, &mut outcome).await;
                browser.sleep(pacing.jittered(pacing.step_pause)).await;
                if pacing.extracts_at(step) {
                    self.extract_pass(browser, source_url, seen, &mut outcome).await;
                }
            }

            if self.cancel.is_cancelled() {
                break TerminationReason::Cancelled;
            }
            self.scroll(browser, pacing.final_nudge_px, &mut outcome).await;
            browser.sleep(pacing.jittered(pacing.load_wait)).await;
            self.extract_pass(browser, source_url, seen, &mut outcome).await;

            let added = state.finish_cycle(outcome.records.len());
            if added > 0 {
                debug!(
                    "Scroll {}: +{} new (Total: {})",
                    state.scrolls_performed,
                    added,
                    outcome.records.len()
                );
            } else {
                debug!(
                    "Scroll {}: No new content ({}/{})",
                    state.scrolls_performed, state.no_new_content_count, limit
                );
            }
            if let Some(ref callback) = self.progress_callback {
                callback(state.scrolls_performed, outcome.records.len());
            }
        };
        outcome.scrolls_performed = state.scrolls_performed;

        info!(
            "Finished {}: {} records after {} scrolls ({})",
            source_url,
            outcome.records.len(),
            outcome.scrolls_performed,
            outcome.reason
        );

        let synthesized = outcome
            .records
            .iter()
            .filter(|r| r.id_source == IdSource::Synthesized)
            .count();
        if synthesized > 0 {
            warn!(
                "{} records on {} carry synthesized ids and may repeat across passes",
                synthesized, source_url
            );
        }
        if outcome.step_errors > 0 {
            warn!("{} steps failed on {}", outcome.step_errors, source_url);
        }

        outcome
    }

    async fn scroll<B>(&self, browser: &mut B, px: u32, outcome: &mut HarvestOutcome)
    where
        B: Browser + ?Sized,
    {
        if let Err(e) = browser.execute_script(&scroll_by_script(i64::from(px))).await {
            outcome.step_errors += 1;
            warn!("Scroll step failed on {}: {}", outcome.url, e);
        }
    }

    async fn extract_pass<B>(
        &self,
        browser: &mut B,
        source_url: &str,
        seen: &mut Deduplicator,
        outcome: &mut HarvestOutcome,
    ) where
        B: Browser + ?Sized,
    {
        let markup = match browser.read_markup().await {
            Ok(markup) => markup,
            Err(e) => {
                outcome.step_errors += 1;
                warn!("Extraction step failed on {}: {}", source_url, e);
                return;
            }
        };

        let snapshot = Snapshot::new(&markup, source_url);
        for record in self.extractor.extract(&snapshot) {
            if seen.admit(&record.id) {
                outcome.records.push(record);
            }
        }
    }
}
