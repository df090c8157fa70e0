// Sequences target pages through the harvester

use crate::checkpoint::{BatchStats, Checkpoint, CheckpointStore};
use crate::error::Result;
use crate::export::{RecordSink, RunStatus};
use crate::input::TargetPage;
use crate::progress::{PageReport, PageStatus, ProgressTracker};
use crate::session::SessionManager;
use reaper_scanner::{
    Browser, BrowserLauncher, DedupScope, Deduplicator, HarvestOutcome, RetryPolicy,
    ScrollHarvester, TerminationReason,
};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Write a checkpoint after every K pages.
    pub checkpoint_interval: usize,
    /// Keep going after a page fails.
    pub continue_on_error: bool,
    /// Continue after the latest checkpoint instead of starting over.
    pub resume: bool,
    pub start_index: usize,
    /// Process at most this many pages.
    pub limit: Option<usize>,
    pub navigation_retry: RetryPolicy,
    pub navigation_timeout: Duration,
    pub dedup_scope: DedupScope,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            checkpoint_interval: 10,
            continue_on_error: true,
            resume: false,
            start_index: 0,
            limit: None,
            navigation_retry: RetryPolicy::default(),
            navigation_timeout: Duration::from_secs(30),
            dedup_scope: DedupScope::Page,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Completed,
    Cancelled,
    /// A page failed while `continue_on_error` was off.
    StoppedOnError { index: usize, url: String, message: String },
}

impl BatchOutcome {
    fn run_status(&self) -> RunStatus {
        match self {
            BatchOutcome::Completed => RunStatus::Completed,
            BatchOutcome::Cancelled => RunStatus::Cancelled,
            BatchOutcome::StoppedOnError { .. } => RunStatus::Failed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub outcome: BatchOutcome,
    /// First index this run processed (after resume and start-index).
    pub first_index: usize,
    pub last_processed_index: Option<usize>,
    pub stats: BatchStats,
    /// Pages fully processed by this run, in order.
    pub pages: Vec<PageReport>,
    pub last_checkpoint: Option<Checkpoint>,
}

/// The collaborators a run writes to.
pub struct BatchSinks<'a> {
    pub records: &'a mut dyn RecordSink,
    pub tracker: &'a mut ProgressTracker,
}

pub struct BatchRunner {
    harvester: ScrollHarvester,
    checkpoints: CheckpointStore,
    options: BatchOptions,
}

impl BatchRunner {
    pub fn new(harvester: ScrollHarvester, checkpoints: CheckpointStore, options: BatchOptions) -> Self {
        Self {
            harvester,
            checkpoints,
            options,
        }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Index of the first page to process and the counters carried over.
    pub fn starting_point(&self) -> Result<(usize, BatchStats)> {
        if !self.options.resume {
            return Ok((self.options.start_index, BatchStats::default()));
        }

        match self.checkpoints.load_latest()? {
            Some(checkpoint) => {
                let start = self.options.start_index.max(checkpoint.next_index());
                info!(
                    "Resuming from checkpoint: {} pages done, continuing at index {}",
                    checkpoint.last_processed_index + 1,
                    start
                );
                let stats = BatchStats {
                    processed: checkpoint.success_count + checkpoint.failure_count,
                    success_count: checkpoint.success_count,
                    failure_count: checkpoint.failure_count,
                    total_records: checkpoint.total_records_collected,
                };
                Ok((start, stats))
            }
            None => {
                info!(
                    "No checkpoint in {}; starting at index {}",
                    self.checkpoints.dir().display(),
                    self.options.start_index
                );
                Ok((self.options.start_index, BatchStats::default()))
            }
        }
    }

    /// Process `pages` in order, one at a time.
    ///
    /// Page-level failures are counted and logged; authentication, browser
    /// and persistence failures abort the run. Checkpoints only ever name a
    /// fully processed page.
    pub async fn run<L: BrowserLauncher>(
        &self,
        pages: &[TargetPage],
        sessions: &mut SessionManager<L>,
        sinks: BatchSinks<'_>,
    ) -> Result<BatchReport> {
        let BatchSinks { records, tracker } = sinks;

        let result = self.run_pages(pages, sessions, records, tracker).await;
        sessions.shutdown().await;

        // The sink is finished exactly once, whichever way the run ended.
        match result {
            Ok(report) => {
                records.finish(report.outcome.run_status())?;
                Ok(report)
            }
            Err(e) => {
                if let Err(finish_err) = records.finish(RunStatus::Failed) {
                    error!("Could not close record sink: {}", finish_err);
                }
                Err(e)
            }
        }
    }

    async fn run_pages<L: BrowserLauncher>(
        &self,
        pages: &[TargetPage],
        sessions: &mut SessionManager<L>,
        records: &mut dyn RecordSink,
        tracker: &mut ProgressTracker,
    ) -> Result<BatchReport> {
        let (start, carried) = self.starting_point()?;
        tracker.seed(carried);

        let end = match self.options.limit {
            Some(limit) => start.saturating_add(limit).min(pages.len()),
            None => pages.len(),
        };
        let interval = self.options.checkpoint_interval.max(1);
        let cancel = self.harvester.cancel_flag().clone();

        let mut report = BatchReport {
            outcome: BatchOutcome::Completed,
            first_index: start,
            last_processed_index: None,
            stats: carried,
            pages: Vec::new(),
            last_checkpoint: None,
        };

        if start >= end {
            info!("Nothing to do: start index {} of {} pages", start, pages.len());
        } else {
            info!("Processing pages {} to {} of {}", start, end - 1, pages.len());
        }

        let mut batch_seen = Deduplicator::new();
        let mut last_saved: Option<usize> = None;

        for (index, page) in pages.iter().enumerate().take(end).skip(start) {
            if cancel.is_cancelled() {
                report.outcome = BatchOutcome::Cancelled;
                break;
            }

            tracker.start_page(&page.url);
            let mut page_seen = Deduplicator::new();
            let seen = match self.options.dedup_scope {
                DedupScope::Page => &mut page_seen,
                DedupScope::Batch => &mut batch_seen,
            };

            let (page_report, harvested) = match self.process_page(sessions, &page.url, seen).await {
                Ok(harvest) if harvest.reason == TerminationReason::Cancelled => {
                    // The page was interrupted mid-harvest; it is retried on resume.
                    info!("Cancelled while harvesting {}", page.url);
                    report.outcome = BatchOutcome::Cancelled;
                    break;
                }
                Ok(harvest) => {
                    let page_report = PageReport {
                        index,
                        url: page.url.clone(),
                        status: PageStatus::Success,
                        records_collected: harvest.records.len(),
                        scrolls_performed: harvest.scrolls_performed,
                        reason: Some(harvest.reason),
                        error_message: None,
                        duration: tracker.page_elapsed(),
                    };
                    (page_report, harvest.records)
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!("Page {} failed: {}", page.url, e);
                    let page_report = PageReport {
                        index,
                        url: page.url.clone(),
                        status: PageStatus::Failed,
                        records_collected: 0,
                        scrolls_performed: 0,
                        reason: None,
                        error_message: Some(e.to_string()),
                        duration: tracker.page_elapsed(),
                    };
                    (page_report, Vec::new())
                }
            };

            // Log row first: the sink never holds rows for a page the log and
            // checkpoints do not know about.
            tracker.log_page(&page_report)?;
            if !harvested.is_empty() {
                records.append(&harvested)?;
            }
            report.last_processed_index = Some(index);
            let failed = page_report.status == PageStatus::Failed;
            let message = page_report.error_message.clone().unwrap_or_default();
            report.pages.push(page_report);

            if failed && !self.options.continue_on_error {
                warn!("Stopping at page {} (continue-on-error is off)", index);
                report.outcome = BatchOutcome::StoppedOnError {
                    index,
                    url: page.url.clone(),
                    message,
                };
                break;
            }

            if (index + 1) % interval == 0 {
                report.last_checkpoint = Some(self.checkpoints.save(index, &tracker.stats())?);
                last_saved = Some(index);
            }

            if index + 1 < end {
                sessions.page_done().await?;
            }
        }

        if let Some(index) = report.last_processed_index
            && last_saved != Some(index)
        {
            report.last_checkpoint = Some(self.checkpoints.save(index, &tracker.stats())?);
        }

        report.stats = tracker.stats();

        match report.outcome {
            BatchOutcome::Completed => info!("Batch completed"),
            BatchOutcome::Cancelled => warn!("Batch cancelled; progress saved"),
            BatchOutcome::StoppedOnError { .. } => warn!("Batch stopped on error"),
        }
        Ok(report)
    }

    async fn process_page<L: BrowserLauncher>(
        &self,
        sessions: &mut SessionManager<L>,
        url: &str,
        seen: &mut Deduplicator,
    ) -> Result<HarvestOutcome> {
        let browser = sessions.browser().await?;
        self.load_with_retries(browser, url).await?;
        Ok(self.harvester.harvest(browser, url, seen).await)
    }

    async fn load_with_retries<B>(&self, browser: &mut B, url: &str) -> Result<()>
    where
        B: Browser + ?Sized,
    {
        let retry = self.options.navigation_retry;
        let mut attempt = 1;
        loop {
            match self
                .harvester
                .load(browser, url, self.options.navigation_timeout)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_page_level() && retry.has_more(attempt) => {
                    warn!(
                        "Attempt {}/{} to load {} failed: {}",
                        attempt, retry.attempts, url, e
                    );
                    browser.sleep(retry.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
