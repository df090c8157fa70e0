// Tests for batch orchestration over a scripted browser

use reaper_core::batch::{BatchOptions, BatchOutcome, BatchReport, BatchRunner, BatchSinks};
use reaper_core::checkpoint::{BatchStats, CheckpointStore};
use reaper_core::error::{BatchError, Result};
use reaper_core::export::{CsvSink, RecordSink, RunStatus, SqliteSink};
use reaper_core::input::TargetPage;
use reaper_core::progress::{PageStatus, ProgressTracker};
use reaper_core::session::{Credentials, LoginFlow, SessionManager};
use reaper_scanner::testing::{ScriptBook, ScriptedLauncher, ScriptedPage};
use reaper_scanner::{
    CancelFlag, DedupScope, ExtractorProfile, HarvestSettings, HeuristicExtractor, Record,
    RetryPolicy, ScrollHarvester, SizeTag, TerminationReason,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const PAGE_A: &str = "https://www.pinterest.com/search/pins/?q=a";
const PAGE_B: &str = "https://www.pinterest.com/search/pins/?q=b";
const PAGE_C: &str = "https://www.pinterest.com/search/pins/?q=c";

fn pages(urls: &[&str]) -> Vec<TargetPage> {
    urls.iter()
        .map(|u| TargetPage { url: u.to_string() })
        .collect()
}

fn numbered_pages(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!("https://www.pinterest.com/search/pins/?q=p{}", i))
        .collect()
}

fn harvester(no_new_content_limit: u32) -> ScrollHarvester {
    let extractor = HeuristicExtractor::new(ExtractorProfile::default()).unwrap();
    let settings = HarvestSettings {
        no_new_content_limit,
        ..Default::default()
    };
    ScrollHarvester::new(Arc::new(extractor), settings)
}

fn options() -> BatchOptions {
    BatchOptions {
        navigation_retry: RetryPolicy::new(3, Duration::from_secs(1)),
        ..Default::default()
    }
}

fn sessions(book: &ScriptBook) -> SessionManager<ScriptedLauncher> {
    SessionManager::new(book.launcher(), RetryPolicy::new(3, Duration::from_secs(1)))
}

fn tags() -> Vec<SizeTag> {
    vec![SizeTag::new("236x"), SizeTag::new("originals")]
}

struct Harness {
    dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn store(&self) -> CheckpointStore {
        CheckpointStore::new(self.dir.path().join("checkpoints"))
    }

    async fn run(
        &self,
        runner: &BatchRunner,
        targets: &[TargetPage],
        sessions: &mut SessionManager<ScriptedLauncher>,
        sink: &mut dyn RecordSink,
    ) -> Result<BatchReport> {
        let mut tracker =
            ProgressTracker::new(&self.dir.path().join("output"), targets.len(), false).unwrap();
        runner
            .run(
                targets,
                sessions,
                BatchSinks {
                    records: sink,
                    tracker: &mut tracker,
                },
            )
            .await
    }

    fn csv_sink(&self) -> CsvSink {
        CsvSink::create(&self.dir.path().join("output"), &tags()).unwrap()
    }

    fn progress_rows(&self) -> Vec<csv::StringRecord> {
        let log = std::fs::read_dir(self.dir.path().join("output"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.file_name().unwrap().to_string_lossy().starts_with("progress_log_"))
            .unwrap();
        let mut reader = csv::Reader::from_path(log).unwrap();
        reader.records().map(|r| r.unwrap()).collect()
    }
}

/// In-memory sink that can be told to fail.
#[derive(Default)]
struct FlakySink {
    fail_append: bool,
    fail_finish: bool,
    appended: usize,
    finishes: Vec<RunStatus>,
}

impl RecordSink for FlakySink {
    fn append(&mut self, records: &[Record]) -> Result<()> {
        if self.fail_append {
            return Err(BatchError::persistence(
                "record file",
                std::io::Error::other("disk full"),
            ));
        }
        self.appended += records.len();
        Ok(())
    }

    fn finish(&mut self, status: RunStatus) -> Result<()> {
        self.finishes.push(status);
        if self.fail_finish {
            return Err(BatchError::persistence(
                "record file",
                std::io::Error::other("disk full"),
            ));
        }
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

// ============================================================================
// Page Sequencing Tests
// ============================================================================

#[tokio::test]
async fn test_two_page_batch() {
    let harness = Harness::new();
    let book = ScriptBook::new();
    book.add_page(PAGE_A, ScriptedPage::growing(&[2, 4, 6, 8]));
    book.add_page(PAGE_B, ScriptedPage::growing(&[3]));

    let runner = BatchRunner::new(harvester(2), harness.store(), options());
    let mut sessions = sessions(&book);
    let mut sink = harness.csv_sink();
    let report = harness
        .run(&runner, &pages(&[PAGE_A, PAGE_B]), &mut sessions, &mut sink)
        .await
        .unwrap();

    assert_eq!(report.outcome, BatchOutcome::Completed);
    assert_eq!(report.pages.len(), 2);
    assert_eq!(report.pages[0].records_collected, 8);
    assert_eq!(report.pages[0].scrolls_performed, 5);
    assert_eq!(report.pages[0].reason, Some(TerminationReason::Exhausted));
    assert_eq!(report.pages[1].records_collected, 3);
    assert_eq!(report.stats.success_count, 2);
    assert_eq!(report.stats.total_records, 11);
    assert_eq!(report.last_processed_index, Some(1));
    assert_eq!(sink.written(), 11);
    assert_eq!(book.navigations(), vec![PAGE_A.to_string(), PAGE_B.to_string()]);
    // the session is released at the end of the run
    assert_eq!(book.closes(), 1);
}

#[tokio::test]
async fn test_progress_log_has_one_row_per_page() {
    let harness = Harness::new();
    let book = ScriptBook::new();
    book.add_page(PAGE_A, ScriptedPage::growing(&[2]));
    book.add_page(PAGE_B, ScriptedPage::growing(&[1]));

    let runner = BatchRunner::new(harvester(1), harness.store(), options());
    let mut sessions = sessions(&book);
    let mut sink = harness.csv_sink();
    harness
        .run(&runner, &pages(&[PAGE_A, PAGE_B]), &mut sessions, &mut sink)
        .await
        .unwrap();

    let log_dir = harness.dir.path().join("output");
    let log = std::fs::read_dir(&log_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.file_name().unwrap().to_string_lossy().starts_with("progress_log_"))
        .unwrap();
    let mut reader = csv::Reader::from_path(log).unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get(0), Some(PAGE_A));
    assert_eq!(rows[0].get(1), Some("success"));
    assert_eq!(rows[0].get(2), Some("2"));
}

#[tokio::test]
async fn test_start_index_and_limit() {
    let harness = Harness::new();
    let book = ScriptBook::new();
    let urls = numbered_pages(5);
    for url in &urls {
        book.add_page(url, ScriptedPage::growing(&[1]));
    }

    let opts = BatchOptions {
        start_index: 1,
        limit: Some(2),
        ..options()
    };
    let runner = BatchRunner::new(harvester(1), harness.store(), opts);
    let mut sessions = sessions(&book);
    let mut sink = harness.csv_sink();
    let refs: Vec<&str> = urls.iter().map(String::as_str).collect();
    let report = harness
        .run(&runner, &pages(&refs), &mut sessions, &mut sink)
        .await
        .unwrap();

    assert_eq!(report.first_index, 1);
    assert_eq!(report.last_processed_index, Some(2));
    assert_eq!(book.navigations(), vec![urls[1].clone(), urls[2].clone()]);
}

#[tokio::test]
async fn test_start_past_end_processes_nothing() {
    let harness = Harness::new();
    let book = ScriptBook::new();

    let opts = BatchOptions {
        start_index: 5,
        ..options()
    };
    let runner = BatchRunner::new(harvester(1), harness.store(), opts);
    let mut sessions = sessions(&book);
    let mut sink = harness.csv_sink();
    let report = harness
        .run(&runner, &pages(&[PAGE_A]), &mut sessions, &mut sink)
        .await
        .unwrap();

    assert_eq!(report.outcome, BatchOutcome::Completed);
    assert!(report.pages.is_empty());
    assert!(report.last_checkpoint.is_none());
    assert_eq!(book.launches(), 0);
}

// ============================================================================
// Failure Handling Tests
// ============================================================================

#[tokio::test]
async fn test_navigation_retries_then_succeeds() {
    let harness = Harness::new();
    let book = ScriptBook::new();
    book.add_page(PAGE_A, ScriptedPage::growing(&[2]));
    book.fail_navigation(PAGE_A, 2);

    let runner = BatchRunner::new(harvester(1), harness.store(), options());
    let mut sessions = sessions(&book);
    let mut sink = harness.csv_sink();
    let report = harness
        .run(&runner, &pages(&[PAGE_A]), &mut sessions, &mut sink)
        .await
        .unwrap();

    assert_eq!(book.navigations().len(), 3);
    assert_eq!(report.pages[0].status, PageStatus::Success);
    assert_eq!(report.pages[0].records_collected, 2);
}

#[tokio::test]
async fn test_failed_page_does_not_stop_batch() {
    let harness = Harness::new();
    let book = ScriptBook::new();
    book.add_page(PAGE_A, ScriptedPage::growing(&[2]));
    book.add_page(PAGE_B, ScriptedPage::growing(&[3]));
    book.fail_navigation(PAGE_A, 3);

    let runner = BatchRunner::new(harvester(1), harness.store(), options());
    let mut sessions = sessions(&book);
    let mut sink = harness.csv_sink();
    let report = harness
        .run(&runner, &pages(&[PAGE_A, PAGE_B]), &mut sessions, &mut sink)
        .await
        .unwrap();

    assert_eq!(report.outcome, BatchOutcome::Completed);
    assert_eq!(report.pages[0].status, PageStatus::Failed);
    assert!(report.pages[0].error_message.is_some());
    assert_eq!(report.pages[1].status, PageStatus::Success);
    assert_eq!(
        report.stats,
        BatchStats {
            processed: 2,
            success_count: 1,
            failure_count: 1,
            total_records: 3,
        }
    );
}

#[tokio::test]
async fn test_stop_on_error() {
    let harness = Harness::new();
    let book = ScriptBook::new();
    book.add_page(PAGE_B, ScriptedPage::growing(&[3]));
    book.fail_navigation(PAGE_A, 3);

    let opts = BatchOptions {
        continue_on_error: false,
        ..options()
    };
    let runner = BatchRunner::new(harvester(1), harness.store(), opts);
    let mut sessions = sessions(&book);
    let mut sink = harness.csv_sink();
    let report = harness
        .run(&runner, &pages(&[PAGE_A, PAGE_B]), &mut sessions, &mut sink)
        .await
        .unwrap();

    match report.outcome {
        BatchOutcome::StoppedOnError { index, ref url, .. } => {
            assert_eq!(index, 0);
            assert_eq!(url, PAGE_A);
        }
        ref other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(!book.navigations().contains(&PAGE_B.to_string()));
}

#[tokio::test]
async fn test_authentication_failure_aborts_batch() {
    let harness = Harness::new();
    let book = ScriptBook::new();
    book.add_page(PAGE_A, ScriptedPage::growing(&[2]));

    let runner = BatchRunner::new(harvester(1), harness.store(), options());
    let mut sessions = sessions(&book).with_login(
        LoginFlow::new("https://www.pinterest.com/login/"),
        Credentials {
            email: "user@example.com".to_string(),
            password: "secret".to_string(),
        },
    );
    let mut sink =
        SqliteSink::open(&harness.dir.path().join("reaper.db"), 1, None).unwrap();
    let result = harness
        .run(&runner, &pages(&[PAGE_A]), &mut sessions, &mut sink)
        .await;

    assert!(matches!(result, Err(BatchError::Authentication { attempts: 3, .. })));
    assert!(!book.navigations().contains(&PAGE_A.to_string()));
    assert_eq!(
        sink.session_status(sink.session_id()).unwrap(),
        Some("failed".to_string())
    );
}

// ============================================================================
// Checkpoint and Resume Tests
// ============================================================================

#[tokio::test]
async fn test_checkpoints_every_interval_and_at_end() {
    let harness = Harness::new();
    let book = ScriptBook::new();
    let urls = numbered_pages(5);
    for url in &urls {
        book.add_page(url, ScriptedPage::growing(&[1]));
    }

    let opts = BatchOptions {
        checkpoint_interval: 2,
        ..options()
    };
    let runner = BatchRunner::new(harvester(1), harness.store(), opts);
    let mut sessions = sessions(&book);
    let mut sink = harness.csv_sink();
    let refs: Vec<&str> = urls.iter().map(String::as_str).collect();
    let report = harness
        .run(&runner, &pages(&refs), &mut sessions, &mut sink)
        .await
        .unwrap();

    let store = harness.store();
    assert!(store.path_for(1).exists());
    assert!(store.path_for(3).exists());
    assert!(store.path_for(4).exists());
    assert!(!store.path_for(0).exists());

    let last = report.last_checkpoint.unwrap();
    assert_eq!(last.last_processed_index, 4);
    assert_eq!(last.success_count, 5);
    assert_eq!(last.total_records_collected, 5);
}

#[tokio::test]
async fn test_resume_continues_after_checkpoint() {
    let harness = Harness::new();
    let book = ScriptBook::new();
    let urls = numbered_pages(5);
    for url in &urls {
        book.add_page(url, ScriptedPage::growing(&[2]));
    }
    harness
        .store()
        .save(
            2,
            &BatchStats {
                processed: 3,
                success_count: 3,
                failure_count: 0,
                total_records: 6,
            },
        )
        .unwrap();

    let opts = BatchOptions {
        resume: true,
        ..options()
    };
    let runner = BatchRunner::new(harvester(1), harness.store(), opts);
    let mut sessions = sessions(&book);
    let mut sink = harness.csv_sink();
    let refs: Vec<&str> = urls.iter().map(String::as_str).collect();
    let report = harness
        .run(&runner, &pages(&refs), &mut sessions, &mut sink)
        .await
        .unwrap();

    assert_eq!(report.first_index, 3);
    assert_eq!(book.navigations(), vec![urls[3].clone(), urls[4].clone()]);
    assert_eq!(report.stats.processed, 5);
    assert_eq!(report.stats.total_records, 10);
    assert_eq!(report.last_checkpoint.unwrap().last_processed_index, 4);
}

#[tokio::test]
async fn test_without_resume_checkpoints_are_ignored() {
    let harness = Harness::new();
    let book = ScriptBook::new();
    book.add_page(PAGE_A, ScriptedPage::growing(&[1]));
    book.add_page(PAGE_B, ScriptedPage::growing(&[1]));
    harness.store().save(0, &BatchStats::default()).unwrap();

    let runner = BatchRunner::new(harvester(1), harness.store(), options());
    let (start, carried) = runner.starting_point().unwrap();
    assert_eq!(start, 0);
    assert_eq!(carried, BatchStats::default());

    let mut sessions = sessions(&book);
    let mut sink = harness.csv_sink();
    let report = harness
        .run(&runner, &pages(&[PAGE_A, PAGE_B]), &mut sessions, &mut sink)
        .await
        .unwrap();
    assert_eq!(report.pages.len(), 2);
}

#[tokio::test]
async fn test_resume_without_checkpoint_uses_start_index() {
    let harness = Harness::new();
    let opts = BatchOptions {
        resume: true,
        start_index: 4,
        ..options()
    };
    let runner = BatchRunner::new(harvester(1), harness.store(), opts);

    let (start, carried) = runner.starting_point().unwrap();
    assert_eq!(start, 4);
    assert_eq!(carried, BatchStats::default());
}

#[tokio::test]
async fn test_cancel_mid_page_checkpoints_last_completed_page() {
    let harness = Harness::new();
    let book = ScriptBook::new();
    book.add_page(PAGE_A, ScriptedPage::growing(&[2]));
    book.add_page(PAGE_B, ScriptedPage::growing(&[2, 4]));
    book.add_page(PAGE_C, ScriptedPage::growing(&[2]));

    let cancel = CancelFlag::new();
    book.cancel_on_navigate(PAGE_B, cancel.clone());
    let runner = BatchRunner::new(
        harvester(1).with_cancel_flag(cancel),
        harness.store(),
        options(),
    );
    let mut sessions = sessions(&book);
    let mut sink =
        SqliteSink::open(&harness.dir.path().join("reaper.db"), 3, None).unwrap();
    let report = harness
        .run(&runner, &pages(&[PAGE_A, PAGE_B, PAGE_C]), &mut sessions, &mut sink)
        .await
        .unwrap();

    assert_eq!(report.outcome, BatchOutcome::Cancelled);
    assert_eq!(report.pages.len(), 1);
    assert_eq!(report.last_checkpoint.unwrap().last_processed_index, 0);
    assert!(!book.navigations().contains(&PAGE_C.to_string()));
    assert_eq!(
        sink.session_status(sink.session_id()).unwrap(),
        Some("cancelled".to_string())
    );
    // only the completed page reached the sink
    assert_eq!(sink.record_count().unwrap(), 2);
}

#[tokio::test]
async fn test_cancel_before_start_processes_nothing() {
    let harness = Harness::new();
    let book = ScriptBook::new();
    book.add_page(PAGE_A, ScriptedPage::growing(&[2]));

    let cancel = CancelFlag::new();
    cancel.cancel();
    let runner = BatchRunner::new(
        harvester(1).with_cancel_flag(cancel),
        harness.store(),
        options(),
    );
    let mut sessions = sessions(&book);
    let mut sink = harness.csv_sink();
    let report = harness
        .run(&runner, &pages(&[PAGE_A]), &mut sessions, &mut sink)
        .await
        .unwrap();

    assert_eq!(report.outcome, BatchOutcome::Cancelled);
    assert!(report.last_checkpoint.is_none());
    assert!(book.navigations().is_empty());
}

// ============================================================================
// Dedup Scope and Session Recycling Tests
// ============================================================================

#[tokio::test]
async fn test_page_scope_keeps_repeats_across_pages() {
    let harness = Harness::new();
    let book = ScriptBook::new();
    book.add_page(PAGE_A, ScriptedPage::growing(&[3]));
    book.add_page(PAGE_B, ScriptedPage::growing(&[3]));

    let runner = BatchRunner::new(harvester(1), harness.store(), options());
    let mut sessions = sessions(&book);
    let mut sink = harness.csv_sink();
    let report = harness
        .run(&runner, &pages(&[PAGE_A, PAGE_B]), &mut sessions, &mut sink)
        .await
        .unwrap();

    assert_eq!(report.stats.total_records, 6);
}

#[tokio::test]
async fn test_batch_scope_drops_repeats_across_pages() {
    let harness = Harness::new();
    let book = ScriptBook::new();
    book.add_page(PAGE_A, ScriptedPage::growing(&[3]));
    book.add_page(PAGE_B, ScriptedPage::growing(&[4]));

    let opts = BatchOptions {
        dedup_scope: DedupScope::Batch,
        ..options()
    };
    let runner = BatchRunner::new(harvester(1), harness.store(), opts);
    let mut sessions = sessions(&book);
    let mut sink = harness.csv_sink();
    let report = harness
        .run(&runner, &pages(&[PAGE_A, PAGE_B]), &mut sessions, &mut sink)
        .await
        .unwrap();

    assert_eq!(report.pages[0].records_collected, 3);
    assert_eq!(report.pages[1].records_collected, 1);
    assert_eq!(sink.written(), 4);
}

#[tokio::test]
async fn test_session_recycled_every_interval() {
    let harness = Harness::new();
    let book = ScriptBook::new();
    let urls = numbered_pages(5);
    for url in &urls {
        book.add_page(url, ScriptedPage::growing(&[1]));
    }

    let runner = BatchRunner::new(harvester(1), harness.store(), options());
    let mut sessions = sessions(&book).with_restart_interval(2);
    let mut sink = harness.csv_sink();
    let refs: Vec<&str> = urls.iter().map(String::as_str).collect();
    harness
        .run(&runner, &pages(&refs), &mut sessions, &mut sink)
        .await
        .unwrap();

    // recycled after pages 2 and 4, never after the last page
    assert_eq!(book.launches(), 3);
    assert_eq!(book.closes(), 3);
}

// ============================================================================
// Persistence Failure Tests
// ============================================================================

#[tokio::test]
async fn test_checkpoint_write_failure_aborts_batch() {
    let harness = Harness::new();
    // a regular file where the checkpoint directory should be
    std::fs::write(harness.dir.path().join("checkpoints"), "").unwrap();
    let book = ScriptBook::new();
    book.add_page(PAGE_A, ScriptedPage::growing(&[2]));
    book.add_page(PAGE_B, ScriptedPage::growing(&[2]));

    let options = BatchOptions {
        checkpoint_interval: 1,
        ..options()
    };
    let runner = BatchRunner::new(harvester(1), harness.store(), options);
    let mut sessions = sessions(&book);
    let mut sink = FlakySink::default();
    let result = harness
        .run(&runner, &pages(&[PAGE_A, PAGE_B]), &mut sessions, &mut sink)
        .await;

    assert!(matches!(result, Err(BatchError::Persistence { .. })));
    assert_eq!(book.navigations(), vec![PAGE_A.to_string()]);
    assert_eq!(sink.finishes, vec![RunStatus::Failed]);
    assert_eq!(book.closes(), 1);
}

#[tokio::test]
async fn test_sink_failure_aborts_batch_without_checkpoint() {
    let harness = Harness::new();
    let book = ScriptBook::new();
    book.add_page(PAGE_A, ScriptedPage::growing(&[2]));
    book.add_page(PAGE_B, ScriptedPage::growing(&[2]));

    let options = BatchOptions {
        checkpoint_interval: 1,
        ..options()
    };
    let runner = BatchRunner::new(harvester(1), harness.store(), options);
    let mut sessions = sessions(&book);
    let mut sink = FlakySink {
        fail_append: true,
        ..Default::default()
    };
    let result = harness
        .run(&runner, &pages(&[PAGE_A, PAGE_B]), &mut sessions, &mut sink)
        .await;

    assert!(matches!(result, Err(BatchError::Persistence { .. })));
    assert_eq!(book.navigations(), vec![PAGE_A.to_string()]);
    // the page is logged before its records are handed over, and never
    // checkpointed, so a resume starts from it again
    assert_eq!(harness.progress_rows().len(), 1);
    assert!(harness.store().load_latest().unwrap().is_none());
    assert_eq!(sink.appended, 0);
}

#[tokio::test]
async fn test_sink_finished_once_when_finish_fails() {
    let harness = Harness::new();
    let book = ScriptBook::new();
    book.add_page(PAGE_A, ScriptedPage::growing(&[2]));

    let runner = BatchRunner::new(harvester(1), harness.store(), options());
    let mut sessions = sessions(&book);
    let mut sink = FlakySink {
        fail_finish: true,
        ..Default::default()
    };
    let result = harness
        .run(&runner, &pages(&[PAGE_A]), &mut sessions, &mut sink)
        .await;

    assert!(matches!(result, Err(BatchError::Persistence { .. })));
    assert_eq!(sink.appended, 2);
    assert_eq!(sink.finishes, vec![RunStatus::Completed]);
}
