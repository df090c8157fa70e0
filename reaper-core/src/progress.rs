// Per-page progress log, running stats and console progress

use crate::checkpoint::BatchStats;
use crate::error::{BatchError, Result};
use chrono::{SecondsFormat, Utc};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use reaper_scanner::TerminationReason;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const LOG_HEADER: [&str; 7] = [
    "url",
    "status",
    "records_collected",
    "scrolls_performed",
    "error_message",
    "timestamp",
    "duration",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    Success,
    Failed,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageStatus::Success => "success",
            PageStatus::Failed => "failed",
        }
    }
}

/// What one fully processed page contributed.
#[derive(Debug, Clone)]
pub struct PageReport {
    pub index: usize,
    pub url: String,
    pub status: PageStatus,
    pub records_collected: usize,
    pub scrolls_performed: u32,
    pub reason: Option<TerminationReason>,
    pub error_message: Option<String>,
    pub duration: Duration,
}

/// Format a duration the way the progress log and summary show it:
/// `Nd Nh`, `Nh Nm`, `Nm Ns` or `Ns`.
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("{}d {}h", days, hours % 24)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes % 60)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}

pub struct ProgressTracker {
    log_path: PathBuf,
    log: csv::Writer<File>,
    total_pages: usize,
    stats: BatchStats,
    /// Pages processed since this tracker was opened; seeded stats excluded.
    run_processed: usize,
    started: Instant,
    page_started: Instant,
    bar: ProgressBar,
}

impl ProgressTracker {
    /// Open (or continue) today's progress log in `output_dir`.
    pub fn new(output_dir: &Path, total_pages: usize, show_progress: bool) -> Result<Self> {
        fs::create_dir_all(output_dir).map_err(|e| {
            BatchError::persistence(format!("output dir {}", output_dir.display()), e)
        })?;

        let log_path = output_dir.join(format!(
            "progress_log_{}.csv",
            Utc::now().format("%Y-%m-%d")
        ));
        let is_new = !log_path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| BatchError::persistence(format!("progress log {}", log_path.display()), e))?;

        let mut log = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_new {
            log.write_record(LOG_HEADER)?;
            log.flush()
                .map_err(|e| BatchError::persistence("progress log header", e))?;
        }

        let bar = if show_progress {
            let pb = ProgressBar::new(total_pages as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        } else {
            ProgressBar::hidden()
        };

        Ok(Self {
            log_path,
            log,
            total_pages,
            stats: BatchStats::default(),
            run_processed: 0,
            started: Instant::now(),
            page_started: Instant::now(),
            bar,
        })
    }

    /// Seed counters from a resumed checkpoint.
    pub fn seed(&mut self, stats: BatchStats) {
        self.stats = stats;
        self.bar.set_position(stats.processed as u64);
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    pub fn bar(&self) -> &ProgressBar {
        &self.bar
    }

    pub fn start_page(&mut self, url: &str) {
        self.page_started = Instant::now();
        self.bar.set_message(url.to_string());
    }

    pub fn page_elapsed(&self) -> Duration {
        self.page_started.elapsed()
    }

    /// Record a fully processed page: append its log row and update counters.
    pub fn log_page(&mut self, report: &PageReport) -> Result<()> {
        self.stats.processed += 1;
        self.run_processed += 1;
        match report.status {
            PageStatus::Success => {
                self.stats.success_count += 1;
                self.stats.total_records += report.records_collected;
            }
            PageStatus::Failed => self.stats.failure_count += 1,
        }

        let row = [
            report.url.clone(),
            report.status.as_str().to_string(),
            report.records_collected.to_string(),
            report.scrolls_performed.to_string(),
            report.error_message.clone().unwrap_or_default(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            format_duration(report.duration),
        ];
        self.log.write_record(&row)?;
        self.log
            .flush()
            .map_err(|e| BatchError::persistence(format!("progress log {}", self.log_path.display()), e))?;

        self.display_page(report);
        Ok(())
    }

    /// Estimated time left at the current average page duration.
    pub fn eta(&self) -> Option<Duration> {
        if self.run_processed == 0 {
            return None;
        }
        let remaining = self.total_pages.saturating_sub(self.stats.processed) as u32;
        let average = self.started.elapsed() / self.run_processed as u32;
        Some(average * remaining)
    }

    fn display_page(&self, report: &PageReport) {
        self.bar.inc(1);

        let line = match report.status {
            PageStatus::Success => format!(
                "{} Page {}/{}: {} records, {} scrolls ({}) in {}",
                "✓".green(),
                report.index + 1,
                self.total_pages,
                report.records_collected,
                report.scrolls_performed,
                report
                    .reason
                    .map(|r| r.as_str())
                    .unwrap_or("-"),
                format_duration(report.duration)
            ),
            PageStatus::Failed => format!(
                "{} Page {}/{} failed: {}",
                "✗".red(),
                report.index + 1,
                self.total_pages,
                report.error_message.as_deref().unwrap_or("unknown error")
            ),
        };
        self.bar.println(line);

        let eta = self
            .eta()
            .map(format_duration)
            .unwrap_or_else(|| "-".to_string());
        self.bar.set_message(format!(
            "records: {} | ok: {} | failed: {} | ETA: {}",
            self.stats.total_records, self.stats.success_count, self.stats.failure_count, eta
        ));
    }

    /// Stop the progress bar and print the final summary.
    pub fn finish(&self) {
        self.bar.finish_and_clear();

        let elapsed = self.started.elapsed();
        let average = if self.run_processed > 0 {
            elapsed / self.run_processed as u32
        } else {
            Duration::ZERO
        };
        let rule = "═".repeat(80);

        println!("\n{}", rule.blue());
        println!("{}", "                    FINAL SUMMARY".blue().bold());
        println!("{}", rule.blue());
        println!(
            "  Total pages processed: {}/{}",
            self.stats.processed, self.total_pages
        );
        println!("  {} Successful: {}", "✓".green(), self.stats.success_count);
        println!("  {} Failed: {}", "✗".red(), self.stats.failure_count);
        println!(
            "  {}",
            format!("Total records collected: {}", self.stats.total_records).cyan()
        );
        println!("  Total duration: {}", format_duration(elapsed));
        println!("  Average per page: {}", format_duration(average));
        println!("{}\n", rule.blue());
    }
}
