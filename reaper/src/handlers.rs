use anyhow::{Context, Result, anyhow, bail};
use clap::ArgMatches;
use colored::Colorize;
use reaper_core::batch::{BatchOptions, BatchOutcome, BatchReport, BatchRunner, BatchSinks};
use reaper_core::checkpoint::CheckpointStore;
use reaper_core::export::{CsvSink, OutputFormat, RecordSink, SqliteSink};
use reaper_core::input::{self, TargetPage};
use reaper_core::probe::{AssetProbe, ProbeOptions, read_probe_targets};
use reaper_core::progress::ProgressTracker;
use reaper_core::session::{Credentials, LoginFlow, SessionManager};
use reaper_scanner::browser::chrome::{ChromeConfig, ChromeLauncher};
use reaper_scanner::{
    CancelFlag, DedupScope, ExtractorProfile, HarvestSettings, HeuristicExtractor, PacingPolicy,
    RetryPolicy, ScrollHarvester, SizeTag,
};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Expand `~` and environment variables in a path option.
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(&raw).as_ref()),
    }
}

/// Load target pages from either a list file or a single URL argument
pub fn load_targets_from_source(
    url: Option<&Url>,
    input_file: Option<&PathBuf>,
) -> Result<Vec<TargetPage>> {
    if let Some(path) = input_file {
        let path = expand_path(path);
        let list = input::load_targets(&path)?;
        if !list.skipped.is_empty() {
            println!(
                "{} Skipped {} invalid row(s) in {}",
                "⚠".yellow(),
                list.skipped.len(),
                path.display()
            );
        }
        Ok(list.pages)
    } else if let Some(url) = url {
        Ok(vec![TargetPage {
            url: url.as_str().to_string(),
        }])
    } else {
        Err(anyhow!("Either --input or --url must be provided"))
    }
}

/// Pacing and stopping rules for the scroll loop.
pub fn harvest_settings_from(args: &ArgMatches) -> HarvestSettings {
    let pacing = PacingPolicy {
        step_distance_px: arg_or(args, "scroll-step-px", 200),
        step_pause: Duration::from_millis(arg_or(args, "step-pause-ms", 200)),
        load_wait: Duration::from_millis(arg_or(args, "load-wait-ms", 4000)),
        jitter: Duration::from_millis(arg_or(args, "jitter-ms", 0)),
        ..Default::default()
    };
    HarvestSettings {
        max_scroll_attempts: arg_or(args, "max-scroll-attempts", -1),
        no_new_content_limit: arg_or(args, "no-new-content-limit", 3),
        pacing,
    }
}

pub fn batch_options_from(args: &ArgMatches) -> BatchOptions {
    let defaults = BatchOptions::default();
    let dedup_scope = args
        .get_one::<String>("dedup-scope")
        .and_then(|s| s.parse::<DedupScope>().ok())
        .unwrap_or_default();

    BatchOptions {
        checkpoint_interval: arg_or(args, "checkpoint-interval", defaults.checkpoint_interval),
        continue_on_error: arg_or(args, "continue-on-error", defaults.continue_on_error),
        resume: args.get_flag("resume"),
        start_index: arg_or(args, "start-index", defaults.start_index),
        limit: args.get_one::<usize>("limit").copied(),
        navigation_retry: RetryPolicy::new(
            arg_or(args, "nav-retries", defaults.navigation_retry.attempts),
            defaults.navigation_retry.base_delay,
        ),
        navigation_timeout: Duration::from_secs(arg_or(
            args,
            "nav-timeout",
            defaults.navigation_timeout.as_secs(),
        )),
        dedup_scope,
    }
}

/// Login credentials, only when both halves are present.
pub fn credentials_from(args: &ArgMatches) -> Option<Credentials> {
    let email = args.get_one::<String>("email")?;
    let password = args.get_one::<String>("password")?;
    if email.trim().is_empty() || password.is_empty() {
        return None;
    }
    Some(Credentials {
        email: email.trim().to_string(),
        password: password.clone(),
    })
}

fn arg_or<T: Clone + Send + Sync + 'static>(args: &ArgMatches, name: &str, default: T) -> T {
    args.get_one::<T>(name).cloned().unwrap_or(default)
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

/// Trip `cancel` on the first interrupt. Returns true once a second one
/// arrives; false if the signal source gives out first.
pub async fn watch_interrupts<F, Fut>(cancel: &CancelFlag, mut next_interrupt: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    if !next_interrupt().await {
        return false;
    }
    eprintln!(
        "\n{} Interrupt received; finishing the current step and saving progress...",
        "⚠".yellow().bold()
    );
    eprintln!("  Press Ctrl-C again to exit immediately.");
    cancel.cancel();

    if !next_interrupt().await {
        return false;
    }
    eprintln!("{} Second interrupt; exiting without saving", "✗".red().bold());
    true
}

fn install_interrupt_handler(cancel: CancelFlag) {
    tokio::spawn(async move {
        let forced = watch_interrupts(&cancel, || async {
            tokio::signal::ctrl_c().await.is_ok()
        })
        .await;
        if forced {
            std::process::exit(130);
        }
    });
}

pub async fn handle_harvest(args: &ArgMatches) -> Result<()> {
    let pages = load_targets_from_source(
        args.get_one::<Url>("url"),
        args.get_one::<PathBuf>("input"),
    )?;

    let output_dir = expand_path(
        args.get_one::<PathBuf>("output-dir")
            .map(PathBuf::as_path)
            .unwrap_or(Path::new("./output")),
    );
    let checkpoint_dir = expand_path(
        args.get_one::<PathBuf>("checkpoint-dir")
            .map(PathBuf::as_path)
            .unwrap_or(Path::new("./checkpoints")),
    );
    let format = args
        .get_one::<String>("format")
        .map(|f| OutputFormat::from_str(f))
        .transpose()
        .map_err(|e| anyhow!(e))?
        .unwrap_or(OutputFormat::Csv);

    let settings = harvest_settings_from(args);
    let options = batch_options_from(args);
    let restart_interval = arg_or(args, "browser-restart-interval", 50usize);
    let show_progress = !args.get_flag("no-progress");

    print_divider();
    println!("{}", "  REAPER HARVEST".bright_white().bold());
    print_divider();
    println!("{} Pages: {}", "→".blue(), pages.len().to_string().bright_white());
    println!("{} Output: {} ({})", "→".blue(), output_dir.display(), format.as_str());
    println!("{} Checkpoints: {}", "→".blue(), checkpoint_dir.display());
    println!(
        "{} Scroll cap: {} | plateau limit: {} | dedup: {:?}",
        "→".blue(),
        settings.scroll_cap(),
        settings.exhaustion_limit(),
        options.dedup_scope
    );
    println!();

    let profile = ExtractorProfile::default();
    let size_tags: Vec<SizeTag> = profile.size_tags.clone();
    let extractor = HeuristicExtractor::new(profile).context("Invalid extractor profile")?;

    let mut tracker = ProgressTracker::new(&output_dir, pages.len(), show_progress)?;
    let bar = tracker.bar().clone();
    let cancel = CancelFlag::new();
    install_interrupt_handler(cancel.clone());

    let harvester = ScrollHarvester::new(Arc::new(extractor), settings.clone())
        .with_cancel_flag(cancel)
        .with_progress_callback(Arc::new(move |scroll: u32, records: usize| {
            bar.set_message(format!("scroll {} | {} records on page", scroll, records));
        }));

    let mut sink: Box<dyn RecordSink> = match format {
        OutputFormat::Csv => Box::new(CsvSink::create(&output_dir, &size_tags)?),
        OutputFormat::Sqlite => {
            let db_path = args
                .get_one::<PathBuf>("db-path")
                .map(|p| expand_path(p))
                .unwrap_or_else(|| output_dir.join("reaper.db"));
            let configuration = serde_json::json!({
                "max_scroll_attempts": settings.max_scroll_attempts,
                "no_new_content_limit": settings.no_new_content_limit,
                "checkpoint_interval": options.checkpoint_interval,
                "dedup_scope": format!("{:?}", options.dedup_scope),
            })
            .to_string();
            Box::new(SqliteSink::open(&db_path, pages.len(), Some(&configuration))?)
        }
    };
    info!("Writing records to {}", sink.location());

    let chrome = ChromeConfig {
        headless: arg_or(args, "headless", true),
        executable: args.get_one::<PathBuf>("chrome-path").map(|p| expand_path(p)),
        request_timeout: options.navigation_timeout,
        ..Default::default()
    };
    let mut sessions = SessionManager::new(
        ChromeLauncher::new(chrome),
        RetryPolicy::new(options.navigation_retry.attempts, RetryPolicy::default().base_delay),
    )
    .with_restart_interval(restart_interval);
    match credentials_from(args) {
        Some(credentials) => {
            let login_url = args
                .get_one::<Url>("login-url")
                .map(|u| u.as_str().to_string())
                .unwrap_or_else(|| "https://www.pinterest.com/login/".to_string());
            sessions = sessions.with_login(LoginFlow::new(login_url), credentials);
        }
        None => warn!("No credentials configured; harvesting without logging in"),
    }

    let runner = BatchRunner::new(harvester, CheckpointStore::new(&checkpoint_dir), options);
    let result = runner
        .run(
            &pages,
            &mut sessions,
            BatchSinks {
                records: sink.as_mut(),
                tracker: &mut tracker,
            },
        )
        .await;
    tracker.finish();

    let report = result.context("Harvest aborted")?;
    print_outcome(&report, sink.as_ref());

    if let BatchOutcome::StoppedOnError { index, url, message } = report.outcome {
        bail!("Stopped at page {} ({}): {}", index, url, message);
    }
    Ok(())
}

fn print_outcome(report: &BatchReport, sink: &dyn RecordSink) {
    println!("  Records: {}", sink.location().bright_white());
    if let Some(ref checkpoint) = report.last_checkpoint {
        println!(
            "  Last checkpoint: page index {} ({} records so far)",
            checkpoint.last_processed_index, checkpoint.total_records_collected
        );
    }
    match report.outcome {
        BatchOutcome::Completed => {
            println!("\n{} Harvest complete!", "✓".green().bold());
        }
        BatchOutcome::Cancelled => {
            println!(
                "\n{} Harvest cancelled. Re-run with --resume to continue.",
                "⚠".yellow().bold()
            );
        }
        BatchOutcome::StoppedOnError { .. } => {
            println!(
                "\n{} Harvest stopped on the first failed page (--continue-on-error false).",
                "✗".red().bold()
            );
        }
    }
}

pub fn handle_validate(args: &ArgMatches) -> Result<()> {
    let path = args
        .get_one::<PathBuf>("FILE")
        .map(|p| expand_path(p))
        .ok_or_else(|| anyhow!("A target list is required"))?;

    let report = input::validate(&path);
    for row in &report.skipped {
        println!(
            "  {} line {}: {}",
            "•".yellow(),
            row.line,
            row.content.bright_white()
        );
    }
    for error in &report.errors {
        println!("  {} {}", "✗".red(), error);
    }

    if !report.is_valid() {
        bail!("{} is not a usable target list", path.display());
    }
    println!(
        "{} {} valid URL(s), {} skipped",
        "✓".green().bold(),
        report.valid_count.to_string().bright_white(),
        report.skipped.len()
    );
    Ok(())
}

pub async fn handle_probe(args: &ArgMatches) -> Result<()> {
    let path = args
        .get_one::<PathBuf>("FILE")
        .map(|p| expand_path(p))
        .ok_or_else(|| anyhow!("A record file is required"))?;
    let tag = SizeTag::new(
        args.get_one::<String>("size")
            .map(String::as_str)
            .unwrap_or("originals"),
    );

    let targets = read_probe_targets(&path, &tag)?;
    if targets.is_empty() {
        bail!("No asset_{} urls found in {}", tag, path.display());
    }

    let options = ProbeOptions {
        limit: args.get_one::<usize>("limit").copied(),
        save_dir: args.get_one::<PathBuf>("save-dir").map(|p| expand_path(p)),
        pause: Duration::from_millis(arg_or(args, "pause-ms", 50)),
        timeout: Duration::from_secs(arg_or(args, "timeout", 10)),
        ..Default::default()
    };
    let probe = AssetProbe::new(options)?;
    let report = probe.run(&targets).await?;

    print_divider();
    println!("{}", "  PROBE RESULTS".bright_white().bold());
    print_divider();
    println!("  Attempted: {}", report.attempted);
    println!("  {} Succeeded: {}", "✓".green(), report.succeeded);
    println!("  {} Failed: {}", "✗".red(), report.failed);
    for (reason, count) in &report.failures {
        println!("      {}: {}", reason, count);
    }
    println!("  Success rate: {:.1}%", report.success_rate());
    println!(
        "  Time: {:.1}s ({:.1} requests/s)",
        report.elapsed.as_secs_f64(),
        report.per_second()
    );
    println!("\n  Verdict: {}", report.verdict().describe().bright_white());
    Ok(())
}

pub fn handle_checkpoint(args: &ArgMatches) -> Result<()> {
    let dir = expand_path(
        args.get_one::<PathBuf>("DIR")
            .map(PathBuf::as_path)
            .unwrap_or(Path::new("./checkpoints")),
    );
    let store = CheckpointStore::new(&dir);

    match store.load_latest()? {
        Some(checkpoint) => {
            println!("{} Latest checkpoint in {}", "✓".green().bold(), dir.display());
            println!("  Last processed index: {}", checkpoint.last_processed_index);
            println!("  Next index: {}", checkpoint.next_index());
            println!("  Successful pages: {}", checkpoint.success_count);
            println!("  Failed pages: {}", checkpoint.failure_count);
            println!("  Records collected: {}", checkpoint.total_records_collected);
            println!("  Written: {}", checkpoint.timestamp.to_rfc3339());
        }
        None => println!("{} No checkpoint in {}", "→".blue(), dir.display()),
    }
    Ok(())
}
