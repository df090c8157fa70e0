use crate::CLAP_STYLING;
use clap::{arg, command};
use url::Url;

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("reaper")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("reaper")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .arg(
            arg!(-v --"verbose" "Log debug output (overridden by RUST_LOG)")
                .required(false)
                .global(true),
        )
        .subcommand_required(false)
        .subcommand(
            command!("harvest")
                .about(
                    "Harvest every page of a target list, scrolling each until it stops \
                producing new records.",
                )
                .arg(
                    arg!(-i --"input" <PATH>)
                        .required(false)
                        .help("CSV target list (header row, URL in the first column)")
                        .env("REAPER_INPUT")
                        .value_parser(clap::value_parser!(std::path::PathBuf))
                        .conflicts_with("url"),
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(false)
                        .help("Harvest a single page instead of a list")
                        .value_parser(clap::value_parser!(Url))
                        .conflicts_with("input"),
                )
                .arg(
                    arg!(-o --"output-dir" <PATH>)
                        .required(false)
                        .help("Where record files and the progress log are written")
                        .env("REAPER_OUTPUT_DIR")
                        .value_parser(clap::value_parser!(std::path::PathBuf))
                        .default_value("./output"),
                )
                .arg(
                    arg!(--"checkpoint-dir" <PATH>)
                        .required(false)
                        .help("Where checkpoints are written and resumed from")
                        .env("REAPER_CHECKPOINT_DIR")
                        .value_parser(clap::value_parser!(std::path::PathBuf))
                        .default_value("./checkpoints"),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Record output: csv or sqlite")
                        .env("REAPER_FORMAT")
                        .value_parser(["csv", "sqlite"])
                        .default_value("csv"),
                )
                .arg(
                    arg!(--"db-path" <PATH>)
                        .required(false)
                        .help("SQLite database file (default: <output-dir>/reaper.db)")
                        .env("REAPER_DB_PATH")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"checkpoint-interval" <PAGES>)
                        .required(false)
                        .help("Write a checkpoint after every N pages")
                        .env("REAPER_CHECKPOINT_INTERVAL")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("10"),
                )
                .arg(
                    arg!(--"browser-restart-interval" <PAGES>)
                        .required(false)
                        .help("Restart the browser after N pages (0 = never)")
                        .env("REAPER_BROWSER_RESTART_INTERVAL")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("50"),
                )
                .arg(
                    arg!(--"nav-retries" <ATTEMPTS>)
                        .required(false)
                        .help("Navigation attempts per page (also used for login)")
                        .env("REAPER_NAV_RETRIES")
                        .value_parser(clap::value_parser!(u32))
                        .default_value("3"),
                )
                .arg(
                    arg!(--"nav-timeout" <SECONDS>)
                        .required(false)
                        .help("Navigation timeout in seconds")
                        .env("REAPER_NAV_TIMEOUT")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("30"),
                )
                .arg(
                    arg!(--"continue-on-error" <BOOL>)
                        .required(false)
                        .help("Keep going after a page fails")
                        .env("REAPER_CONTINUE_ON_ERROR")
                        .value_parser(clap::value_parser!(bool))
                        .default_value("true"),
                )
                .arg(
                    arg!(--"max-scroll-attempts" <CYCLES>)
                        .required(false)
                        .help("Scroll cycles per page; negative scrolls until exhausted")
                        .env("REAPER_MAX_SCROLL_ATTEMPTS")
                        .value_parser(clap::value_parser!(i64))
                        .allow_negative_numbers(true)
                        .default_value("-1"),
                )
                .arg(
                    arg!(--"no-new-content-limit" <CYCLES>)
                        .required(false)
                        .help("Consecutive cycles without new records that end a page")
                        .env("REAPER_NO_NEW_CONTENT_LIMIT")
                        .value_parser(clap::value_parser!(u32))
                        .default_value("3"),
                )
                .arg(
                    arg!(--"dedup-scope" <SCOPE>)
                        .required(false)
                        .help("Drop repeated ids per page or across the whole batch")
                        .env("REAPER_DEDUP_SCOPE")
                        .value_parser(["page", "batch"])
                        .default_value("page"),
                )
                .arg(
                    arg!(--"resume")
                        .required(false)
                        .help("Continue after the latest checkpoint")
                        .env("REAPER_RESUME")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"start-index" <INDEX>)
                        .required(false)
                        .help("Skip pages before this index")
                        .env("REAPER_START_INDEX")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("0"),
                )
                .arg(
                    arg!(--"limit" <PAGES>)
                        .required(false)
                        .help("Process at most N pages")
                        .env("REAPER_LIMIT")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"headless" <BOOL>)
                        .required(false)
                        .help("Run the browser without a window")
                        .env("REAPER_HEADLESS")
                        .value_parser(clap::value_parser!(bool))
                        .default_value("true"),
                )
                .arg(
                    arg!(--"chrome-path" <PATH>)
                        .required(false)
                        .help("Browser executable (default: auto-detect)")
                        .env("REAPER_CHROME_PATH")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"login-url" <URL>)
                        .required(false)
                        .help("Login page used when credentials are given")
                        .env("REAPER_LOGIN_URL")
                        .value_parser(clap::value_parser!(Url))
                        .default_value("https://www.pinterest.com/login/"),
                )
                .arg(
                    arg!(--"email" <EMAIL>)
                        .required(false)
                        .help("Account email; login is skipped without credentials")
                        .env("REAPER_EMAIL")
                        .requires("password"),
                )
                .arg(
                    arg!(--"password" <PASSWORD>)
                        .required(false)
                        .help("Account password")
                        .env("REAPER_PASSWORD")
                        .hide_env_values(true)
                        .requires("email"),
                )
                .arg(
                    arg!(--"scroll-step-px" <PX>)
                        .required(false)
                        .help("Pixels per scroll step")
                        .env("REAPER_SCROLL_STEP_PX")
                        .value_parser(clap::value_parser!(u32))
                        .default_value("200"),
                )
                .arg(
                    arg!(--"step-pause-ms" <MS>)
                        .required(false)
                        .help("Pause after each scroll step")
                        .env("REAPER_STEP_PAUSE_MS")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("200"),
                )
                .arg(
                    arg!(--"load-wait-ms" <MS>)
                        .required(false)
                        .help("Wait for new content at the end of each scroll cycle")
                        .env("REAPER_LOAD_WAIT_MS")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("4000"),
                )
                .arg(
                    arg!(--"jitter-ms" <MS>)
                        .required(false)
                        .help("Random extra delay added to every pause, up to this bound")
                        .env("REAPER_JITTER_MS")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("0"),
                )
                .arg(
                    arg!(--"no-progress")
                        .required(false)
                        .help("Hide the progress bar")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            command!("validate")
                .about("Check a target list without harvesting it")
                .arg(
                    arg!(<FILE>)
                        .help("CSV target list")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                ),
        )
        .subcommand(
            command!("probe")
                .about("Try downloading the asset urls of an exported record file")
                .arg(
                    arg!(<FILE>)
                        .help("Record CSV written by `reaper harvest`")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(-s --"size" <TAG>)
                        .required(false)
                        .help("Which asset column to fetch, e.g. originals or 236x")
                        .default_value("originals"),
                )
                .arg(
                    arg!(-l --"limit" <COUNT>)
                        .required(false)
                        .help("Only probe the first N records")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"save-dir" <PATH>)
                        .required(false)
                        .help("Save downloaded assets here as <id>.<ext>")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"pause-ms" <MS>)
                        .required(false)
                        .help("Pause between requests")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("50"),
                )
                .arg(
                    arg!(--"timeout" <SECONDS>)
                        .required(false)
                        .help("Request timeout in seconds")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("10"),
                ),
        )
        .subcommand(
            command!("checkpoint")
                .about("Show the latest checkpoint in a directory")
                .arg(
                    arg!([DIR])
                        .required(false)
                        .help("Checkpoint directory")
                        .env("REAPER_CHECKPOINT_DIR")
                        .value_parser(clap::value_parser!(std::path::PathBuf))
                        .default_value("./checkpoints"),
                ),
        )
}
