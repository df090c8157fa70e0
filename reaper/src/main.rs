use colored::Colorize;
use reaper::commands::command_argument_builder;
use reaper::handlers::{handle_checkpoint, handle_harvest, handle_probe, handle_validate};
use reaper_core::print_banner;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    // A missing .env is fine; settings then come from flags and the environment
    let _ = dotenvy::dotenv();

    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    if chosen_command.subcommand().is_none() {
        // No subcommand provided, just show the banner
        return;
    }

    init_tracing(chosen_command.get_flag("verbose"));

    let result = match chosen_command.subcommand() {
        Some(("harvest", primary_command)) => handle_harvest(primary_command).await,
        Some(("validate", primary_command)) => handle_validate(primary_command),
        Some(("probe", primary_command)) => handle_probe(primary_command).await,
        Some(("checkpoint", primary_command)) => handle_checkpoint(primary_command),
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}
