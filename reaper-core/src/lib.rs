pub mod batch;
pub mod checkpoint;
pub mod error;
pub mod export;
pub mod input;
pub mod probe;
pub mod progress;
pub mod session;

pub use batch::{BatchOptions, BatchOutcome, BatchReport, BatchRunner, BatchSinks};
pub use checkpoint::{BatchStats, Checkpoint, CheckpointStore};
pub use error::BatchError;
pub use export::{CsvSink, OutputFormat, RecordSink, RunStatus, SqliteSink};
pub use input::{TargetList, TargetPage};
pub use progress::{ProgressTracker, format_duration};
pub use session::{Credentials, LoginFlow, SessionManager};

use colored::Colorize;

const BANNER: &str = r#"
    ╔═══════════════════════════════════════════════════╗
    ║  ██████╗ ███████╗ █████╗ ██████╗ ███████╗██████╗  ║
    ║  ██╔══██╗██╔════╝██╔══██╗██╔══██╗██╔════╝██╔══██╗ ║
    ║  ██████╔╝█████╗  ███████║██████╔╝█████╗  ██████╔╝ ║
    ║  ██╔══██╗██╔══╝  ██╔══██║██╔═══╝ ██╔══╝  ██╔══██╗ ║
    ║  ██║  ██║███████╗██║  ██║██║     ███████╗██║  ██║ ║
    ║  ╚═╝  ╚═╝╚══════╝╚═╝  ╚═╝╚═╝     ╚══════╝╚═╝  ╚═╝ ║
    ╚═══════════════════════════════════════════════════╝
"#;

pub fn print_banner() {
    println!("{}", BANNER.bright_blue());
    println!(
        "    {} v{}\n",
        "infinite-scroll harvester".bright_cyan(),
        env!("CARGO_PKG_VERSION")
    );
}
