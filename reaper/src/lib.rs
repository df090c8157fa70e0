// Include handlers module directly from handlers.rs
#[path = "handlers.rs"]
pub mod handlers;

#[path = "commands.rs"]
pub mod commands;

// Re-export commonly used handler functions for convenience
pub use handlers::{
    batch_options_from, credentials_from, expand_path, harvest_settings_from,
    load_targets_from_source,
};

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);
