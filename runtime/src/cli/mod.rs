//! CLI subcommand implementations for the `pricewatch` binary.

pub mod acquire_cmd;
pub mod context;
pub mod daemon;
pub mod output;
pub mod providers_cmd;
pub mod refresh_cmd;
pub mod show_cmd;
