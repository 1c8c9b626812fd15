mod cache;
mod cli;
mod cluster;
mod config;
mod data;
mod error;
mod filter;
mod label;
mod logging;
mod pipeline;
mod project;
mod render;
mod text;

pub(crate) use error::{AppError, AppResult};

use clap::{ColorChoice, Parser};
use std::process::exit;
use tracing::error;

use crate::cli::{Cli, GetVerbosity};

fn main() {
    let cli = Cli::parse();
    logging::setup_logger(
        cli.cmd.get_verbosity().tracing_level_filter(),
        cli.color != ColorChoice::Never,
    );

    if let Err(e) = cli.cmd.run() {
        error!("{e}");
        exit(1);
    }
}
