//! geonotes CLI - pin notes to places from the terminal
//!
//! Edits land in the local cache first and reach the remote store whenever
//! it can be reached.

mod backend;
mod cli;
mod commands;
mod error;


use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::backend::Context;
use crate::cli::{Cli, Commands, SyncCommands};
use crate::commands::add::run_add;
use crate::commands::config::run_config;
use crate::commands::delete::run_delete;
use crate::commands::edit::{run_edit, run_move};
use crate::commands::export::run_export;
use crate::commands::list::{build_filter, run_list, run_show, ListOptions};
use crate::commands::reset::run_reset;
use crate::commands::status::run_status;
use crate::commands::sync::{
    run_sync, run_sync_conflicts, run_sync_drop, run_sync_pending, run_sync_resolve,
    run_sync_watch,
};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "error",
        1 => "geonotes_core=info,geonotes=info",
        _ => "geonotes_core=debug,geonotes=debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let context = Context::resolve(cli.db_path, cli.config)?;

    if let Commands::Config { command } = cli.command {
        return run_config(command, &context);
    }

    let notes = context.open_notes()?;
    match cli.command {
        Commands::Add {
            lat,
            lon,
            accuracy,
            content,
        } => run_add(&content, lat, lon, accuracy, &notes).await?,
        Commands::List {
            limit,
            search,
            since,
            until,
            near,
            group,
            refresh,
            json,
        } => {
            let options = ListOptions {
                limit,
                filter: build_filter(search, since.as_deref(), until.as_deref(), near)?,
                group,
                refresh,
                json,
            };
            run_list(&options, &notes).await?;
        }
        Commands::Show { id, json } => run_show(&id, json, &notes)?,
        Commands::Edit { id, content } => run_edit(&id, &content, &notes).await?,
        Commands::Move {
            id,
            lat,
            lon,
            accuracy,
        } => run_move(&id, lat, lon, accuracy, &notes).await?,
        Commands::Delete { id } => run_delete(&id, &notes).await?,
        Commands::Export { format, output } => run_export(format, output.as_deref(), &notes)?,
        Commands::Sync { command } => match command {
            None => run_sync(&notes).await?,
            Some(SyncCommands::Watch { interval }) => {
                let interval = interval
                    .map_or_else(|| context.config.sync_interval(), Duration::from_secs);
                run_sync_watch(interval, &notes).await?;
            }
            Some(SyncCommands::Pending { json }) => run_sync_pending(json, &notes)?,
            Some(SyncCommands::Drop { seqs }) => run_sync_drop(&seqs, &notes)?,
            Some(SyncCommands::Conflicts { limit, json }) => {
                run_sync_conflicts(limit, json, &notes)?;
            }
            Some(SyncCommands::Resolve { id, keep }) => {
                run_sync_resolve(&id, keep, &notes).await?;
            }
        },
        Commands::Status { json } => run_status(json, &context, &notes)?,
        Commands::Reset { yes } => run_reset(yes, &notes).await?,
        Commands::Config { .. } => {}
    }

    Ok(())
}
