// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Archived history reader.
//!
//! `taskbook-archive get` follows continuation tokens until the end of the
//! history and prints each batch as one JSON line.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use taskbook_archiver::{
    ArchiveUri, ArchiverConfig, FileArchivalStore, GetHistoryRequest, HistoryArchiver,
};

#[derive(Parser, Debug)]
#[command(name = "taskbook-archive")]
#[command(about = "Read workflow histories from a taskbook archive")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print an archived history
    Get {
        /// Archive URI (e.g., file://histories/prod)
        uri: String,
        /// Namespace ID
        #[arg(long)]
        namespace_id: String,
        /// Workflow ID
        #[arg(long)]
        workflow_id: String,
        /// Run ID
        #[arg(long)]
        run_id: String,
        /// Read this close failover version instead of the highest
        #[arg(long)]
        close_failover_version: Option<i64>,
        /// Minimum events per request (default: history page size)
        #[arg(long)]
        page_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries the history.
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("taskbook_archiver=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = ArchiverConfig::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    let archiver = HistoryArchiver::new(Arc::new(FileArchivalStore::new(&config.root)))
        .with_scheme(config.scheme.clone())
        .with_target_blob_size(config.target_blob_size);

    match args.command {
        Command::Get {
            uri,
            namespace_id,
            workflow_id,
            run_id,
            close_failover_version,
            page_size,
        } => {
            let uri = ArchiveUri::parse(&uri)?;
            let mut request = GetHistoryRequest {
                namespace_id,
                workflow_id,
                run_id,
                close_failover_version,
                next_page_token: None,
                page_size: page_size.unwrap_or(config.history_page_size),
            };

            let mut stdout = io::stdout().lock();
            let mut batches = 0usize;
            loop {
                let response = archiver.get(&uri, &request).await?;
                for batch in &response.history_batches {
                    serde_json::to_writer(&mut stdout, batch)?;
                    writeln!(stdout)?;
                    batches += 1;
                }
                match response.next_page_token {
                    Some(token) => request.next_page_token = Some(token),
                    None => break,
                }
            }
            stdout.flush()?;
            info!(batches, "History read complete");
        }
    }

    Ok(())
}
