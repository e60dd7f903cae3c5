// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! kbvec - operator tool for knowledge-base collections

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kbvec::services::SchemaCheck;
use kbvec::{Config, MediaType, RetrievalService, SearchFilter, SearchOptions, TimeRange};

#[derive(Parser)]
#[command(name = "kbvec")]
#[command(about = "Inspect, migrate and query knowledge-base vector collections")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Snapshot directory, overrides storage.data_dir
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report whether a knowledge base needs migration
    Check {
        kb_id: String,
    },
    /// Migrate a knowledge base to the current schema
    Migrate {
        kb_id: String,
        /// Defaults to the collection's own dimension
        #[arg(short, long)]
        dimension: Option<usize>,
    },
    /// Show collection shape and row count
    Stats {
        kb_id: String,
    },
    /// Delete every vector of the given files
    DeleteFiles {
        kb_id: String,
        #[arg(required = true)]
        file_ids: Vec<String>,
    },
    /// Search one or more knowledge bases
    Search {
        /// Comma-separated knowledge-base ids
        #[arg(short, long, value_delimiter = ',', required = true)]
        kb: Vec<String>,
        /// Query vectors as a JSON array of arrays
        #[arg(short, long)]
        query: String,
        #[arg(short = 'k', long, default_value_t = 10)]
        top_k: usize,
        #[arg(long)]
        media_type: Option<String>,
        #[arg(long, requires = "end")]
        start: Option<f64>,
        #[arg(long, requires = "start")]
        end: Option<f64>,
        #[arg(long)]
        min_score: Option<f32>,
        #[arg(long)]
        max_score: Option<f32>,
    },
    /// Reload rows from a migration backup file
    Restore {
        kb_id: String,
        #[arg(short, long)]
        file: PathBuf,
        /// Defaults to the collection's own dimension
        #[arg(short, long)]
        dimension: Option<usize>,
    },
    /// Drop a knowledge base's collection
    Drop {
        kb_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = Some(dir);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    if config.storage.data_dir.is_none() {
        info!("no data directory configured, collections are in-memory for this run");
    }
    let service = RetrievalService::from_config(config).await?;

    match cli.command {
        Commands::Check { kb_id } => {
            let check = service.check(&kb_id).await?;
            match &check {
                SchemaCheck::Missing => println!("{kb_id}: collection does not exist"),
                SchemaCheck::Compatible => println!("{kb_id}: schema is current"),
                SchemaCheck::NeedsMigration { missing_fields } => {
                    println!("{kb_id}: migration needed, missing {}", missing_fields.join(", "))
                }
            }
        }
        Commands::Migrate { kb_id, dimension } => {
            let dimension = match dimension {
                Some(dimension) => dimension,
                None => service.store(&kb_id).await?.dimension(),
            };
            let report = service.migrate(&kb_id, dimension).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                bail!("migration of {} did not validate", report.collection);
            }
        }
        Commands::Stats { kb_id } => {
            let stats = service.stats(&kb_id).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::DeleteFiles { kb_id, file_ids } => {
            let removed = service.delete_files(&kb_id, &file_ids).await?;
            println!("removed {removed} vectors");
        }
        Commands::Search {
            kb,
            query,
            top_k,
            media_type,
            start,
            end,
            min_score,
            max_score,
        } => {
            let queries: Vec<Vec<f32>> =
                serde_json::from_str(&query).context("query must be a JSON array of float arrays")?;

            let mut filter = SearchFilter::default();
            if let Some(media_type) = media_type {
                filter.media_type = Some(media_type.parse::<MediaType>()?);
            }
            if let (Some(start), Some(end)) = (start, end) {
                filter.time_range = Some(TimeRange::new(start, end)?);
            }
            let options = SearchOptions::top_k(top_k)
                .with_filter(filter)
                .with_score_range(min_score, max_score);

            let results = service.search(&kb, &queries, &options).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Commands::Restore { kb_id, file, dimension } => {
            let dimension = match dimension {
                Some(dimension) => dimension,
                None => service.store(&kb_id).await?.dimension(),
            };
            let report = service.restore_from_backup(&kb_id, dimension, &file).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Drop { kb_id } => {
            if service.drop_knowledge_base(&kb_id).await? {
                println!("dropped {kb_id}");
            } else {
                println!("{kb_id} has no collection");
            }
        }
    }

    service.close().await?;
    Ok(())
}
