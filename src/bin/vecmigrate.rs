/*
 * Copyright 2025 Vijaykumar Singh
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Vecmigrate CLI - dump legacy collections and bulk-load them into the target database

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vecmigrate::{HttpBulkInsertClient, Migration, MigrationConfig};

#[derive(Parser)]
#[command(name = "vecmigrate")]
#[command(about = "Migrate legacy vector collections into a bulk-insert capable vector database")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct JobArgs {
    #[arg(short, long, default_value = "migration.toml")]
    config: PathBuf,

    /// Job id reported in the status; generated when omitted
    #[arg(short, long)]
    job_id: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode legacy sources into numpy files only
    Dump(JobArgs),
    /// Bulk-load a previously dumped output directory
    Load(JobArgs),
    /// Dump and load in one run
    Start(JobArgs),
}

impl Commands {
    fn args(&self) -> &JobArgs {
        match self {
            Commands::Dump(args) | Commands::Load(args) | Commands::Start(args) => args,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Commands::Dump(_) => "dump",
            Commands::Load(_) => "load",
            Commands::Start(_) => "start",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let args = cli.command.args();

    let config = MigrationConfig::from_file(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .init();

    info!("🚀 Starting vecmigrate {} with config {}", cli.command.name(), args.config.display());

    let client = Arc::new(HttpBulkInsertClient::new(&config.target.database)?);
    let migration = Migration::new(config, client, args.job_id.clone());

    let cancel = migration.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received shutdown signal, cancelling migration...");
            cancel.cancel();
        }
    });

    let result = match &cli.command {
        Commands::Dump(_) => migration.dump().await,
        Commands::Load(_) => migration.load().await,
        Commands::Start(_) => migration.run().await,
    };

    let status = migration.status();
    println!("{}", serde_json::to_string_pretty(&status)?);

    match result {
        Ok(_) => {
            info!("✅ Migration job {} finished", status.job_id);
            Ok(())
        }
        Err(e) => {
            error!("❌ Migration job {} failed: {}", status.job_id, e);
            Err(e.into())
        }
    }
}
