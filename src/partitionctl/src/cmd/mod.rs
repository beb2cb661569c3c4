// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

mod report;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use partitioner::{
    delete_partitions, load_data,
    memory::MemoryEngine,
    partition_range, partition_round_robin,
    postgres::{PostgresConnection, PostgresOptions},
    Connection, Ident, PartitionReport, RangePartitionRequest, RoundRobinPartitionRequest, Schema,
};
use tracing::{info, warn};

use crate::config::{BackendConfig, Config};

#[derive(Parser, Debug)]
#[command(name = "partitionctl", version)]
#[command(about = "Loads staging tables and splits them into range or round-robin partitions")]
pub struct App {
    /// Config file path, the in-memory backend is used without one
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: SubCommand,
}

fn parse_ident(s: &str) -> std::result::Result<Ident, String> {
    Ident::new(s).map_err(|e| e.to_string())
}

#[derive(Subcommand, Debug)]
pub enum SubCommand {
    /// Bulk load a csv file into a staging table
    Load(LoadArgs),
    /// Recreate a target as range partitions of a staging table
    Range(RangeArgs),
    /// Recreate a target as round-robin partitions of a staging table
    RoundRobin(RoundRobinArgs),
    /// Drop the children of a target
    Reap(ReapArgs),
    /// Load, partition and print row counts per partition in one session
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct LoadArgs {
    #[arg(long, value_parser = parse_ident)]
    pub table: Ident,
    #[arg(long)]
    pub csv: PathBuf,
    /// JSON object of column name to column type, in column order
    #[arg(long)]
    pub manifest: PathBuf,
}

#[derive(Args, Debug)]
pub struct RangeArgs {
    #[arg(long, value_parser = parse_ident)]
    pub source: Ident,
    #[arg(long, value_parser = parse_ident)]
    pub target: Ident,
    #[arg(short = 'n', long)]
    pub partitions: usize,
    #[arg(long, value_parser = parse_ident)]
    pub column: Ident,
    #[arg(long)]
    pub manifest: PathBuf,
}

#[derive(Args, Debug)]
pub struct RoundRobinArgs {
    #[arg(long, value_parser = parse_ident)]
    pub source: Ident,
    #[arg(long, value_parser = parse_ident)]
    pub target: Ident,
    #[arg(short = 'n', long)]
    pub partitions: usize,
    #[arg(long)]
    pub manifest: PathBuf,
}

#[derive(Args, Debug)]
pub struct ReapArgs {
    #[arg(long, value_parser = parse_ident)]
    pub target: Ident,
    #[arg(short = 'n', long)]
    pub partitions: usize,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(long)]
    pub csv: PathBuf,
    #[arg(long)]
    pub manifest: PathBuf,
    #[arg(long, default_value = "staging", value_parser = parse_ident)]
    pub source: Ident,
    #[arg(long, value_parser = parse_ident)]
    pub target: Ident,
    #[arg(short = 'n', long)]
    pub partitions: usize,
    /// Range partition on this column, round-robin when absent
    #[arg(long, value_parser = parse_ident)]
    pub column: Option<Ident>,
}

async fn connect(backend: &BackendConfig) -> Result<Box<dyn Connection>> {
    match backend {
        BackendConfig::Memory => {
            info!("Use in-memory backend, tables are gone when the command exits");
            Ok(Box::new(MemoryEngine::new().connect()))
        }
        BackendConfig::Postgres(config) => {
            let opts = PostgresOptions::from(config);
            Ok(Box::new(PostgresConnection::connect(&opts).await?))
        }
    }
}

/// Runs `cmd` against the configured backend, returns what to print.
pub async fn run(cmd: SubCommand, config: &Config) -> Result<String> {
    if matches!(config.backend, BackendConfig::Memory) && !matches!(cmd, SubCommand::Run(_)) {
        warn!("Only the run command keeps its tables around long enough to be inspected");
    }

    let mut conn = connect(&config.backend).await?;
    execute(conn.as_mut(), cmd).await
}

async fn partition(
    conn: &mut dyn Connection,
    source: &Ident,
    target: &Ident,
    partitions: usize,
    column: Option<Ident>,
    schema: Schema,
) -> Result<PartitionReport> {
    let report = match column {
        Some(column) => {
            let req = RangePartitionRequest {
                source: source.clone(),
                target: target.clone(),
                num_partitions: partitions,
                schema,
                column,
            };
            partition_range(conn, &req).await?
        }
        None => {
            let req = RoundRobinPartitionRequest {
                source: source.clone(),
                target: target.clone(),
                num_partitions: partitions,
                schema,
            };
            partition_round_robin(conn, &req).await?
        }
    };

    Ok(report)
}

pub async fn execute(conn: &mut dyn Connection, cmd: SubCommand) -> Result<String> {
    match cmd {
        SubCommand::Load(args) => {
            let schema = Schema::from_manifest_path(&args.manifest)?;
            let rows = load_data(conn, &args.table, &args.csv, &schema).await?;
            Ok(format!("loaded {rows} rows into {}", args.table))
        }
        SubCommand::Range(args) => {
            let schema = Schema::from_manifest_path(&args.manifest)?;
            let report = partition(
                conn,
                &args.source,
                &args.target,
                args.partitions,
                Some(args.column),
                schema,
            )
            .await?;
            Ok(report.to_string())
        }
        SubCommand::RoundRobin(args) => {
            let schema = Schema::from_manifest_path(&args.manifest)?;
            let report =
                partition(conn, &args.source, &args.target, args.partitions, None, schema).await?;
            Ok(report.to_string())
        }
        SubCommand::Reap(args) => {
            let dropped = delete_partitions(conn, &args.target, args.partitions).await;
            Ok(format!(
                "dropped {dropped} of {} partitions of {}",
                args.partitions, args.target
            ))
        }
        SubCommand::Run(args) => {
            let schema = Schema::from_manifest_path(&args.manifest)?;
            let loaded = load_data(conn, &args.source, &args.csv, &schema).await?;
            let report = partition(
                conn,
                &args.source,
                &args.target,
                args.partitions,
                args.column,
                schema,
            )
            .await?;
            let counts = report::partition_counts(conn, &report).await?;
            let table = report::format_counts(&report, &counts)?;
            Ok(format!("loaded {loaded} rows into {}\n{report}\n{table}", args.source))
        }
    }
}
