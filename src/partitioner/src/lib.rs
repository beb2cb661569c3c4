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

//! Range and round-robin partitioning of a staged table.
//!
//! A staging table is loaded by [`loader::load_data`] and then reorganized by
//! either [`range::partition_range`] or [`round_robin::partition_round_robin`]
//! into a parent relation with `num_partitions` children named
//! `<target><index>`. Both partitioners speak to the engine through the
//! [`connection::Connection`] seam, which is implemented by the in-process
//! [`memory::MemoryEngine`] and by [`postgres::PostgresConnection`].

mod macros;

pub mod boundary;
pub mod connection;
pub mod ident;
pub mod loader;
pub mod memory;
pub mod postgres;
pub mod range;
pub mod reaper;
pub mod round_robin;
pub mod router;
pub mod schema;
pub mod statement;
#[cfg(test)]
mod test_util;

use std::path::PathBuf;

pub use crate::{
    connection::{Connection, PartitionReport},
    ident::Ident,
    loader::load_data,
    range::{partition_range, RangePartitionRequest},
    reaper::delete_partitions,
    round_robin::{partition_round_robin, RoundRobinPartitionRequest},
    schema::Schema,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to connect to {endpoint}, err:{source}")]
    Connection {
        endpoint: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("invalid schema, {0}")]
    Schema(String),

    #[error("schema does not match relation {table}, {detail}")]
    SchemaMismatch { table: String, detail: String },

    #[error("relation {0} does not exist")]
    UnknownRelation(String),

    #[error("relation {table} has no values in column {column}, bounds are undefined")]
    EmptyInput { table: String, column: String },

    #[error("number of partitions must be at least 1, given:{0}")]
    PartitionCount(usize),

    #[error("column {column} of type {ty} does not support range partitioning, {reason}")]
    NonNumericColumn {
        column: String,
        ty: String,
        reason: &'static str,
    },

    #[error("failed to route row of {parent}, {detail}")]
    RoutingFailure { parent: String, detail: String },

    #[error("relation {existing} collides with partitions of {target}")]
    NameCollision { target: String, existing: String },

    #[error("invalid identifier {0:?}, only [A-Za-z_][A-Za-z0-9_]* up to 63 bytes is allowed")]
    InvalidIdentifier(String),

    #[error("failed to read {path:?}, err:{source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Engine(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
