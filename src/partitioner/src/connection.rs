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

//! The seam between the partitioners and a relational engine.

use std::{fmt, path::Path};

use async_trait::async_trait;
use itertools::Itertools;
use tracing::{debug, warn};

use crate::{
    boundary::RangeBound, ident::Ident, schema::Schema, statement::Statement, Error, Result,
};

/// What the engine knows about an existing relation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationInfo {
    pub schema: Schema,
    /// Set when the relation is a partition or inheritance child.
    pub parent: Option<Ident>,
}

/// A session against a relational engine.
///
/// Statements are issued one by one and each call completes before the next
/// one starts. Changes become durable at [`Connection::commit`].
#[async_trait]
pub trait Connection: Send {
    /// Executes a statement, returns the number of affected rows.
    async fn execute(&mut self, stmt: &Statement) -> Result<u64>;

    /// Min and max of an integer column, `None` when there is no non-null
    /// value.
    async fn min_max(&mut self, table: &Ident, column: &Ident) -> Result<Option<(i64, i64)>>;

    async fn relation(&mut self, name: &Ident) -> Result<Option<RelationInfo>>;

    /// Rows visible through `name`, including rows stored in its children.
    async fn count_rows(&mut self, name: &Ident) -> Result<u64>;

    /// Bulk loads a delimited file whose first line is a header into
    /// `table`, columns matched by position.
    async fn copy_from_csv(&mut self, table: &Ident, schema: &Schema, path: &Path)
        -> Result<u64>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

/// Summary of a finished partitioning run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionReport {
    pub target: Ident,
    pub partitions: Vec<PartitionInfo>,
    pub rows: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionInfo {
    pub name: Ident,
    /// Only set for range partitions.
    pub bound: Option<RangeBound>,
}

impl fmt::Display for PartitionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let partitions = self
            .partitions
            .iter()
            .format_with(", ", |p, f| match &p.bound {
                Some(bound) => f(&format_args!("{}{}", p.name, bound)),
                None => f(&p.name),
            });
        write!(
            f,
            "{} rows into {} [{}]",
            self.rows, self.target, partitions
        )
    }
}

pub(crate) async fn execute_all(
    conn: &mut dyn Connection,
    stmts: impl IntoIterator<Item = Statement>,
) -> Result<()> {
    for stmt in stmts {
        let affected = conn.execute(&stmt).await?;
        debug!(kind = stmt.kind(), affected, "Statement executed");
    }

    Ok(())
}

/// Rolls back whatever `res` left uncommitted when it is an error, so the
/// connection is usable again. Committed work is kept. Returns `res`.
pub(crate) async fn rollback_on_error<T>(
    conn: &mut dyn Connection,
    res: Result<T>,
) -> Result<T> {
    if let Err(e) = &res {
        if let Err(rollback_err) = conn.rollback().await {
            warn!("Failed to rollback after error, err:{e}, rollback_err:{rollback_err}");
        }
    }

    res
}

/// Checks that `source` exists and has exactly the columns of `schema`.
pub(crate) async fn check_source(
    conn: &mut dyn Connection,
    source: &Ident,
    schema: &Schema,
) -> Result<()> {
    let info = conn
        .relation(source)
        .await?
        .ok_or_else(|| Error::UnknownRelation(source.to_string()))?;

    schema.check_matches(source, &info.schema)
}

/// Rejects a target whose own name or child names would overwrite `source`.
pub(crate) fn check_target_names(source: &Ident, target: &Ident, children: &[Ident]) -> Result<()> {
    if source == target || children.contains(source) {
        return Err(Error::NameCollision {
            target: target.to_string(),
            existing: source.to_string(),
        });
    }

    Ok(())
}
