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

//! Range partitioning over an integer column.

use tracing::info;

use crate::{
    boundary::compute_bounds_within,
    connection::{
        check_source, check_target_names, execute_all, rollback_on_error, Connection,
        PartitionInfo,
    },
    ensure,
    ident::Ident,
    schema::{ColumnDef, Schema},
    statement::{Statement, TableLayout},
    Error, PartitionReport, Result,
};

#[derive(Clone, Debug)]
pub struct RangePartitionRequest {
    /// Populated staging table.
    pub source: Ident,
    /// Parent to (re)create, children are `<target><i>`.
    pub target: Ident,
    pub num_partitions: usize,
    pub schema: Schema,
    pub column: Ident,
}

fn check_partition_column(def: &ColumnDef) -> Result<()> {
    let family = def.ty.family();
    if family.is_integer() {
        return Ok(());
    }

    let reason = if family.is_fractional() {
        "fractional domains are not supported, bounds are computed as max - min + 1"
    } else {
        "interval arithmetic needs an integer column"
    };
    Err(Error::NonNumericColumn {
        column: def.name.to_string(),
        ty: def.ty.to_string(),
        reason,
    })
}

/// Recreates `target` as a range partitioned table with `num_partitions`
/// equally wide children spanning `[min, max]` of `column`, then copies
/// every row of `source` into it.
///
/// Schema changes and data copy are committed separately. On failure the
/// uncommitted part is rolled back, so a failed copy leaves empty partitions
/// behind, which [`crate::delete_partitions`] can clean up.
pub async fn partition_range(
    conn: &mut dyn Connection,
    req: &RangePartitionRequest,
) -> Result<PartitionReport> {
    let res = do_partition_range(conn, req).await;
    rollback_on_error(conn, res).await
}

async fn do_partition_range(
    conn: &mut dyn Connection,
    req: &RangePartitionRequest,
) -> Result<PartitionReport> {
    ensure!(
        req.num_partitions > 0,
        Error::PartitionCount(req.num_partitions)
    );
    let children = req.target.children(req.num_partitions)?;
    check_target_names(&req.source, &req.target, &children)?;

    let column = req.schema.column(&req.column).ok_or_else(|| {
        Error::Schema(format!("partition column {} is not in schema", req.column))
    })?;
    check_partition_column(column)?;
    check_source(conn, &req.source, &req.schema).await?;

    // Children of the old target go away with it, anything else is foreign.
    for child in &children {
        if let Some(info) = conn.relation(child).await? {
            if info.parent.as_ref() != Some(&req.target) {
                return Err(Error::NameCollision {
                    target: req.target.to_string(),
                    existing: child.to_string(),
                });
            }
        }
    }

    let (min, max) = conn
        .min_max(&req.source, &req.column)
        .await?
        .ok_or_else(|| Error::EmptyInput {
            table: req.source.to_string(),
            column: req.column.to_string(),
        })?;
    let domain_max = column.ty.family().integer_max().unwrap_or(i64::MAX);
    let bounds = compute_bounds_within(min, max, req.num_partitions, domain_max)?;
    info!(
        source = %req.source,
        target = %req.target,
        column = %req.column,
        min,
        max,
        num_partitions = req.num_partitions,
        "Range bounds computed"
    );

    let mut stmts = vec![
        Statement::drop_table(&req.target),
        Statement::create_table(
            &req.target,
            &req.schema,
            TableLayout::PartitionedByRange {
                column: req.column.clone(),
            },
        ),
    ];
    stmts.extend(children.iter().zip(&bounds).map(|(child, bound)| {
        Statement::create_table(
            child,
            &req.schema,
            TableLayout::RangePartitionOf {
                parent: req.target.clone(),
                bound: *bound,
            },
        )
    }));
    execute_all(conn, stmts).await?;
    conn.commit().await?;

    conn.execute(&Statement::InsertSelect {
        target: req.target.clone(),
        source: req.source.clone(),
        columns: req.schema.column_names(),
    })
    .await?;
    conn.commit().await?;

    let rows = conn.count_rows(&req.target).await?;
    info!(target = %req.target, rows, "Range partitioning finished");

    Ok(PartitionReport {
        target: req.target.clone(),
        partitions: children
            .into_iter()
            .zip(bounds)
            .map(|(name, bound)| PartitionInfo {
                name,
                bound: Some(bound),
            })
            .collect(),
        rows,
    })
}
