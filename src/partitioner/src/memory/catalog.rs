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

//! Tables, cursors and interceptors of the in-memory engine.

use std::{collections::HashMap, path::Path, sync::Arc};

use anyhow::Context;
use arrow::{
    array::{Array, AsArray, RecordBatch, UInt32Array},
    compute::{self, cast, filter_record_batch, kernels::cmp::eq},
    csv::ReaderBuilder,
    datatypes::{DataType, Int64Type, SchemaRef},
};
use tracing::debug;

use crate::{
    boundary::RangeBound,
    connection::RelationInfo,
    ensure,
    ident::Ident,
    router::{RangeRouter, RoundRobinRouter, RowRouter},
    schema::Schema,
    statement::{Statement, TableLayout},
    Error, Result,
};

#[derive(Clone, Debug)]
struct Table {
    /// Creation order, children are scanned in this order.
    oid: u64,
    schema: Schema,
    arrow_schema: SchemaRef,
    layout: TableLayout,
    batches: Vec<RecordBatch>,
    /// Cursor of the round-robin hook installed on this table.
    router_cursor: Option<Ident>,
}

impl Table {
    fn parent(&self) -> Option<&Ident> {
        match &self.layout {
            TableLayout::Plain | TableLayout::PartitionedByRange { .. } => None,
            TableLayout::RangePartitionOf { parent, .. } | TableLayout::InheritsFrom { parent } => {
                Some(parent)
            }
        }
    }

    fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Catalog {
    next_oid: u64,
    tables: HashMap<Ident, Table>,
    cursors: HashMap<Ident, RoundRobinRouter>,
}

fn engine_error(msg: String) -> Error {
    Error::Internal(anyhow::anyhow!(msg))
}

impl Catalog {
    pub fn execute(&mut self, stmt: &Statement) -> Result<u64> {
        match stmt {
            Statement::DropTable { name, cascade } => self.drop_table(name, *cascade),
            Statement::CreateTable {
                name,
                schema,
                layout,
                if_not_exists,
            } => self.create_table(name, schema, layout, *if_not_exists),
            Statement::CreateCursor { name, modulus } => {
                ensure!(
                    !self.cursors.contains_key(name),
                    engine_error(format!("cursor {name} already exists"))
                );
                self.cursors
                    .insert(name.clone(), RoundRobinRouter::new(*modulus)?);
                Ok(0)
            }
            Statement::DropCursor { name } => {
                self.cursors.remove(name);
                Ok(0)
            }
            Statement::InstallRoundRobinRouter { parent, cursor, .. } => {
                ensure!(
                    self.cursors.contains_key(cursor),
                    engine_error(format!("cursor {cursor} does not exist"))
                );
                let table = self.table_mut(parent)?;
                table.router_cursor = Some(cursor.clone());
                Ok(0)
            }
            Statement::RemoveRoundRobinRouter { parent, cursor } => {
                if let Some(table) = self.tables.get_mut(parent) {
                    if table.router_cursor.as_ref() == Some(cursor) {
                        table.router_cursor = None;
                    }
                }
                Ok(0)
            }
            Statement::InsertSelect {
                target,
                source,
                columns,
            } => {
                let batches = self.scan(source)?;
                let mut inserted = 0;
                for batch in batches {
                    let batch = project(&batch, columns)?;
                    inserted += self.insert(target, batch)?;
                }
                Ok(inserted as u64)
            }
        }
    }

    fn table(&self, name: &Ident) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::UnknownRelation(name.to_string()))
    }

    fn table_mut(&mut self, name: &Ident) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| Error::UnknownRelation(name.to_string()))
    }

    /// Direct children of `name`, in creation order.
    fn children_of(&self, name: &Ident) -> Vec<(&Ident, &Table)> {
        let mut children = self
            .tables
            .iter()
            .filter(|(_, t)| t.parent() == Some(name))
            .collect::<Vec<_>>();
        children.sort_by_key(|(_, t)| t.oid);
        children
    }

    fn drop_table(&mut self, name: &Ident, cascade: bool) -> Result<u64> {
        if !self.tables.contains_key(name) {
            return Ok(0);
        }

        let children = self
            .children_of(name)
            .into_iter()
            .map(|(child, _)| child.clone())
            .collect::<Vec<_>>();
        ensure!(
            cascade || children.is_empty(),
            engine_error(format!(
                "cannot drop table {name} because other objects depend on it"
            ))
        );
        for child in children {
            self.drop_table(&child, cascade)?;
        }
        self.tables.remove(name);
        debug!(table = %name, "Memory table dropped");

        Ok(0)
    }

    fn create_table(
        &mut self,
        name: &Ident,
        schema: &Schema,
        layout: &TableLayout,
        if_not_exists: bool,
    ) -> Result<u64> {
        if self.tables.contains_key(name) {
            if if_not_exists {
                return Ok(0);
            }
            return Err(engine_error(format!("relation {name} already exists")));
        }

        match layout {
            TableLayout::Plain | TableLayout::PartitionedByRange { .. } => {}
            TableLayout::InheritsFrom { parent } => {
                self.table(parent)?;
            }
            TableLayout::RangePartitionOf { parent, bound } => {
                let parent_table = self.table(parent)?;
                ensure!(
                    matches!(parent_table.layout, TableLayout::PartitionedByRange { .. }),
                    engine_error(format!("{parent} is not a range partitioned table"))
                );
                let overlapped = self
                    .children_of(parent)
                    .into_iter()
                    .find(|(_, t)| match &t.layout {
                        TableLayout::RangePartitionOf { bound: other, .. } => {
                            overlaps(bound, other)
                        }
                        _ => false,
                    });
                if let Some((other, _)) = overlapped {
                    return Err(engine_error(format!(
                        "partition {name} would overlap partition {other}"
                    )));
                }
            }
        }

        let oid = self.next_oid;
        self.next_oid += 1;
        self.tables.insert(
            name.clone(),
            Table {
                oid,
                schema: schema.clone(),
                arrow_schema: schema.to_arrow(),
                layout: layout.clone(),
                batches: Vec::new(),
                router_cursor: None,
            },
        );
        debug!(table = %name, layout = ?layout, "Memory table created");

        Ok(0)
    }

    /// Inserts `batch` into `name`, honoring a round-robin hook or range
    /// partitioning on the way. Returns the number of rows stored.
    pub fn insert(&mut self, name: &Ident, batch: RecordBatch) -> Result<usize> {
        if batch.num_rows() == 0 {
            return Ok(0);
        }

        let table = self.table(name)?;
        if let Some(cursor) = table.router_cursor.clone() {
            let router = self
                .cursors
                .get_mut(&cursor)
                .ok_or_else(|| Error::RoutingFailure {
                    parent: name.to_string(),
                    detail: format!("cursor {cursor} does not exist"),
                })?;
            let slots = router.locate_partitions_for_write(&batch)?;
            let targets = (0..router.num_partitions())
                .map(|i| name.child(i))
                .collect::<Result<Vec<_>>>()?;
            return self.dispatch(name, &targets, &batch, &slots);
        }

        if let TableLayout::PartitionedByRange { column } = &table.layout {
            let (targets, bounds): (Vec<Ident>, Vec<RangeBound>) = self
                .children_of(name)
                .into_iter()
                .filter_map(|(child, t)| match &t.layout {
                    TableLayout::RangePartitionOf { bound, .. } => Some((child.clone(), *bound)),
                    _ => None,
                })
                .unzip();
            let mut router = RangeRouter::new(name.as_str(), column.as_str(), &bounds);
            let slots = router.locate_partitions_for_write(&batch)?;
            return self.dispatch(name, &targets, &batch, &slots);
        }

        let table = self.table_mut(name)?;
        let batch = conform(&batch, &table.arrow_schema)?;
        let rows = batch.num_rows();
        table.batches.push(batch);

        Ok(rows)
    }

    /// Splits `batch` by `slots` and inserts every part into `targets[slot]`.
    fn dispatch(
        &mut self,
        parent: &Ident,
        targets: &[Ident],
        batch: &RecordBatch,
        slots: &[usize],
    ) -> Result<usize> {
        let slots = UInt32Array::from_iter_values(slots.iter().map(|s| *s as u32));
        let mut inserted = 0;
        for (idx, target) in targets.iter().enumerate() {
            let mask = eq(&slots, &UInt32Array::new_scalar(idx as u32))
                .context("compute partition mask")?;
            if mask.true_count() == 0 {
                continue;
            }
            if !self.tables.contains_key(target) {
                return Err(Error::RoutingFailure {
                    parent: parent.to_string(),
                    detail: format!("partition {target} does not exist"),
                });
            }
            let part = filter_record_batch(batch, &mask).context("filter partition rows")?;
            inserted += self.insert(target, part)?;
        }
        ensure!(
            inserted == batch.num_rows(),
            "{} of {} rows of {} were routed",
            inserted,
            batch.num_rows(),
            parent
        );

        Ok(inserted)
    }

    /// All rows visible through `name`: its own followed by its children's.
    pub fn scan(&self, name: &Ident) -> Result<Vec<RecordBatch>> {
        let table = self.table(name)?;
        let mut batches = table.batches.clone();
        for (child, _) in self.children_of(name) {
            batches.extend(self.scan(child)?);
        }

        Ok(batches)
    }

    pub fn count_rows(&self, name: &Ident) -> Result<u64> {
        let own = self.table(name)?.num_rows() as u64;
        let mut total = own;
        for (child, _) in self.children_of(name) {
            total += self.count_rows(child)?;
        }

        Ok(total)
    }

    pub fn relation(&self, name: &Ident) -> Option<RelationInfo> {
        self.tables.get(name).map(|t| RelationInfo {
            schema: t.schema.clone(),
            parent: t.parent().cloned(),
        })
    }

    pub fn table_names(&self) -> Vec<Ident> {
        let mut tables = self.tables.iter().collect::<Vec<_>>();
        tables.sort_by_key(|(_, t)| t.oid);
        tables.into_iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn num_cursors(&self) -> usize {
        self.cursors.len()
    }

    pub fn min_max(&self, name: &Ident, column: &Ident) -> Result<Option<(i64, i64)>> {
        let table = self.table(name)?;
        let def = table.schema.column(column).ok_or_else(|| {
            Error::Schema(format!("column {column} does not exist in {name}"))
        })?;
        ensure!(
            def.ty.family().is_integer(),
            Error::NonNumericColumn {
                column: column.to_string(),
                ty: def.ty.to_string(),
                reason: "only integer columns have min/max bounds",
            }
        );

        let mut bounds: Option<(i64, i64)> = None;
        for batch in self.scan(name)? {
            let array = batch
                .column_by_name(column.as_str())
                .with_context(|| format!("column {column} missing from batch of {name}"))?;
            let array = cast(array, &DataType::Int64).context("cast to int64")?;
            let array = array.as_primitive::<Int64Type>();
            if let (Some(min), Some(max)) = (compute::min(array), compute::max(array)) {
                bounds = Some(match bounds {
                    Some((lo, hi)) => (lo.min(min), hi.max(max)),
                    None => (min, max),
                });
            }
        }

        Ok(bounds)
    }

    pub fn copy_from_csv(&mut self, name: &Ident, schema: &Schema, path: &Path) -> Result<u64> {
        self.table(name)?;
        let file = std::fs::File::open(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let reader = ReaderBuilder::new(schema.to_arrow())
            .with_header(true)
            .build(file)
            .context("build csv reader")?;

        let mut loaded = 0;
        for batch in reader {
            let batch = batch.with_context(|| format!("read csv {path:?}"))?;
            loaded += self.insert(name, batch)?;
        }

        Ok(loaded as u64)
    }
}

fn overlaps(a: &RangeBound, b: &RangeBound) -> bool {
    let a_before_b_end = b.end.map_or(true, |end| a.start < end);
    let b_before_a_end = a.end.map_or(true, |end| b.start < end);
    a_before_b_end && b_before_a_end
}

/// Selects `columns` of `batch`, in the given order.
fn project(batch: &RecordBatch, columns: &[Ident]) -> Result<RecordBatch> {
    let schema = batch.schema();
    let indices = columns
        .iter()
        .map(|c| {
            schema
                .index_of(c.as_str())
                .with_context(|| format!("column {c} not found"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(batch.project(&indices).context("project batch")?)
}

/// Rebuilds `batch` under `schema`, matching columns by position.
fn conform(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch> {
    ensure!(
        batch.num_columns() == schema.fields().len(),
        "insert has {} columns but table has {}",
        batch.num_columns(),
        schema.fields().len()
    );

    let columns = batch
        .columns()
        .iter()
        .zip(schema.fields())
        .map(|(col, field)| {
            if col.data_type() == field.data_type() {
                Ok(col.clone())
            } else {
                cast(col, field.data_type())
                    .with_context(|| format!("cast column {} to {}", field.name(), field.data_type()))
            }
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(RecordBatch::try_new(Arc::clone(schema), columns).context("conform batch")?)
}
