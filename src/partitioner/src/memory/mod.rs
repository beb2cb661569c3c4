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

//! In-process relational engine over Arrow record batches.
//!
//! It understands the same [`Statement`]s as the PostgreSQL backend:
//! range-partitioned parents route inserted rows by binary search over their
//! children's bounds, and a round-robin hook redirects each inserted row to
//! `<parent><cursor>`. Useful for tests and for trying a distribution without
//! a database.
//!
//! Transactions are emulated with a snapshot of the catalog taken at the
//! first statement after a commit, so the engine assumes a single writer.

mod catalog;

use std::{path::Path, sync::Arc};

use arrow::array::RecordBatch;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use self::catalog::Catalog;
use crate::{
    connection::{Connection, RelationInfo},
    ident::Ident,
    schema::Schema,
    statement::Statement,
    Result,
};

#[derive(Clone, Default)]
pub struct MemoryEngine {
    catalog: Arc<RwLock<Catalog>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection {
            catalog: self.catalog.clone(),
            snapshot: None,
        }
    }

    /// Rows visible through `name`, own rows first, then children in
    /// creation order.
    pub async fn scan(&self, name: &Ident) -> Result<Vec<RecordBatch>> {
        self.catalog.read().await.scan(name)
    }

    /// Appends `batch` to `name` outside any transaction, going through the
    /// same routing as an `INSERT`.
    pub async fn insert(&self, name: &Ident, batch: RecordBatch) -> Result<usize> {
        self.catalog.write().await.insert(name, batch)
    }

    pub async fn table_names(&self) -> Vec<Ident> {
        self.catalog.read().await.table_names()
    }

    /// Round-robin cursors currently alive.
    pub async fn num_cursors(&self) -> usize {
        self.catalog.read().await.num_cursors()
    }
}

pub struct MemoryConnection {
    catalog: Arc<RwLock<Catalog>>,
    /// Catalog state at the start of the open transaction.
    snapshot: Option<Catalog>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&mut self, stmt: &Statement) -> Result<u64> {
        let mut catalog = self.catalog.write().await;
        if self.snapshot.is_none() {
            self.snapshot = Some((*catalog).clone());
        }
        catalog.execute(stmt)
    }

    async fn min_max(&mut self, table: &Ident, column: &Ident) -> Result<Option<(i64, i64)>> {
        self.catalog.read().await.min_max(table, column)
    }

    async fn relation(&mut self, name: &Ident) -> Result<Option<RelationInfo>> {
        Ok(self.catalog.read().await.relation(name))
    }

    async fn count_rows(&mut self, name: &Ident) -> Result<u64> {
        self.catalog.read().await.count_rows(name)
    }

    async fn copy_from_csv(
        &mut self,
        table: &Ident,
        schema: &Schema,
        path: &Path,
    ) -> Result<u64> {
        let mut catalog = self.catalog.write().await;
        if self.snapshot.is_none() {
            self.snapshot = Some((*catalog).clone());
        }
        catalog.copy_from_csv(table, schema, path)
    }

    async fn commit(&mut self) -> Result<()> {
        if self.snapshot.take().is_some() {
            debug!("Memory transaction committed");
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(snapshot) = self.snapshot.take() {
            *self.catalog.write().await = snapshot;
            debug!("Memory transaction rolled back");
        }
        Ok(())
    }
}
