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

//! Helpers shared by unit tests.

use std::path::Path;

use arrow::{
    array::{AsArray, RecordBatch},
    compute::cast,
    datatypes::{DataType, Int64Type},
};
use async_trait::async_trait;

use crate::{
    connection::{Connection, RelationInfo},
    ident::Ident,
    memory::MemoryConnection,
    schema::Schema,
    statement::Statement,
    Error, Result,
};

#[macro_export]
macro_rules! create_array {
    (Boolean, $values: expr) => {
        std::sync::Arc::new(arrow::array::BooleanArray::from($values))
    };
    (Int16, $values: expr) => {
        std::sync::Arc::new(arrow::array::Int16Array::from($values))
    };
    (Int32, $values: expr) => {
        std::sync::Arc::new(arrow::array::Int32Array::from($values))
    };
    (Int64, $values: expr) => {
        std::sync::Arc::new(arrow::array::Int64Array::from($values))
    };
    (Float64, $values: expr) => {
        std::sync::Arc::new(arrow::array::Float64Array::from($values))
    };
    (Utf8, $values: expr) => {
        std::sync::Arc::new(arrow::array::StringArray::from($values))
    };
}

/// Creates a record batch from literal slice of values.
///
/// Example:
/// ```
/// let batch = record_batch!(
///     ("id", Int32, vec![1, 2, 3]),
///     ("value", Int64, vec![Some(4), None, Some(5)])
/// );
/// ```
#[macro_export]
macro_rules! record_batch {
    ($(($name: expr, $type: ident, $values: expr)),*) => {
        {
            let schema = std::sync::Arc::new(arrow::datatypes::Schema::new(vec![
                $(
                    arrow::datatypes::Field::new($name, arrow::datatypes::DataType::$type, true),
                )*
            ]));

            arrow::array::RecordBatch::try_new(
                schema,
                vec![$(
                    $crate::create_array!($type, $values),
                )*]
            )
        }
    }
}

/// Values of an integer column across `batches`, in order. Nulls are skipped.
pub fn int_values(batches: &[RecordBatch], column: &str) -> Vec<i64> {
    batches
        .iter()
        .flat_map(|batch| {
            let array = batch.column_by_name(column).unwrap();
            let array = cast(array, &DataType::Int64).unwrap();
            array
                .as_primitive::<Int64Type>()
                .iter()
                .flatten()
                .collect::<Vec<_>>()
        })
        .collect()
}

/// A memory connection with the transaction behavior of PostgreSQL: once a
/// statement fails, everything but a rollback fails until the transaction
/// is rolled back.
pub struct AbortingConnection {
    inner: MemoryConnection,
    aborted: bool,
    /// Makes every `INSERT ... SELECT` fail.
    pub fail_inserts: bool,
    pub rollbacks: usize,
}

impl AbortingConnection {
    pub fn new(inner: MemoryConnection) -> Self {
        Self {
            inner,
            aborted: false,
            fail_inserts: false,
            rollbacks: 0,
        }
    }

    fn check_aborted(&self) -> Result<()> {
        if self.aborted {
            return Err(Error::Internal(anyhow::anyhow!(
                "current transaction is aborted, commands ignored until end of transaction block"
            )));
        }
        Ok(())
    }

    fn track<T>(&mut self, res: Result<T>) -> Result<T> {
        if res.is_err() {
            self.aborted = true;
        }
        res
    }
}

#[async_trait]
impl Connection for AbortingConnection {
    async fn execute(&mut self, stmt: &Statement) -> Result<u64> {
        self.check_aborted()?;
        let res = match stmt {
            Statement::InsertSelect { target, .. } if self.fail_inserts => {
                Err(Error::RoutingFailure {
                    parent: target.to_string(),
                    detail: "insert rejected".to_string(),
                })
            }
            _ => self.inner.execute(stmt).await,
        };
        self.track(res)
    }

    async fn min_max(&mut self, table: &Ident, column: &Ident) -> Result<Option<(i64, i64)>> {
        self.check_aborted()?;
        self.inner.min_max(table, column).await
    }

    async fn relation(&mut self, name: &Ident) -> Result<Option<RelationInfo>> {
        self.check_aborted()?;
        self.inner.relation(name).await
    }

    async fn count_rows(&mut self, name: &Ident) -> Result<u64> {
        self.check_aborted()?;
        self.inner.count_rows(name).await
    }

    async fn copy_from_csv(&mut self, table: &Ident, schema: &Schema, path: &Path) -> Result<u64> {
        self.check_aborted()?;
        let res = self.inner.copy_from_csv(table, schema, path).await;
        self.track(res)
    }

    async fn commit(&mut self) -> Result<()> {
        self.check_aborted()?;
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.aborted = false;
        self.rollbacks += 1;
        self.inner.rollback().await
    }
}
