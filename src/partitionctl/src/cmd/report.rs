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

//! Tabular output of a partitioning run.

use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::{
    array::{RecordBatch, StringArray, UInt64Array},
    datatypes::{DataType, Field, Schema},
    util::pretty::pretty_format_batches,
};
use partitioner::{Connection, PartitionReport};

/// Rows currently stored in every partition of `report`, in partition order.
pub async fn partition_counts(
    conn: &mut dyn Connection,
    report: &PartitionReport,
) -> Result<Vec<u64>> {
    let mut counts = Vec::with_capacity(report.partitions.len());
    for partition in &report.partitions {
        counts.push(conn.count_rows(&partition.name).await?);
    }

    Ok(counts)
}

pub fn format_counts(report: &PartitionReport, counts: &[u64]) -> Result<String> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("partition", DataType::Utf8, false),
        Field::new("bound", DataType::Utf8, true),
        Field::new("rows", DataType::UInt64, false),
    ]));
    let names = StringArray::from_iter_values(report.partitions.iter().map(|p| p.name.as_str()));
    let bounds = report
        .partitions
        .iter()
        .map(|p| p.bound.map(|b| b.to_string()))
        .collect::<StringArray>();
    let rows = UInt64Array::from(counts.to_vec());

    let batch = RecordBatch::try_new(
        schema,
        vec![Arc::new(names), Arc::new(bounds), Arc::new(rows)],
    )
    .context("build partition table")?;
    let table = pretty_format_batches(&[batch]).context("format partition table")?;

    Ok(table.to_string())
}
