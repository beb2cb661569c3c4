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

//! Range vs round-robin partitioning of one staged table.

use std::sync::Arc;

use arrow::{
    array::{Int64Array, RecordBatch},
    datatypes::{DataType, Field, Schema as ArrowSchema},
};
use partitioner::{
    memory::MemoryEngine,
    partition_range, partition_round_robin,
    statement::{Statement, TableLayout},
    Connection, Ident, RangePartitionRequest, RoundRobinPartitionRequest, Schema,
};
use tokio::runtime::Runtime;

use crate::config::PartitionConfig;

const BATCH_SIZE: usize = 8192;

pub struct PartitionBench {
    rt: Runtime,
    engine: MemoryEngine,
    range: RangePartitionRequest,
    round_robin: RoundRobinPartitionRequest,
}

impl PartitionBench {
    pub fn new(config: PartitionConfig) -> Self {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("build tokio runtime");
        let engine = MemoryEngine::new();
        let schema = Schema::from_pairs([("id", "bigint"), ("value", "bigint")]).unwrap();
        let source = Ident::new("bench_source").unwrap();

        rt.block_on(async {
            let mut conn = engine.connect();
            conn.execute(&Statement::create_table(&source, &schema, TableLayout::Plain))
                .await
                .unwrap();
            conn.commit().await.unwrap();

            for batch in staged_batches(config.row_count) {
                engine.insert(&source, batch).await.unwrap();
            }
        });

        PartitionBench {
            rt,
            engine,
            range: RangePartitionRequest {
                source: source.clone(),
                target: Ident::new("bench_range").unwrap(),
                num_partitions: config.num_partitions,
                schema: schema.clone(),
                column: Ident::new("value").unwrap(),
            },
            round_robin: RoundRobinPartitionRequest {
                source,
                target: Ident::new("bench_rr").unwrap(),
                num_partitions: config.num_partitions,
                schema,
            },
        }
    }

    pub fn range_bench(&mut self) {
        let mut conn = self.engine.connect();
        let report = self
            .rt
            .block_on(partition_range(&mut conn, &self.range))
            .unwrap();
        assert_eq!(report.partitions.len(), self.range.num_partitions);
    }

    pub fn round_robin_bench(&mut self) {
        let mut conn = self.engine.connect();
        let report = self
            .rt
            .block_on(partition_round_robin(&mut conn, &self.round_robin))
            .unwrap();
        assert_eq!(report.partitions.len(), self.round_robin.num_partitions);
    }
}

/// Sequential ids with values scattered over `[0, row_count)` by a fixed
/// multiplicative hash, so range children get uneven arrival order.
fn staged_batches(row_count: usize) -> Vec<RecordBatch> {
    let schema = Arc::new(ArrowSchema::new(vec![
        Field::new("id", DataType::Int64, true),
        Field::new("value", DataType::Int64, true),
    ]));
    let modulus = row_count.max(1) as u64;

    (0..row_count)
        .step_by(BATCH_SIZE)
        .map(|start| {
            let end = (start + BATCH_SIZE).min(row_count);
            let ids = Int64Array::from_iter_values((start..end).map(|i| i as i64));
            let values = Int64Array::from_iter_values(
                (start..end).map(|i| ((i as u64).wrapping_mul(2_654_435_761) % modulus) as i64),
            );
            RecordBatch::try_new(schema.clone(), vec![Arc::new(ids), Arc::new(values)]).unwrap()
        })
        .collect()
}
