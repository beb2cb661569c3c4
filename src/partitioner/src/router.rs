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

//! Row routers used by the in-memory engine to dispatch inserted rows into
//! child relations.

use anyhow::Context;
use arrow::{
    array::{AsArray, RecordBatch},
    compute::cast,
    datatypes::{DataType, Int64Type},
};

use crate::{boundary::RangeBound, ensure, Error, Result};

/// Decides which child every row of a batch belongs to.
pub trait RowRouter {
    /// Locate partitions for the rows in `batch`.
    ///
    /// Len of returned value should be equal to the number of rows in `batch`.
    fn locate_partitions_for_write(&mut self, batch: &RecordBatch) -> Result<Vec<usize>>;
}

/// Cyclic cursor over `[0, num_partitions)`.
///
/// Row `k` inserted after creation goes to partition `k % num_partitions`.
#[derive(Debug, Clone)]
pub struct RoundRobinRouter {
    next: usize,
    num_partitions: usize,
}

impl RoundRobinRouter {
    pub fn new(num_partitions: usize) -> Result<Self> {
        ensure!(num_partitions > 0, Error::PartitionCount(num_partitions));

        Ok(Self {
            next: 0,
            num_partitions,
        })
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    /// Returns the current slot and advances, wrapping to 0 after the last one.
    pub fn next_partition(&mut self) -> usize {
        let current = self.next;
        self.next = (self.next + 1) % self.num_partitions;
        current
    }
}

impl RowRouter for RoundRobinRouter {
    fn locate_partitions_for_write(&mut self, batch: &RecordBatch) -> Result<Vec<usize>> {
        Ok((0..batch.num_rows())
            .map(|_| self.next_partition())
            .collect())
    }
}

/// Routes rows by the value of an integer column against a set of
/// non-overlapping bounds.
#[derive(Debug, Clone)]
pub struct RangeRouter {
    parent: String,
    column: String,
    /// Sorted by `start`, each paired with its partition index.
    bounds: Vec<(RangeBound, usize)>,
}

impl RangeRouter {
    /// `bounds[i]` is the bound of partition `i`, in any order.
    pub fn new(parent: impl Into<String>, column: impl Into<String>, bounds: &[RangeBound]) -> Self {
        let mut bounds = bounds
            .iter()
            .copied()
            .enumerate()
            .map(|(idx, bound)| (bound, idx))
            .collect::<Vec<_>>();
        bounds.sort_by_key(|(bound, _)| bound.start);

        Self {
            parent: parent.into(),
            column: column.into(),
            bounds,
        }
    }

    /// Binary search for the bound containing `value`.
    pub fn locate(&self, value: i64) -> Option<usize> {
        let pos = self.bounds.partition_point(|(b, _)| b.start <= value);
        let (bound, idx) = self.bounds.get(pos.checked_sub(1)?)?;
        bound.contains(value).then_some(*idx)
    }
}

impl RowRouter for RangeRouter {
    fn locate_partitions_for_write(&mut self, batch: &RecordBatch) -> Result<Vec<usize>> {
        let column = batch
            .column_by_name(&self.column)
            .with_context(|| format!("partition column {} not found in batch", self.column))?;
        let values = cast(column, &DataType::Int64)
            .with_context(|| format!("cast partition column {} to int64", self.column))?;
        let values = values.as_primitive::<Int64Type>();

        let mut partitions = Vec::with_capacity(values.len());
        for (row, value) in values.iter().enumerate() {
            let value = value.ok_or_else(|| Error::RoutingFailure {
                parent: self.parent.clone(),
                detail: format!("row {row} has null in partition column {}", self.column),
            })?;
            let idx = self.locate(value).ok_or_else(|| Error::RoutingFailure {
                parent: self.parent.clone(),
                detail: format!("no partition found for {}={value}", self.column),
            })?;
            partitions.push(idx);
        }

        Ok(partitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{boundary::compute_bounds, record_batch};

    #[test]
    fn test_round_robin_cycle() {
        let mut router = RoundRobinRouter::new(3).unwrap();
        let slots = (0..7).map(|_| router.next_partition()).collect::<Vec<_>>();
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);

        // Continues across batches instead of restarting.
        let batch = record_batch!(("id", Int32, vec![1, 2, 3, 4])).unwrap();
        let slots = router.locate_partitions_for_write(&batch).unwrap();
        assert_eq!(slots, vec![1, 2, 0, 1]);

        let mut single = RoundRobinRouter::new(1).unwrap();
        assert!((0..5).all(|_| single.next_partition() == 0));

        assert!(matches!(
            RoundRobinRouter::new(0),
            Err(Error::PartitionCount(0))
        ));
    }

    #[test]
    fn test_range_locate() {
        let bounds = compute_bounds(10, 50, 2).unwrap();
        let router = RangeRouter::new("p", "value", &bounds);
        let testcases = [
            (9, None),
            (10, Some(0)),
            (30, Some(0)),
            (31, Some(1)),
            (51, Some(1)),
            (52, None),
        ];
        for (value, expected) in testcases {
            assert_eq!(router.locate(value), expected, "value:{value}");
        }

        // Bounds given out of order keep their own partition index.
        let reversed = bounds.iter().rev().copied().collect::<Vec<_>>();
        let router = RangeRouter::new("p", "value", &reversed);
        assert_eq!(router.locate(10), Some(1));
        assert_eq!(router.locate(40), Some(0));
    }

    #[test]
    fn test_range_route_batch() {
        let bounds = compute_bounds(10, 50, 2).unwrap();
        let mut router = RangeRouter::new("p", "value", &bounds);
        let batch = record_batch!(
            ("id", Int32, vec![1, 2, 3, 4, 5]),
            ("value", Int32, vec![10, 20, 30, 40, 50])
        )
        .unwrap();
        let slots = router.locate_partitions_for_write(&batch).unwrap();
        assert_eq!(slots, vec![0, 0, 0, 1, 1]);

        let batch = record_batch!(("value", Int32, vec![Some(10), None])).unwrap();
        assert!(matches!(
            router.locate_partitions_for_write(&batch),
            Err(Error::RoutingFailure { .. })
        ));

        let batch = record_batch!(("value", Int64, vec![100])).unwrap();
        assert!(matches!(
            router.locate_partitions_for_write(&batch),
            Err(Error::RoutingFailure { .. })
        ));
    }
}
