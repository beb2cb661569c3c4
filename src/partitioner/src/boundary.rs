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

//! Interval arithmetic for range partitioning.

use std::fmt;

use crate::{ensure, Error, Result};

/// Half-open interval `[start, end)` over the partition column.
///
/// `end == None` means the interval is unbounded above, which only happens
/// when the computed end lies past the largest value of the column type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct RangeBound {
    pub start: i64,
    pub end: Option<i64>,
}

impl RangeBound {
    pub fn contains(&self, value: i64) -> bool {
        value >= self.start && self.end.map_or(true, |end| value < end)
    }
}

impl fmt::Display for RangeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "[{}, {})", self.start, end),
            None => write!(f, "[{}, +inf)", self.start),
        }
    }
}

/// Width of every interval: `ceil((max - min + 1) / num_partitions)`.
pub fn interval_width(min: i64, max: i64, num_partitions: usize) -> Result<i128> {
    ensure!(num_partitions > 0, Error::PartitionCount(num_partitions));
    ensure!(min <= max, "min {} is larger than max {}", min, max);

    let span = max as i128 - min as i128 + 1;
    let n = num_partitions as i128;

    Ok((span + n - 1) / n)
}

/// Splits `[min, max]` into `num_partitions` contiguous intervals of equal
/// width, sorted ascending. The last interval always ends after `max`; the
/// part beyond `max` is unused headroom.
pub fn compute_bounds(min: i64, max: i64, num_partitions: usize) -> Result<Vec<RangeBound>> {
    compute_bounds_within(min, max, num_partitions, i64::MAX)
}

/// Same as [`compute_bounds`] for a column whose values never exceed
/// `domain_max`. An end past `domain_max` becomes unbounded, a partition
/// starting past it is an error.
pub fn compute_bounds_within(
    min: i64,
    max: i64,
    num_partitions: usize,
    domain_max: i64,
) -> Result<Vec<RangeBound>> {
    let width = interval_width(min, max, num_partitions)?;
    ensure!(
        max <= domain_max,
        "max {} is larger than the column maximum {}",
        max,
        domain_max
    );

    let domain_max = domain_max as i128;
    let mut bounds = Vec::with_capacity(num_partitions);
    for i in 0..num_partitions as i128 {
        let start = min as i128 + i * width;
        ensure!(
            start <= domain_max,
            "partition {} starts at {}, past the column maximum {}, min:{}, max:{}",
            i,
            start,
            domain_max,
            min,
            max
        );
        let end = start + width;
        bounds.push(RangeBound {
            start: start as i64,
            end: (end <= domain_max).then_some(end as i64),
        });
    }

    Ok(bounds)
}
