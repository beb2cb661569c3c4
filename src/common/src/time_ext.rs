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

//! Durations written the way people write them in config files, e.g.
//! `"10s"`, `"1m30s"` or `"500ms"`.

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const MS: u64 = 1;
const SECOND: u64 = 1000 * MS;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Units from the largest to the smallest, `ms` must be matched before `m`.
const UNITS: [(&str, u64); 5] = [
    ("d", DAY),
    ("h", HOUR),
    ("ms", MS),
    ("m", MINUTE),
    ("s", SECOND),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Ord, PartialOrd, Default)]
pub struct ReadableDuration(pub Duration);

impl ReadableDuration {
    pub const fn secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub const fn millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    pub fn as_millis(&self) -> u64 {
        self.0.as_millis() as u64
    }
}

impl From<Duration> for ReadableDuration {
    fn from(d: Duration) -> Self {
        Self(d)
    }
}

impl From<ReadableDuration> for Duration {
    fn from(d: ReadableDuration) -> Self {
        d.0
    }
}

impl FromStr for ReadableDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut rest = s.trim();
        if rest.is_empty() {
            return Err("empty duration".to_string());
        }

        let mut total_ms = 0f64;
        let mut last_unit = u64::MAX;
        while !rest.is_empty() {
            let num_end = rest
                .find(|c: char| c.is_ascii_alphabetic())
                .ok_or_else(|| format!("missing unit in duration {s:?}"))?;
            let (num, tail) = rest.split_at(num_end);
            let (unit_name, unit) = UNITS
                .iter()
                .find(|(name, _)| tail.starts_with(name))
                .copied()
                .ok_or_else(|| format!("unknown unit in duration {s:?}, only d, h, m, s, ms"))?;
            if unit >= last_unit {
                return Err(format!("units of duration {s:?} must be in descending order"));
            }

            let value = num
                .trim()
                .parse::<f64>()
                .map_err(|e| format!("invalid number in duration {s:?}, err:{e}"))?;
            if value.is_sign_negative() {
                return Err(format!("duration {s:?} is negative"));
            }
            total_ms += value * unit as f64;
            last_unit = unit;
            rest = tail[unit_name.len()..].trim_start();
        }

        Ok(Self(Duration::from_millis(total_ms as u64)))
    }
}

impl fmt::Display for ReadableDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut left = self.as_millis();
        if left == 0 {
            return f.write_str("0s");
        }
        for (name, unit) in [("d", DAY), ("h", HOUR), ("m", MINUTE), ("s", SECOND), ("ms", MS)] {
            if left >= unit {
                write!(f, "{}{name}", left / unit)?;
                left %= unit;
            }
        }
        Ok(())
    }
}

impl Serialize for ReadableDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReadableDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
