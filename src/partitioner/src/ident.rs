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

//! Validated relation and column identifiers.
//!
//! Every name that ends up inside a statement goes through [`Ident::new`], so
//! statements never interpolate an unchecked string.

use std::{fmt, sync::LazyLock};

use regex::Regex;

use crate::{Error, Result};

/// PostgreSQL truncates identifiers longer than `NAMEDATALEN - 1` bytes.
pub const MAX_IDENT_LEN: usize = 63;

static IDENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ident(String);

impl Ident {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.len() > MAX_IDENT_LEN || !IDENT_PATTERN.is_match(&name) {
            return Err(Error::InvalidIdentifier(name));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the `index`-th child, `<self><index>`.
    pub fn child(&self, index: usize) -> Result<Ident> {
        Ident::new(format!("{}{}", self.0, index))
    }

    /// All children `<self>0..<self>(num - 1)`.
    pub fn children(&self, num: usize) -> Result<Vec<Ident>> {
        (0..num).map(|i| self.child(i)).collect()
    }

    /// Double-quoted form for SQL text. Validated identifiers never contain a
    /// quote, so no escaping is needed.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Ident {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Ident {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Ident::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_and_reject() {
        for name in ["ratings", "_tmp", "Part_2", "a1"] {
            assert!(Ident::new(name).is_ok(), "{name} should be accepted");
        }

        let long = "x".repeat(MAX_IDENT_LEN + 1);
        for name in [
            "",
            "1abc",
            "drop table x; --",
            "a-b",
            "na\"me",
            "tbl.col",
            long.as_str(),
        ] {
            assert!(
                matches!(Ident::new(name), Err(Error::InvalidIdentifier(_))),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_child_names() {
        let target = Ident::new("range_part").unwrap();
        let names = target
            .children(3)
            .unwrap()
            .into_iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["range_part0", "range_part1", "range_part2"]);
        assert_eq!(target.child(10).unwrap().as_str(), "range_part10");
        assert_eq!(target.quoted(), "\"range_part\"");

        // Suffix pushes the child over the length limit.
        let target = Ident::new("y".repeat(MAX_IDENT_LEN)).unwrap();
        assert!(target.child(0).is_err());
    }
}
