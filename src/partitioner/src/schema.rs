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

//! Ordered table schema, read from a JSON column manifest.
//!
//! A manifest looks like:
//! ```json
//! { "userid": "integer", "movieid": "integer", "rating": "real" }
//! ```
//! Key order is the column order of every relation built from it.

use std::{
    fmt,
    path::Path,
    sync::{Arc, LazyLock},
};

use arrow::datatypes::{DataType, Field, Schema as ArrowSchema, SchemaRef, TimeUnit};
use itertools::Itertools;
use regex::Regex;

use crate::{ensure, ident::Ident, Error, Result};

// Plain type names with optional modifiers and array suffixes, e.g.
// `timestamp(3) with time zone`, `numeric(10, 2)`, `public.label` or
// `integer[]`. Nothing that could end the column definition.
static TYPE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z_][A-Za-z0-9_ .]*(\(\s*[0-9]+\s*(,\s*[0-9]+\s*)?\))?[A-Za-z0-9_ ]*(\[[0-9]*\])*$",
    )
    .unwrap()
});

/// Coarse classification of an engine type string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeFamily {
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Numeric,
    Text,
    Boolean,
    Date,
    Timestamp,
    /// Any other engine type, e.g. `uuid`, `jsonb` or an array. Passed to the
    /// engine as written, the memory engine keeps such values as text.
    Other,
}

impl TypeFamily {
    fn parse(raw: &str) -> Result<Self> {
        let lowered = raw.to_ascii_lowercase();
        if lowered.ends_with(']') {
            return Ok(Self::Other);
        }

        // Split off type modifiers such as `(20)` or `(10, 2)`.
        let (base, modifier) = match (lowered.find('('), lowered.rfind(')')) {
            (Some(l), Some(r)) if l < r => (
                format!("{}{}", &lowered[..l], &lowered[r + 1..]),
                Some(lowered[l + 1..r].trim().to_string()),
            ),
            _ => (lowered.clone(), None),
        };
        let base = base.split_whitespace().join(" ");

        let family = match base.as_str() {
            "smallint" | "int2" | "smallserial" | "serial2" => Self::SmallInt,
            "integer" | "int" | "int4" | "serial" | "serial4" => Self::Integer,
            "bigint" | "int8" | "bigserial" | "serial8" => Self::BigInt,
            "real" | "float4" => Self::Real,
            "double precision" | "float8" => Self::Double,
            "float" => Self::parse_float_precision(raw, modifier.as_deref())?,
            "numeric" | "decimal" => Self::Numeric,
            "text" | "varchar" | "character varying" | "char" | "character" | "bpchar" => {
                Self::Text
            }
            "boolean" | "bool" => Self::Boolean,
            "date" => Self::Date,
            s if s.starts_with("timestamp") => Self::Timestamp,
            _ => Self::Other,
        };

        Ok(family)
    }

    /// `float(1)` to `float(24)` is a `real`, up to `float(53)` and a bare
    /// `float` is a `double precision`.
    fn parse_float_precision(raw: &str, modifier: Option<&str>) -> Result<Self> {
        let Some(modifier) = modifier else {
            return Ok(Self::Double);
        };
        match modifier.parse::<u32>() {
            Ok(1..=24) => Ok(Self::Real),
            Ok(25..=53) => Ok(Self::Double),
            _ => Err(Error::Schema(format!(
                "precision of {raw:?} must be between 1 and 53"
            ))),
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::SmallInt | Self::Integer | Self::BigInt)
    }

    /// Largest value an integer family can hold.
    pub fn integer_max(&self) -> Option<i64> {
        match self {
            Self::SmallInt => Some(i16::MAX as i64),
            Self::Integer => Some(i32::MAX as i64),
            Self::BigInt => Some(i64::MAX),
            _ => None,
        }
    }

    pub fn is_fractional(&self) -> bool {
        matches!(self, Self::Real | Self::Double | Self::Numeric)
    }

    /// Arrow type used by the in-memory engine. `numeric` is approximated by
    /// a 64-bit float there.
    pub fn arrow_type(&self) -> DataType {
        match self {
            Self::SmallInt => DataType::Int16,
            Self::Integer => DataType::Int32,
            Self::BigInt => DataType::Int64,
            Self::Real => DataType::Float32,
            Self::Double | Self::Numeric => DataType::Float64,
            Self::Text | Self::Other => DataType::Utf8,
            Self::Boolean => DataType::Boolean,
            Self::Date => DataType::Date32,
            Self::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
        }
    }
}

/// Engine type string, kept verbatim, plus its family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnType {
    raw: String,
    family: TypeFamily,
}

impl ColumnType {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        ensure!(
            TYPE_PATTERN.is_match(raw),
            Error::Schema(format!("type {raw:?} contains unsupported characters"))
        );
        let family = TypeFamily::parse(raw)?;

        Ok(Self {
            raw: raw.to_string(),
            family,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn family(&self) -> TypeFamily {
        self.family
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: Ident,
    pub ty: ColumnType,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<ColumnDef>,
}

impl Schema {
    pub fn try_new(columns: Vec<ColumnDef>) -> Result<Self> {
        ensure!(
            !columns.is_empty(),
            Error::Schema("schema has no columns".to_string())
        );
        let duplicated = columns.iter().map(|c| &c.name).duplicates().next();
        if let Some(name) = duplicated {
            return Err(Error::Schema(format!("column {name} is declared twice")));
        }

        Ok(Self { columns })
    }

    /// Builds a schema from `(name, type)` pairs, in order.
    pub fn from_pairs<I, N, T>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (N, T)>,
        N: Into<String>,
        T: AsRef<str>,
    {
        let columns = pairs
            .into_iter()
            .map(|(name, ty)| {
                Ok(ColumnDef {
                    name: Ident::new(name)?,
                    ty: ColumnType::parse(ty.as_ref())?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Self::try_new(columns)
    }

    pub fn from_manifest_str(manifest: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(manifest)
            .map_err(|e| Error::Schema(format!("manifest is not valid json, err:{e}")))?;
        let object = value
            .as_object()
            .ok_or_else(|| Error::Schema("manifest must be a json object".to_string()))?;

        let mut pairs = Vec::with_capacity(object.len());
        for (name, ty) in object {
            let ty = ty.as_str().ok_or_else(|| {
                Error::Schema(format!("type of column {name} must be a string, got:{ty}"))
            })?;
            pairs.push((name.clone(), ty));
        }

        Self::from_pairs(pairs)
    }

    pub fn from_manifest_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let body = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_manifest_str(&body)
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<Ident> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &Ident) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| &c.name == name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn to_arrow(&self) -> SchemaRef {
        let fields = self
            .columns
            .iter()
            .map(|c| Field::new(c.name.as_str(), c.ty.family().arrow_type(), true))
            .collect::<Vec<_>>();

        Arc::new(ArrowSchema::new(fields))
    }

    /// Checks that `actual`, the schema reported by the engine for `table`,
    /// has the same columns in the same order with the same type families.
    pub fn check_matches(&self, table: &Ident, actual: &Schema) -> Result<()> {
        let mismatch = |detail: String| Error::SchemaMismatch {
            table: table.to_string(),
            detail,
        };

        if self.len() != actual.len() {
            return Err(mismatch(format!(
                "expect {} columns, found {}",
                self.len(),
                actual.len()
            )));
        }
        for (pos, (expect, found)) in self.columns.iter().zip(&actual.columns).enumerate() {
            if expect.name != found.name {
                return Err(mismatch(format!(
                    "column {pos} is {}, expect {}",
                    found.name, expect.name
                )));
            }
            if expect.ty.family() != found.ty.family() {
                return Err(mismatch(format!(
                    "column {} has type {}, expect {}",
                    expect.name, found.ty, expect.ty
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use temp_dir::TempDir;

    use super::*;

    #[test]
    fn test_manifest_keeps_key_order() {
        let manifest = r#"{"zeta": "integer", "alpha": "text", "mid": "double precision"}"#;
        let schema = Schema::from_manifest_str(manifest).unwrap();
        let names = schema
            .column_names()
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(schema.columns()[2].ty.raw(), "double precision");

        let arrow = schema.to_arrow();
        assert_eq!(arrow.field(0).data_type(), &DataType::Int32);
        assert_eq!(arrow.field(1).data_type(), &DataType::Utf8);
        assert_eq!(arrow.field(2).data_type(), &DataType::Float64);
    }

    #[test]
    fn test_manifest_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.child("header.json");
        std::fs::write(&path, r#"{"userid": "int", "rating": "numeric(3, 1)"}"#).unwrap();

        let schema = Schema::from_manifest_path(&path).unwrap();
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.columns()[1].ty.family(), TypeFamily::Numeric);

        let missing = Schema::from_manifest_path(dir.child("missing.json"));
        assert!(matches!(missing, Err(Error::Io { .. })));
    }

    #[test]
    fn test_bad_manifests() {
        let testcases = [
            "not json",
            "[1, 2]",
            "{}",
            r#"{"a": 1}"#,
            r#"{"a": "integer; drop table x"}"#,
            r#"{"a": "text'); drop table x; --"}"#,
            r#"{"a": "float(54)"}"#,
            r#"{"a": "float(0)"}"#,
        ];
        for manifest in testcases {
            let res = Schema::from_manifest_str(manifest);
            assert!(matches!(res, Err(Error::Schema(_))), "{manifest}: {res:?}");
        }

        // Invalid column names come back as identifier errors.
        let res = Schema::from_manifest_str(r#"{"1a": "integer"}"#);
        assert!(matches!(res, Err(Error::InvalidIdentifier(_))));
    }

    #[test]
    fn test_type_families() {
        let testcases = [
            ("INTEGER", TypeFamily::Integer),
            ("bigserial", TypeFamily::BigInt),
            ("character varying(20)", TypeFamily::Text),
            ("Double  Precision", TypeFamily::Double),
            ("timestamp(3) without time zone", TypeFamily::Timestamp),
            ("bool", TypeFamily::Boolean),
            ("float", TypeFamily::Double),
            ("float(24)", TypeFamily::Real),
            ("float(25)", TypeFamily::Double),
            ("uuid", TypeFamily::Other),
            ("jsonb", TypeFamily::Other),
            ("time", TypeFamily::Other),
            ("bytea", TypeFamily::Other),
            ("interval day to second(3)", TypeFamily::Other),
            ("integer[]", TypeFamily::Other),
            ("varchar(20)[]", TypeFamily::Other),
            ("public.label", TypeFamily::Other),
        ];
        for (raw, expected) in testcases {
            assert_eq!(ColumnType::parse(raw).unwrap().family(), expected, "{raw}");
        }
        assert!(TypeFamily::BigInt.is_integer());
        assert!(TypeFamily::Numeric.is_fractional());
        assert!(!TypeFamily::Date.is_integer());
        assert!(!TypeFamily::Other.is_integer());
        assert_eq!(TypeFamily::SmallInt.integer_max(), Some(32767));
        assert_eq!(TypeFamily::Text.integer_max(), None);
        assert!(!TypeFamily::Other.is_fractional());
        assert_eq!(TypeFamily::Other.arrow_type(), DataType::Utf8);
        assert_eq!(ColumnType::parse(" jsonb ").unwrap().raw(), "jsonb");
    }

    #[test]
    fn test_check_matches() {
        let table = Ident::new("ratings").unwrap();
        let expected = Schema::from_pairs([("id", "integer"), ("value", "integer")]).unwrap();

        let same_family = Schema::from_pairs([("id", "int4"), ("value", "serial")]).unwrap();
        expected.check_matches(&table, &same_family).unwrap();

        let testcases = [
            Schema::from_pairs([("id", "integer")]).unwrap(),
            Schema::from_pairs([("value", "integer"), ("id", "integer")]).unwrap(),
            Schema::from_pairs([("id", "integer"), ("value", "text")]).unwrap(),
        ];
        for actual in testcases {
            let res = expected.check_matches(&table, &actual);
            assert!(matches!(res, Err(Error::SchemaMismatch { .. })));
        }

        let dup = Schema::from_pairs([("id", "integer"), ("id", "text")]);
        assert!(matches!(dup, Err(Error::Schema(_))));
    }
}
