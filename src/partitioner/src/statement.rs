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

//! Typed statements issued by the partitioners.
//!
//! Backends either interpret them directly ([`crate::memory`]) or render
//! them into SQL text ([`crate::postgres`]). All names are [`Ident`]s, so no
//! backend ever sees an unchecked string.

use crate::{boundary::RangeBound, ident::Ident, schema::Schema};

/// How a newly created table relates to other relations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TableLayout {
    /// A standalone table.
    Plain,
    /// Parent whose rows are stored in range partitions on `column`.
    PartitionedByRange { column: Ident },
    /// Range partition of `parent` holding `bound`.
    RangePartitionOf { parent: Ident, bound: RangeBound },
    /// Sibling with the parent's structure that is scanned as part of it.
    InheritsFrom { parent: Ident },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Statement {
    DropTable {
        name: Ident,
        cascade: bool,
    },
    CreateTable {
        name: Ident,
        schema: Schema,
        layout: TableLayout,
        if_not_exists: bool,
    },
    /// Cyclic counter over `[0, modulus)` starting at 0.
    CreateCursor {
        name: Ident,
        modulus: usize,
    },
    DropCursor {
        name: Ident,
    },
    /// Before-insert hook on `parent`: every row takes the cursor's next
    /// value `i` and is redirected into `<parent><i>`.
    InstallRoundRobinRouter {
        parent: Ident,
        cursor: Ident,
        modulus: usize,
    },
    RemoveRoundRobinRouter {
        parent: Ident,
        cursor: Ident,
    },
    /// `INSERT INTO target (columns) SELECT columns FROM source`.
    InsertSelect {
        target: Ident,
        source: Ident,
        columns: Vec<Ident>,
    },
}

impl Statement {
    pub fn drop_table(name: &Ident) -> Self {
        Self::DropTable {
            name: name.clone(),
            cascade: true,
        }
    }

    pub fn create_table(name: &Ident, schema: &Schema, layout: TableLayout) -> Self {
        Self::CreateTable {
            name: name.clone(),
            schema: schema.clone(),
            layout,
            if_not_exists: false,
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DropTable { .. } => "drop_table",
            Self::CreateTable { .. } => "create_table",
            Self::CreateCursor { .. } => "create_cursor",
            Self::DropCursor { .. } => "drop_cursor",
            Self::InstallRoundRobinRouter { .. } => "install_router",
            Self::RemoveRoundRobinRouter { .. } => "remove_router",
            Self::InsertSelect { .. } => "insert_select",
        }
    }
}
