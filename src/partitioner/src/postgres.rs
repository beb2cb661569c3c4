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

//! PostgreSQL backend.
//!
//! Statements are rendered to SQL text with every identifier double-quoted.
//! Range partitions use declarative partitioning, round-robin children use
//! table inheritance plus a cyclic sequence and a PL/pgSQL before-insert
//! trigger per call.

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use itertools::Itertools;
use sqlx::{
    postgres::{PgConnectOptions, PgConnection},
    ConnectOptions, Connection as _, Executor,
};
use tracing::{debug, info};

use crate::{
    boundary::RangeBound,
    connection::{Connection, RelationInfo},
    ident::Ident,
    schema::{ColumnDef, ColumnType, Schema},
    statement::{Statement, TableLayout},
    Error, Result,
};

#[derive(Clone, Debug)]
pub struct PostgresOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub connect_timeout: Duration,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            database: "postgres".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl PostgresOptions {
    fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

pub struct PostgresConnection {
    conn: PgConnection,
    in_transaction: bool,
}

impl PostgresConnection {
    pub async fn connect(opts: &PostgresOptions) -> Result<Self> {
        let endpoint = opts.endpoint();
        let connect_opts = PgConnectOptions::new()
            .host(&opts.host)
            .port(opts.port)
            .username(&opts.user)
            .password(&opts.password)
            .database(&opts.database);

        let conn = match tokio::time::timeout(opts.connect_timeout, connect_opts.connect()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(source)) => return Err(Error::Connection { endpoint, source }),
            Err(_) => {
                let source = sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect timeout after {:?}", opts.connect_timeout),
                ));
                return Err(Error::Connection { endpoint, source });
            }
        };
        info!(endpoint, "Connected to postgres");

        Ok(Self {
            conn,
            in_transaction: false,
        })
    }

    pub async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }

    async fn begin_if_needed(&mut self) -> Result<()> {
        if !self.in_transaction {
            Executor::execute(&mut self.conn, "BEGIN").await?;
            self.in_transaction = true;
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn execute(&mut self, stmt: &Statement) -> Result<u64> {
        let sqls = render(stmt)?;
        self.begin_if_needed().await?;

        let mut affected = 0;
        for sql in sqls {
            debug!(sql, "Execute postgres statement");
            let res = Executor::execute(&mut self.conn, sql.as_str()).await?;
            affected += res.rows_affected();
        }

        Ok(affected)
    }

    async fn min_max(&mut self, table: &Ident, column: &Ident) -> Result<Option<(i64, i64)>> {
        let sql = format!(
            "SELECT MIN({c})::BIGINT, MAX({c})::BIGINT FROM {t}",
            c = column.quoted(),
            t = table.quoted()
        );
        let (min, max) = sqlx::query_as::<_, (Option<i64>, Option<i64>)>(&sql)
            .fetch_one(&mut self.conn)
            .await?;

        Ok(min.zip(max))
    }

    async fn relation(&mut self, name: &Ident) -> Result<Option<RelationInfo>> {
        let columns = sqlx::query_as::<_, (String, String)>(
            "SELECT a.attname::TEXT, format_type(a.atttypid, a.atttypmod) \
             FROM pg_attribute a \
             WHERE a.attrelid = to_regclass($1::TEXT) AND a.attnum > 0 AND NOT a.attisdropped \
             ORDER BY a.attnum",
        )
        .bind(name.quoted())
        .fetch_all(&mut self.conn)
        .await?;
        if columns.is_empty() {
            return Ok(None);
        }

        let mismatch = |e: Error| Error::SchemaMismatch {
            table: name.to_string(),
            detail: e.to_string(),
        };
        let columns = columns
            .into_iter()
            .map(|(col, ty)| {
                Ok(ColumnDef {
                    name: Ident::new(col)?,
                    ty: ColumnType::parse(&ty)?,
                })
            })
            .collect::<Result<Vec<_>>>()
            .map_err(mismatch)?;
        let schema = Schema::try_new(columns).map_err(mismatch)?;

        let parent = sqlx::query_as::<_, (String,)>(
            "SELECT p.relname::TEXT FROM pg_inherits i \
             JOIN pg_class p ON p.oid = i.inhparent \
             WHERE i.inhrelid = to_regclass($1::TEXT)",
        )
        .bind(name.quoted())
        .fetch_optional(&mut self.conn)
        .await?
        .map(|(parent,)| Ident::new(parent))
        .transpose()?;

        Ok(Some(RelationInfo { schema, parent }))
    }

    async fn count_rows(&mut self, name: &Ident) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", name.quoted());
        let (count,) = sqlx::query_as::<_, (i64,)>(&sql)
            .fetch_one(&mut self.conn)
            .await?;

        Ok(count as u64)
    }

    async fn copy_from_csv(
        &mut self,
        table: &Ident,
        schema: &Schema,
        path: &Path,
    ) -> Result<u64> {
        let body = tokio::fs::read(path).await.map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        // The first line is a header.
        let data = match body.iter().position(|b| *b == b'\n') {
            Some(pos) => &body[pos + 1..],
            None => &[][..],
        };

        self.begin_if_needed().await?;
        let sql = format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT csv)",
            table.quoted(),
            schema.columns().iter().map(|c| c.name.quoted()).join(", ")
        );
        let mut copy = self.conn.copy_in_raw(&sql).await?;
        if let Err(e) = copy.send(data).await {
            copy.abort(e.to_string()).await?;
            return Err(e.into());
        }
        let rows = copy.finish().await?;

        Ok(rows)
    }

    async fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            Executor::execute(&mut self.conn, "COMMIT").await?;
            self.in_transaction = false;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.in_transaction {
            Executor::execute(&mut self.conn, "ROLLBACK").await?;
            self.in_transaction = false;
        }
        Ok(())
    }
}

fn column_list(schema: &Schema) -> String {
    schema
        .columns()
        .iter()
        .map(|c| format!("{} {}", c.name.quoted(), c.ty.raw()))
        .join(", ")
}

fn bound_value(value: Option<i64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "MAXVALUE".to_string(),
    }
}

/// Name of the trigger function routing rows for `cursor`.
fn route_function(cursor: &Ident) -> Result<Ident> {
    Ident::new(format!("{cursor}_route"))
}

/// Renders a statement into one or more SQL statements, executed in order.
pub fn render(stmt: &Statement) -> Result<Vec<String>> {
    let sqls = match stmt {
        Statement::DropTable { name, cascade } => {
            let behavior = if *cascade { "CASCADE" } else { "RESTRICT" };
            vec![format!("DROP TABLE IF EXISTS {} {behavior}", name.quoted())]
        }
        Statement::CreateTable {
            name,
            schema,
            layout,
            if_not_exists,
        } => {
            let create = if *if_not_exists {
                "CREATE TABLE IF NOT EXISTS"
            } else {
                "CREATE TABLE"
            };
            let name = name.quoted();
            let sql = match layout {
                TableLayout::Plain => format!("{create} {name} ({})", column_list(schema)),
                TableLayout::PartitionedByRange { column } => format!(
                    "{create} {name} ({}) PARTITION BY RANGE ({})",
                    column_list(schema),
                    column.quoted()
                ),
                TableLayout::RangePartitionOf {
                    parent,
                    bound: RangeBound { start, end },
                } => format!(
                    "{create} {name} PARTITION OF {} FOR VALUES FROM ({start}) TO ({})",
                    parent.quoted(),
                    bound_value(*end)
                ),
                TableLayout::InheritsFrom { parent } => format!(
                    "{create} {name} (LIKE {p} INCLUDING ALL) INHERITS ({p})",
                    p = parent.quoted()
                ),
            };
            vec![sql]
        }
        Statement::CreateCursor { name, modulus } => {
            // A sequence needs MINVALUE < MAXVALUE, the trigger takes the
            // value modulo the partition count anyway.
            let max = modulus.saturating_sub(1).max(1);
            vec![format!(
                "CREATE SEQUENCE {} AS BIGINT MINVALUE 0 MAXVALUE {max} START 0 INCREMENT 1 CYCLE",
                name.quoted()
            )]
        }
        Statement::DropCursor { name } => {
            vec![format!("DROP SEQUENCE IF EXISTS {}", name.quoted())]
        }
        Statement::InstallRoundRobinRouter {
            parent,
            cursor,
            modulus,
        } => {
            let function = route_function(cursor)?.quoted();
            vec![
                format!(
                    "CREATE OR REPLACE FUNCTION {function}() RETURNS TRIGGER AS $route$
DECLARE
    slot BIGINT;
BEGIN
    slot := nextval('{cursor}') % {modulus};
    EXECUTE format('INSERT INTO %I SELECT ($1).*', TG_TABLE_NAME || slot::TEXT) USING NEW;
    RETURN NULL;
END;
$route$ LANGUAGE plpgsql",
                    cursor = cursor.quoted(),
                ),
                format!(
                    "CREATE TRIGGER {function} BEFORE INSERT ON {} \
                     FOR EACH ROW EXECUTE FUNCTION {function}()",
                    parent.quoted()
                ),
            ]
        }
        Statement::RemoveRoundRobinRouter { parent, cursor } => {
            let function = route_function(cursor)?.quoted();
            vec![
                format!(
                    "DROP TRIGGER IF EXISTS {function} ON {}",
                    parent.quoted()
                ),
                format!("DROP FUNCTION IF EXISTS {function}()"),
            ]
        }
        Statement::InsertSelect {
            target,
            source,
            columns,
        } => {
            let columns = columns.iter().map(|c| c.quoted()).join(", ");
            vec![format!(
                "INSERT INTO {} ({columns}) SELECT {columns} FROM {}",
                target.quoted(),
                source.quoted()
            )]
        }
    };

    Ok(sqls)
}
