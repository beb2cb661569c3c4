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

//! Round-robin partitioning through an insert hook on the parent.
//!
//! Children inherit from the parent, so a scan of the parent returns every
//! row. While the copy runs, a before-insert hook pulls the next value of a
//! cyclic cursor for each row and redirects the row into that child. Cursor
//! and hook only live for the duration of one run.

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    connection::{
        check_source, check_target_names, execute_all, rollback_on_error, Connection,
        PartitionInfo,
    },
    ensure,
    ident::Ident,
    schema::Schema,
    statement::{Statement, TableLayout},
    Error, PartitionReport, Result,
};

#[derive(Clone, Debug)]
pub struct RoundRobinPartitionRequest {
    pub source: Ident,
    pub target: Ident,
    pub num_partitions: usize,
    pub schema: Schema,
}

/// A cursor name no other run can hold at the same time.
fn cursor_name() -> Result<Ident> {
    Ident::new(format!("rr_{}", Uuid::new_v4().simple()))
}

/// Recreates `target` with `num_partitions` children and deals the rows of
/// `source` into them in source scan order: row `k` lands in child
/// `k mod num_partitions`.
///
/// The layout and the hook are committed before the copy starts, the copy
/// and the removal of the hook are committed together afterwards. When the
/// copy fails it is rolled back and the hook is removed in its own commit,
/// leaving empty partitions for [`crate::delete_partitions`].
pub async fn partition_round_robin(
    conn: &mut dyn Connection,
    req: &RoundRobinPartitionRequest,
) -> Result<PartitionReport> {
    let res = do_partition_round_robin(conn, req).await;
    rollback_on_error(conn, res).await
}

async fn remove_router(conn: &mut dyn Connection, parent: &Ident, cursor: &Ident) -> Result<()> {
    execute_all(
        conn,
        [
            Statement::RemoveRoundRobinRouter {
                parent: parent.clone(),
                cursor: cursor.clone(),
            },
            Statement::DropCursor {
                name: cursor.clone(),
            },
        ],
    )
    .await
}

async fn copy_rows(
    conn: &mut dyn Connection,
    req: &RoundRobinPartitionRequest,
    cursor: &Ident,
) -> Result<()> {
    conn.execute(&Statement::InsertSelect {
        target: req.target.clone(),
        source: req.source.clone(),
        columns: req.schema.column_names(),
    })
    .await?;
    remove_router(conn, &req.target, cursor).await?;
    conn.commit().await
}

/// Takes down the committed hook and cursor after a failed copy.
async fn abandon_copy(conn: &mut dyn Connection, parent: &Ident, cursor: &Ident) {
    if let Err(e) = conn.rollback().await {
        warn!(parent = %parent, "Failed to rollback copy, err:{e}");
    }

    let res = match remove_router(conn, parent, cursor).await {
        Ok(()) => conn.commit().await,
        Err(e) => Err(e),
    };
    if let Err(e) = res {
        warn!(parent = %parent, cursor = %cursor, "Failed to remove round-robin hook, err:{e}");
        if let Err(e) = conn.rollback().await {
            warn!(parent = %parent, "Failed to rollback hook removal, err:{e}");
        }
    }
}

async fn do_partition_round_robin(
    conn: &mut dyn Connection,
    req: &RoundRobinPartitionRequest,
) -> Result<PartitionReport> {
    ensure!(
        req.num_partitions > 0,
        Error::PartitionCount(req.num_partitions)
    );
    let children = req.target.children(req.num_partitions)?;
    check_target_names(&req.source, &req.target, &children)?;
    check_source(conn, &req.source, &req.schema).await?;

    let cursor = cursor_name()?;
    info!(
        source = %req.source,
        target = %req.target,
        num_partitions = req.num_partitions,
        cursor = %cursor,
        "Round-robin partitioning started"
    );

    // Children that outlived an earlier parent would keep stale rows.
    let mut stmts = vec![Statement::drop_table(&req.target)];
    stmts.extend(children.iter().map(Statement::drop_table));
    stmts.push(Statement::create_table(
        &req.target,
        &req.schema,
        TableLayout::Plain,
    ));
    stmts.extend(children.iter().map(|child| {
        Statement::create_table(
            child,
            &req.schema,
            TableLayout::InheritsFrom {
                parent: req.target.clone(),
            },
        )
    }));
    stmts.push(Statement::CreateCursor {
        name: cursor.clone(),
        modulus: req.num_partitions,
    });
    stmts.push(Statement::InstallRoundRobinRouter {
        parent: req.target.clone(),
        cursor: cursor.clone(),
        modulus: req.num_partitions,
    });
    execute_all(conn, stmts).await?;
    conn.commit().await?;

    if let Err(e) = copy_rows(conn, req, &cursor).await {
        abandon_copy(conn, &req.target, &cursor).await;
        return Err(e);
    }

    // Rows redirected by the hook are not reported as inserted by every
    // engine, count what actually landed.
    let rows = conn.count_rows(&req.target).await?;
    info!(target = %req.target, rows, "Round-robin partitioning finished");

    Ok(PartitionReport {
        target: req.target.clone(),
        partitions: children
            .into_iter()
            .map(|name| PartitionInfo { name, bound: None })
            .collect(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::{
        delete_partitions,
        memory::MemoryEngine,
        record_batch,
        test_util::{int_values, AbortingConnection},
    };

    fn ident(name: &str) -> Ident {
        Ident::new(name).unwrap()
    }

    async fn staged_engine(ids: Vec<i32>) -> (MemoryEngine, Schema) {
        let engine = MemoryEngine::new();
        let schema = Schema::from_pairs([("id", "integer"), ("name", "text")]).unwrap();
        let mut conn = engine.connect();
        conn.execute(&Statement::create_table(
            &ident("src"),
            &schema,
            TableLayout::Plain,
        ))
        .await
        .unwrap();
        conn.commit().await.unwrap();

        let names = ids.iter().map(|id| format!("row{id}")).collect::<Vec<_>>();
        let batch = record_batch!(("id", Int32, ids), ("name", Utf8, names)).unwrap();
        engine.insert(&ident("src"), batch).await.unwrap();

        (engine, schema)
    }

    fn request(schema: &Schema, num_partitions: usize) -> RoundRobinPartitionRequest {
        RoundRobinPartitionRequest {
            source: ident("src"),
            target: ident("rr_part"),
            num_partitions,
            schema: schema.clone(),
        }
    }

    async fn distribution(engine: &MemoryEngine, n: usize) -> Vec<Vec<i64>> {
        distribution_of(engine, &ident("rr_part"), n).await
    }

    async fn distribution_of(engine: &MemoryEngine, target: &Ident, n: usize) -> Vec<Vec<i64>> {
        let mut ids = Vec::with_capacity(n);
        for child in target.children(n).unwrap() {
            ids.push(int_values(&engine.scan(&child).await.unwrap(), "id"));
        }
        ids
    }

    #[test(tokio::test)]
    async fn test_round_robin_example() {
        let (engine, schema) = staged_engine(vec![1, 2, 3, 4, 5]).await;
        let mut conn = engine.connect();

        let report = partition_round_robin(&mut conn, &request(&schema, 2))
            .await
            .unwrap();
        assert_eq!(report.rows, 5);
        assert_eq!(report.to_string(), "5 rows into rr_part [rr_part0, rr_part1]");
        assert_eq!(
            distribution(&engine, 2).await,
            vec![vec![1, 3, 5], vec![2, 4]]
        );

        let parent = engine.scan(&ident("rr_part")).await.unwrap();
        assert_eq!(int_values(&parent, "id"), vec![1, 3, 5, 2, 4]);
    }

    #[test(tokio::test)]
    async fn test_round_robin_is_balanced_and_idempotent() {
        let (engine, schema) = staged_engine((0..23).collect()).await;
        let mut conn = engine.connect();

        partition_round_robin(&mut conn, &request(&schema, 4))
            .await
            .unwrap();
        let first = distribution(&engine, 4).await;
        let sizes = first.iter().map(|c| c.len()).collect::<Vec<_>>();
        assert_eq!(sizes, vec![6, 6, 6, 5]);

        partition_round_robin(&mut conn, &request(&schema, 4))
            .await
            .unwrap();
        assert_eq!(distribution(&engine, 4).await, first);
    }

    #[test(tokio::test)]
    async fn test_round_robin_cleans_up_cursor() {
        let (engine, schema) = staged_engine(vec![1, 2, 3]).await;
        let mut conn = engine.connect();

        partition_round_robin(&mut conn, &request(&schema, 1))
            .await
            .unwrap();
        assert_eq!(distribution(&engine, 1).await, vec![vec![1, 2, 3]]);
        assert_eq!(engine.num_cursors().await, 0);

        let names = engine.table_names().await;
        assert_eq!(
            names,
            vec![ident("src"), ident("rr_part"), ident("rr_part0")]
        );

        // Inserting after the run no longer redirects rows.
        let batch = record_batch!(("id", Int32, vec![9]), ("name", Utf8, vec!["late"])).unwrap();
        engine.insert(&ident("rr_part"), batch).await.unwrap();
        assert_eq!(distribution(&engine, 1).await, vec![vec![1, 2, 3]]);
    }

    #[test(tokio::test)]
    async fn test_fewer_rows_than_partitions() {
        let (engine, schema) = staged_engine(vec![7, 8]).await;
        let mut conn = engine.connect();

        let report = partition_round_robin(&mut conn, &request(&schema, 4))
            .await
            .unwrap();
        assert_eq!(report.rows, 2);
        assert_eq!(
            distribution(&engine, 4).await,
            vec![vec![7], vec![8], vec![], vec![]]
        );
    }

    #[test(tokio::test)]
    async fn test_round_robin_errors() {
        let (engine, schema) = staged_engine(vec![1]).await;
        let mut conn = engine.connect();

        let res = partition_round_robin(&mut conn, &request(&schema, 0)).await;
        assert!(matches!(res, Err(Error::PartitionCount(0))));

        let mut req = request(&schema, 2);
        req.target = ident("sr");
        req.source = ident("sr1");
        let res = partition_round_robin(&mut conn, &req).await;
        assert!(matches!(res, Err(Error::NameCollision { .. })));

        let mut req = request(&schema, 2);
        req.schema = Schema::from_pairs([("id", "integer")]).unwrap();
        let res = partition_round_robin(&mut conn, &req).await;
        assert!(matches!(res, Err(Error::SchemaMismatch { .. })));
    }

    #[test(tokio::test)]
    async fn test_runs_do_not_share_cursors() {
        let (engine, schema) = staged_engine(vec![1, 2, 3, 4, 5]).await;

        // A hook of another run that is still in flight, already advanced.
        let mut other = engine.connect();
        let live = ident("rr_live");
        let stmts = [
            Statement::create_table(&live, &schema, TableLayout::Plain),
            Statement::create_table(
                &live.child(0).unwrap(),
                &schema,
                TableLayout::InheritsFrom {
                    parent: live.clone(),
                },
            ),
            Statement::create_table(
                &live.child(1).unwrap(),
                &schema,
                TableLayout::InheritsFrom {
                    parent: live.clone(),
                },
            ),
            Statement::CreateCursor {
                name: ident("rr_live_cursor"),
                modulus: 2,
            },
            Statement::InstallRoundRobinRouter {
                parent: live.clone(),
                cursor: ident("rr_live_cursor"),
                modulus: 2,
            },
        ];
        execute_all(&mut other, stmts).await.unwrap();
        other.commit().await.unwrap();
        let batch = record_batch!(("id", Int32, vec![100]), ("name", Utf8, vec!["x"])).unwrap();
        engine.insert(&live, batch).await.unwrap();

        let mut first = engine.connect();
        let mut second = engine.connect();
        let mut req = request(&schema, 2);
        req.target = ident("rr_first");
        partition_round_robin(&mut first, &req).await.unwrap();
        let mut req = request(&schema, 3);
        req.target = ident("rr_second");
        partition_round_robin(&mut second, &req).await.unwrap();

        assert_eq!(
            distribution_of(&engine, &ident("rr_first"), 2).await,
            vec![vec![1, 3, 5], vec![2, 4]]
        );
        assert_eq!(
            distribution_of(&engine, &ident("rr_second"), 3).await,
            vec![vec![1, 4], vec![2, 5], vec![3]]
        );

        // The in-flight run kept its cursor and position.
        assert_eq!(engine.num_cursors().await, 1);
        let batch = record_batch!(("id", Int32, vec![101]), ("name", Utf8, vec!["y"])).unwrap();
        engine.insert(&live, batch).await.unwrap();
        assert_eq!(
            distribution_of(&engine, &live, 2).await,
            vec![vec![100], vec![101]]
        );
    }

    #[test(tokio::test)]
    async fn test_failed_copy_removes_hook() {
        let (engine, schema) = staged_engine(vec![1, 2, 3]).await;
        let mut conn = AbortingConnection::new(engine.connect());
        conn.fail_inserts = true;

        let res = partition_round_robin(&mut conn, &request(&schema, 2)).await;
        assert!(matches!(res, Err(Error::RoutingFailure { .. })), "{res:?}");
        assert_eq!(engine.num_cursors().await, 0);
        assert_eq!(distribution(&engine, 2).await, vec![Vec::<i64>::new(), Vec::<i64>::new()]);

        // Rows inserted later stay in the parent.
        let batch = record_batch!(("id", Int32, vec![9]), ("name", Utf8, vec!["late"])).unwrap();
        engine.insert(&ident("rr_part"), batch).await.unwrap();
        assert_eq!(distribution(&engine, 2).await, vec![Vec::<i64>::new(), Vec::<i64>::new()]);

        let rollbacks = conn.rollbacks;
        assert_eq!(delete_partitions(&mut conn, &ident("rr_part"), 2).await, 2);
        assert_eq!(conn.rollbacks, rollbacks);
        assert_eq!(
            engine.table_names().await,
            vec![ident("src"), ident("rr_part")]
        );
    }
}
