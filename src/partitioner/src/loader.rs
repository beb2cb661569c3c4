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

//! Bulk loading of a delimited file into a staging table.

use std::path::Path;

use tracing::info;

use crate::{
    connection::{check_source, rollback_on_error, Connection},
    ident::Ident,
    schema::Schema,
    statement::{Statement, TableLayout},
    Result,
};

/// Creates `table` with `schema` unless it already exists, then appends
/// every data row of `csv_path`.
///
/// The file starts with one header line which is skipped, values are
/// comma separated and map to the schema's columns by position. An existing
/// table must have exactly the schema's columns. Returns the number of rows
/// loaded.
pub async fn load_data(
    conn: &mut dyn Connection,
    table: &Ident,
    csv_path: &Path,
    schema: &Schema,
) -> Result<u64> {
    let res = do_load_data(conn, table, csv_path, schema).await;
    rollback_on_error(conn, res).await
}

async fn do_load_data(
    conn: &mut dyn Connection,
    table: &Ident,
    csv_path: &Path,
    schema: &Schema,
) -> Result<u64> {
    conn.execute(&Statement::CreateTable {
        name: table.clone(),
        schema: schema.clone(),
        layout: TableLayout::Plain,
        if_not_exists: true,
    })
    .await?;
    conn.commit().await?;
    check_source(conn, table, schema).await?;

    let rows = conn.copy_from_csv(table, schema, csv_path).await?;
    conn.commit().await?;
    info!(table = %table, path = ?csv_path, rows, "Data loaded");

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use arrow::array::AsArray;
    use temp_dir::TempDir;
    use test_log::test;

    use super::*;
    use crate::{memory::MemoryEngine, test_util::int_values, Error};

    fn ident(name: &str) -> Ident {
        Ident::new(name).unwrap()
    }

    fn ratings_schema() -> Schema {
        Schema::from_manifest_str(r#"{"userid": "integer", "movieid": "integer", "rating": "real"}"#)
            .unwrap()
    }

    #[test(tokio::test)]
    async fn test_load_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.child("ratings.csv");
        std::fs::write(&path, "userid,movieid,rating\n1,10,3.5\n2,20,4\n3,30,1.5\n").unwrap();

        let engine = MemoryEngine::new();
        let mut conn = engine.connect();
        let table = ident("ratings");
        let schema = ratings_schema();

        assert_eq!(load_data(&mut conn, &table, &path, &schema).await.unwrap(), 3);
        assert_eq!(load_data(&mut conn, &table, &path, &schema).await.unwrap(), 3);
        assert_eq!(conn.count_rows(&table).await.unwrap(), 6);

        let batches = engine.scan(&table).await.unwrap();
        assert_eq!(int_values(&batches, "movieid"), vec![10, 20, 30, 10, 20, 30]);
    }

    #[test(tokio::test)]
    async fn test_load_header_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.child("empty.csv");
        std::fs::write(&path, "userid,movieid,rating\n").unwrap();

        let engine = MemoryEngine::new();
        let mut conn = engine.connect();
        let table = ident("ratings");
        assert_eq!(
            load_data(&mut conn, &table, &path, &ratings_schema()).await.unwrap(),
            0
        );
        assert!(conn.relation(&table).await.unwrap().is_some());
    }

    #[test(tokio::test)]
    async fn test_load_errors() {
        let dir = TempDir::new().unwrap();
        let engine = MemoryEngine::new();
        let mut conn = engine.connect();
        let table = ident("ratings");

        let missing = dir.child("missing.csv");
        let res = load_data(&mut conn, &table, &missing, &ratings_schema()).await;
        assert!(matches!(res, Err(Error::Io { .. })), "{res:?}");

        let path = dir.child("ratings.csv");
        std::fs::write(&path, "userid\n1\n").unwrap();
        let other = Schema::from_pairs([("userid", "integer")]).unwrap();
        let res = load_data(&mut conn, &table, &path, &other).await;
        assert!(matches!(res, Err(Error::SchemaMismatch { .. })), "{res:?}");
    }

    #[test(tokio::test)]
    async fn test_load_engine_types_as_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.child("docs.csv");
        std::fs::write(
            &path,
            "id,key,doc\n1,8f14e45f-ceea-467f-a0e6-0b7b1d2f6a11,\"{\"\"a\"\": 1}\"\n",
        )
        .unwrap();

        let engine = MemoryEngine::new();
        let mut conn = engine.connect();
        let table = ident("docs");
        let schema =
            Schema::from_manifest_str(r#"{"id": "integer", "key": "uuid", "doc": "jsonb"}"#)
                .unwrap();

        assert_eq!(load_data(&mut conn, &table, &path, &schema).await.unwrap(), 1);
        assert_eq!(load_data(&mut conn, &table, &path, &schema).await.unwrap(), 1);

        let batches = engine.scan(&table).await.unwrap();
        let docs = batches[0].column_by_name("doc").unwrap().as_string::<i32>();
        assert_eq!(docs.value(0), r#"{"a": 1}"#);
    }
}
