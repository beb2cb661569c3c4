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

//! Best-effort removal of partition children.

use tracing::{info, warn};

use crate::{connection::Connection, ident::Ident, statement::Statement, Result};

async fn drop_child(conn: &mut dyn Connection, child: &Ident) -> Result<()> {
    conn.execute(&Statement::drop_table(child)).await?;
    conn.commit().await
}

/// Drops `<target>0` .. `<target>{num_partitions - 1}`, each in its own
/// transaction. Missing children are skipped silently. A failed drop is
/// logged and rolled back, and the remaining children are still attempted.
///
/// Returns the number of children whose drop succeeded.
pub async fn delete_partitions(
    conn: &mut dyn Connection,
    target: &Ident,
    num_partitions: usize,
) -> usize {
    let mut dropped = 0;
    for idx in 0..num_partitions {
        let child = match target.child(idx) {
            Ok(v) => v,
            Err(e) => {
                warn!(target = %target, idx, "Skip partition, err:{e}");
                continue;
            }
        };

        match drop_child(conn, &child).await {
            Ok(()) => dropped += 1,
            Err(e) => {
                warn!(partition = %child, "Failed to drop partition, err:{e}");
                if let Err(e) = conn.rollback().await {
                    warn!(partition = %child, "Failed to rollback, err:{e}");
                }
            }
        }
    }
    info!(target = %target, num_partitions, dropped, "Partitions deleted");

    dropped
}
