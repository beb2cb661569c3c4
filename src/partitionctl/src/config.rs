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

use std::{fs, path::Path};

use anyhow::Context;
use common::ReadableDuration;
use partitioner::postgres::PostgresOptions;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub backend: BackendConfig,
}

impl Config {
    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let body = fs::read_to_string(path)
            .with_context(|| format!("read config file {path:?}"))?;
        toml::from_str(&body).with_context(|| format!("parse config file {path:?}"))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(tag = "type", deny_unknown_fields)]
pub enum BackendConfig {
    /// Tables live in this process only.
    #[default]
    Memory,
    Postgres(PostgresConfig),
}

impl BackendConfig {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres(_) => "postgres",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub connect_timeout: ReadableDuration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        let opts = PostgresOptions::default();
        Self {
            host: opts.host,
            port: opts.port,
            user: opts.user,
            password: opts.password,
            database: opts.database,
            connect_timeout: opts.connect_timeout.into(),
        }
    }
}

impl From<&PostgresConfig> for PostgresOptions {
    fn from(config: &PostgresConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
            password: config.password.clone(),
            database: config.database.clone(),
            connect_timeout: config.connect_timeout.into(),
        }
    }
}
