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

mod cmd;
mod config;

use clap::Parser;
use tracing::{error, info};

use crate::{cmd::App, config::Config};

fn main() {
    tracing_subscriber::fmt()
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::LocalTime::rfc_3339())
        .init();

    let app = App::parse();
    let config = match &app.config {
        Some(path) => match Config::from_path(path) {
            Ok(v) => v,
            Err(e) => {
                error!("Load config failed, err:{e:#}");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    info!(backend = config.backend.name(), "Config loaded");

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("build tokio runtime");
    match rt.block_on(cmd::run(app.command, &config)) {
        Ok(output) => println!("{output}"),
        Err(e) => {
            error!("Command failed, err:{e:#}");
            std::process::exit(1);
        }
    }
}
