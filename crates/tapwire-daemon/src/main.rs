// Copyright [2026] [Tapwire Contributors]
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// Copyright (c) 2026 Tapwire Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tonic::transport::{Endpoint, Server};
use tracing_subscriber::EnvFilter;

use tapwire_core::dispatch::DispatcherConfig;
use tapwire_daemon::app;

#[derive(Debug, Parser)]
#[command(name = "tapwire-daemon")]
#[command(about = "Interactive gRPC interception proxy")]
struct Args {
    /// Address the proxy listens on.
    #[arg(long, default_value = "127.0.0.1:50052")]
    listen: String,

    /// Backend endpoint the proxied service lives on.
    #[arg(long, default_value = "http://127.0.0.1:50051")]
    backend: String,

    /// Case-insensitive substring of method names to hold for release.
    /// Empty disables interception.
    #[arg(long, default_value = "")]
    intercept: String,

    /// Fail held calls after this many milliseconds without a release.
    #[arg(long)]
    release_timeout_ms: Option<u64>,

    /// Maximum simultaneously in-flight calls per connection.
    #[arg(long, default_value_t = 100)]
    max_in_flight: usize,

    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(args.log))
        .init();

    let addr: SocketAddr = args.listen.parse()?;
    let channel = Endpoint::from_shared(args.backend.clone())?.connect_lazy();
    let config = DispatcherConfig {
        release_timeout: args.release_timeout_ms.map(Duration::from_millis),
    };
    let proxy = app::build(channel, &args.intercept, config)?;

    if !args.intercept.is_empty() {
        tracing::info!(
            pattern = %args.intercept,
            "interception enabled; matching calls hold until released through the operator panel"
        );
    }
    tracing::info!(%addr, backend = %args.backend, "starting tapwire proxy");

    Server::builder()
        .concurrency_limit_per_connection(args.max_in_flight)
        .add_service(proxy.service)
        .serve(addr)
        .await?;

    Ok(())
}
