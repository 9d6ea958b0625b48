// Copyright (c) 2026 Tapwire Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::net::SocketAddr;

use clap::Parser;
use tapwire_echo::EchoBackend;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tapwire-echo")]
#[command(about = "Demo echo backend for the tapwire proxy")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:50051")]
    listen: String,

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
    tracing::info!(%addr, "starting demo echo backend");

    tonic::transport::Server::builder()
        .add_service(EchoBackend::new().into_server())
        .serve(addr)
        .await?;

    Ok(())
}
