/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use echo_api::config::{EchoConfig, Opt};
use echo_api::webtransport;

#[tokio::main]
async fn main() {
    let opt = Opt::parse();
    let config = match EchoConfig::load(&opt) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match webtransport::start(config).await {
        Ok(()) => info!("webtransport echo server stopped"),
        Err(e) => {
            error!("webtransport echo server error: {e:#}");
            std::process::exit(1);
        }
    }
}
