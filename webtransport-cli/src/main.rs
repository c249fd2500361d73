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

//! Exercise every channel of a running echo server: print the greetings the
//! server pushes on its own streams, then round-trip a datagram and a bidi
//! stream payload.

use std::time::Duration;

use anyhow::{anyhow, Context};
use bytes::Bytes;
use clap::Parser;
use tracing::{info, warn};
use url::Url;
use web_transport_quinn::{ClientBuilder, RecvStream, Session};

#[derive(Parser, Debug)]
#[clap(name = "webtransport-cli")]
struct Opt {
    /// Echo server endpoint.
    #[clap(long = "url", default_value = "https://localhost:4433/counter")]
    url: Url,

    /// Skip TLS certificate verification (self-signed test certificates).
    #[clap(long = "insecure")]
    insecure: bool,

    /// Sent as a datagram.
    #[clap(long = "datagram", default_value = "ping")]
    datagram: String,

    /// Sent on a client-initiated bidi stream.
    #[clap(long = "message", default_value = "hello")]
    message: String,

    #[clap(long = "timeout-ms", default_value_t = 5000)]
    timeout_ms: u64,
}

async fn read_once(stream: &mut RecvStream) -> anyhow::Result<String> {
    let mut buf = [0u8; 1024];
    let n = stream
        .read(&mut buf)
        .await?
        .ok_or_else(|| anyhow!("stream finished without data"))?;
    Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
}

async fn connect(opt: &Opt) -> anyhow::Result<Session> {
    let client = if opt.insecure {
        warn!("Certificate verification disabled (--insecure)");
        // SAFETY: only meant for local testing against self-signed certificates
        unsafe { ClientBuilder::new().with_no_certificate_verification()? }
    } else {
        ClientBuilder::new().with_system_roots()?
    };
    info!("Connecting to {}", opt.url);
    let session = client.connect(opt.url.clone()).await?;
    info!("WebTransport session established");
    Ok(session)
}

async fn run(opt: Opt) -> anyhow::Result<()> {
    let timeout = Duration::from_millis(opt.timeout_ms);
    let session = connect(&opt).await?;

    let greetings = {
        let session = session.clone();
        tokio::spawn(async move {
            let (_send, mut recv) = session.accept_bi().await?;
            println!("server bidi stream: {}", read_once(&mut recv).await?);
            let mut uni = session.accept_uni().await?;
            println!("server uni stream: {}", read_once(&mut uni).await?);
            anyhow::Ok(())
        })
    };

    session.send_datagram(Bytes::from(opt.datagram.clone().into_bytes()))?;
    let reply = tokio::time::timeout(timeout, session.read_datagram())
        .await
        .context("no datagram reply")??;
    println!(
        "datagram: {} -> {}",
        opt.datagram,
        String::from_utf8_lossy(&reply)
    );

    let (mut send, mut recv) = session.open_bi().await?;
    send.write_all(opt.message.as_bytes()).await?;
    let reply = tokio::time::timeout(timeout, read_once(&mut recv))
        .await
        .context("no bidi stream reply")??;
    println!("bidi stream: {} -> {}", opt.message, reply);
    send.finish()?;

    tokio::time::timeout(timeout, greetings)
        .await
        .context("server greetings not received")???;

    session.close(0, b"done");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    run(Opt::parse()).await
}
