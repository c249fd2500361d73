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

//! QUIC/HTTP3 listener that feeds WebTransport session requests to the gate.

mod adapter;
pub mod certs;

pub use adapter::{QuinnRecvStream, QuinnRequest, QuinnSendStream, QuinnSession};

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{debug, error, info, warn};

use crate::config::EchoConfig;
use crate::constants::{CLOSE_CODE_NORMAL, WEB_TRANSPORT_ALPN};
use crate::gate::{serve_request, Gate, OriginPolicy};

/// Requests reaching this listener carry no origin (`QuinnRequest::origin`),
/// so an allow-list can only admit every session or refuse every session.
/// Refuse to start in the second case and warn about entries that cannot be
/// enforced.
pub fn check_origin_policy(config: &EchoConfig) -> Result<()> {
    if !OriginPolicy::new(&config.allowed_origins).allows(None) {
        bail!(
            "allowed origins {:?} do not include \"\"; the Origin header is not visible \
             to this listener, so every session would be rejected with 403",
            config.allowed_origins
        );
    }
    let unenforced: Vec<&str> = config
        .allowed_origins
        .iter()
        .map(String::as_str)
        .filter(|origin| !origin.trim().is_empty())
        .collect();
    if !unenforced.is_empty() {
        warn!(
            ?unenforced,
            "Origin header is not visible to this listener; sessions from any origin will be admitted"
        );
    }
    Ok(())
}

/// Build the QUIC server config: TLS 1.3 with the HTTP/3 ALPN, and the
/// keep-alive, idle timeout and stream limits from `config`.
pub fn server_config(config: &EchoConfig) -> Result<quinn::ServerConfig> {
    let (key, certs) = certs::load_key_and_cert_chain(&config.cert, &config.key)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut tls_config = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    tls_config.max_early_data_size = u32::MAX;
    tls_config.alpn_protocols = vec![WEB_TRANSPORT_ALPN.to_vec()];

    let crypto = quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)?;
    let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(crypto));

    let mut transport_config = quinn::TransportConfig::default();
    transport_config.keep_alive_interval(config.keep_alive_interval());
    transport_config.max_idle_timeout(Some(
        config
            .max_idle_timeout()
            .try_into()
            .context("max idle timeout out of range")?,
    ));
    transport_config.max_concurrent_uni_streams(config.max_concurrent_streams.into());
    transport_config.max_concurrent_bidi_streams(config.max_concurrent_streams.into());
    server_config.transport = Arc::new(transport_config);
    Ok(server_config)
}

/// Run the server until Ctrl-C. Only startup failures are returned; errors in
/// individual sessions are logged.
pub async fn start(config: EchoConfig) -> Result<()> {
    info!("EchoConfig: {config:#?}");
    check_origin_policy(&config)?;

    let server_config = server_config(&config)?;
    let endpoint = quinn::Endpoint::server(server_config, config.listen)
        .with_context(|| format!("failed to listen on {}", config.listen))?;
    let mut server = web_transport_quinn::Server::new(endpoint.clone());
    info!("Launching WebTransport server at {}", config.listen);

    let gate = Arc::new(Gate::from_config(&config));
    loop {
        let request = tokio::select! {
            request = server.accept() => match request {
                Some(request) => request,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        };
        debug!("New session request for {}", request.url());
        let gate = gate.clone();
        tokio::spawn(async move {
            let request = QuinnRequest::new(request);
            if let Err(err) = serve_request(&gate, request).await {
                error!("Failed to handle session: {err:?}");
            }
        });
    }

    // wait for connections to be closed before exiting
    endpoint.close(CLOSE_CODE_NORMAL.into(), b"server shutdown");
    endpoint.wait_idle().await;
    Ok(())
}
