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

//! Session entry point: decides whether a session request is admitted and
//! hands admitted sessions to the orchestrator.

use std::collections::HashSet;

use http::StatusCode;
use tracing::{info, warn};
use url::Url;

use crate::config::EchoConfig;
use crate::session::SessionHandle;
use crate::stats::StatsSnapshot;
use crate::transport::SessionRequest;

/// Reduce an `Origin` header value to the `host[:port]` form used by the
/// allow-list.
///
/// `https://localhost:8000` becomes `localhost:8000` and
/// `chrome://new-tab-page` becomes `new-tab-page`. A missing origin, the
/// opaque `null` origin and `file://` pages all become the empty string.
pub fn normalize_origin(origin: Option<&str>) -> String {
    let origin = match origin.map(str::trim) {
        None | Some("") | Some("null") => return String::new(),
        Some(origin) => origin,
    };
    if !origin.contains("://") {
        return origin.to_ascii_lowercase();
    }
    match Url::parse(origin) {
        Ok(url) => match (url.host_str(), url.port()) {
            (Some(""), _) | (None, _) => String::new(),
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
        },
        Err(_) => origin.to_ascii_lowercase(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    allowed: HashSet<String>,
}

impl OriginPolicy {
    pub fn new<I, T>(allowed: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(|origin| origin.as_ref().trim().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn allows(&self, origin: Option<&str>) -> bool {
        self.allowed.contains(&normalize_origin(origin))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    Reject(StatusCode),
}

/// Path and origin gate in front of the orchestrator.
#[derive(Debug, Clone)]
pub struct Gate {
    path: String,
    origins: OriginPolicy,
}

impl Gate {
    pub fn new(path: impl Into<String>, origins: OriginPolicy) -> Self {
        Self {
            path: path.into(),
            origins,
        }
    }

    pub fn from_config(config: &EchoConfig) -> Self {
        Self::new(
            config.path.clone(),
            OriginPolicy::new(&config.allowed_origins),
        )
    }

    pub fn admit(&self, url: &Url, origin: Option<&str>) -> Admission {
        if url.path() != self.path {
            return Admission::Reject(StatusCode::NOT_FOUND);
        }
        if !self.origins.allows(origin) {
            return Admission::Reject(StatusCode::FORBIDDEN);
        }
        Admission::Accept
    }
}

/// Gate one session request. Admitted sessions are run until they terminate
/// and their final counters are returned; rejected requests return `None`.
pub async fn serve_request<R: SessionRequest>(
    gate: &Gate,
    request: R,
) -> anyhow::Result<Option<StatsSnapshot>> {
    let url = request.url().clone();
    let origin = request.origin().map(str::to_owned);
    match gate.admit(&url, origin.as_deref()) {
        Admission::Reject(status) => {
            warn!(
                "Rejecting session request for {} from origin {:?}: {}",
                url, origin, status
            );
            request.reject(status).await?;
            Ok(None)
        }
        Admission::Accept => {
            let session = request.accept().await?;
            let mut handle = SessionHandle::start(session).await;
            info!(session_id = %handle.id(), "Session for {} is active", url);
            Ok(Some(handle.join().await))
        }
    }
}
