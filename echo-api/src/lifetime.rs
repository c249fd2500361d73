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

//! Session lifetime token.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::errors::SessionError;

/// Cancellable lifetime shared by every task of one session.
///
/// Clones observe the same token. Cancelling is idempotent.
#[derive(Debug, Clone)]
pub struct SessionLifetime {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for SessionLifetime {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLifetime {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the token is cancelled. Returns immediately if it
    /// already is.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so `wait_for` cannot fail here.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Run `fut` unless the session is cancelled first.
    pub async fn guard<F, T>(&self, fut: F) -> Result<T, SessionError>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(SessionError::Cancelled),
            out = fut => Ok(out),
        }
    }
}
