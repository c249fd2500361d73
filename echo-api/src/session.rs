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

//! Session orchestrator.
//!
//! Fans one accepted session out into independently scheduled tasks that all
//! share the session's [`SessionLifetime`]:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          SessionHandle                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐            │
//! │  │ Datagram     │  │ Uni acceptor │  │ Bidi acceptor│            │
//! │  │ loop         │  │  └ workers   │  │  └ workers   │            │
//! │  └──────────────┘  └──────────────┘  └──────────────┘            │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐            │
//! │  │ Close watcher│  │ Outbound bidi│  │ Outbound uni │            │
//! │  │ closed()     │  │ worker       │  │ (held open)  │            │
//! │  └──────────────┘  └──────────────┘  └──────────────┘            │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failing stream only ends its own worker. Only the close watcher (or an
//! explicit [`SessionHandle::shutdown`]) cancels the lifetime, and
//! [`SessionHandle::join`] returns once every task above has exited.

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::acceptor::StreamAcceptor;
use crate::constants::{BIDI_GREETING, CLOSE_CODE_NORMAL, UNI_GREETING};
use crate::datagram::datagram_loop;
use crate::lifetime::SessionLifetime;
use crate::stats::{SessionStats, StatsSnapshot};
use crate::transport::{Initiator, SendStream, Session, StreamIds, StreamKind};
use crate::worker::ChannelWorker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepted,
    /// Background tasks are running.
    Active,
    /// The lifetime was cancelled, tasks are winding down.
    Closing,
    /// Every task has exited.
    Terminated,
}

/// Session-scoped task, returned by each task when it exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTask {
    Datagrams,
    UniAcceptor,
    BidiAcceptor,
    OutboundBidi,
    OutboundUni,
    CloseWatcher,
}

impl fmt::Display for SessionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionTask::Datagrams => "datagram loop",
            SessionTask::UniAcceptor => "uni stream acceptor",
            SessionTask::BidiAcceptor => "bidi stream acceptor",
            SessionTask::OutboundBidi => "server-initiated bidi stream",
            SessionTask::OutboundUni => "server-initiated uni stream",
            SessionTask::CloseWatcher => "close watcher",
        };
        f.write_str(name)
    }
}

/// A running session and the registry of every task it spawned.
pub struct SessionHandle<S: Session> {
    id: Uuid,
    session: S,
    lifetime: SessionLifetime,
    ids: Arc<StreamIds>,
    stats: Arc<SessionStats>,
    tasks: JoinSet<SessionTask>,
    state: SessionState,
    span: tracing::Span,
}

impl<S: Session> SessionHandle<S> {
    /// Bring a freshly accepted session to full operation.
    ///
    /// The datagram loop and both acceptors are running before the
    /// server-initiated streams are opened. Failing to open either stream is
    /// logged and otherwise ignored.
    pub async fn start(session: S) -> Self {
        let id = Uuid::new_v4();
        let span = tracing::info_span!("session", id = %id);
        let mut handle = Self {
            id,
            session,
            lifetime: SessionLifetime::new(),
            ids: Arc::new(StreamIds::new()),
            stats: Arc::new(SessionStats::new()),
            tasks: JoinSet::new(),
            state: SessionState::Accepted,
            span,
        };
        let span = handle.span.clone();
        async {
            info!("Accepted incoming WebTransport session");
            handle.spawn_background();
            handle.state = SessionState::Active;
            handle.open_bidi().await;
            handle.open_uni().await;
        }
        .instrument(span)
        .await;
        handle
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn lifetime(&self) -> &SessionLifetime {
        &self.lifetime
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn state(&self) -> SessionState {
        match self.state {
            SessionState::Active if self.lifetime.is_cancelled() => SessionState::Closing,
            state => state,
        }
    }

    fn spawn_background(&mut self) {
        let span = self.span.clone();

        let watcher_session = self.session.clone();
        let lifetime = self.lifetime.clone();
        self.tasks.spawn(
            async move {
                tokio::select! {
                    reason = watcher_session.closed() => {
                        info!("Session closed: {}", reason);
                        lifetime.cancel();
                    }
                    _ = lifetime.cancelled() => {}
                }
                SessionTask::CloseWatcher
            }
            .instrument(span.clone()),
        );

        let datagrams = datagram_loop(
            self.session.clone(),
            self.lifetime.clone(),
            self.stats.clone(),
        );
        self.tasks.spawn(
            async move {
                datagrams.await;
                SessionTask::Datagrams
            }
            .instrument(span.clone()),
        );

        for (kind, task) in [
            (StreamKind::Uni, SessionTask::UniAcceptor),
            (StreamKind::Bidi, SessionTask::BidiAcceptor),
        ] {
            let acceptor = StreamAcceptor::new(
                self.session.clone(),
                kind,
                self.lifetime.clone(),
                self.ids.clone(),
                self.stats.clone(),
            );
            self.tasks.spawn(
                async move {
                    acceptor.run().await;
                    task
                }
                .instrument(span.clone()),
            );
        }
    }

    async fn open_bidi(&mut self) {
        let (mut send, recv) = match self.lifetime.guard(self.session.open_bi()).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) | Err(e) => {
                warn!("Failed to open server-initiated bidi stream: {}", e);
                return;
            }
        };
        let id = self.ids.next(Initiator::Local, StreamKind::Bidi);
        self.stats.stream_opened();
        info!("Listening on server-initiated bidi stream {}", id);

        info!(
            "Sending to server-initiated bidi stream {}: {}",
            id,
            String::from_utf8_lossy(BIDI_GREETING)
        );
        match self.lifetime.guard(send.write_all(BIDI_GREETING)).await {
            Ok(Ok(())) => self.stats.written(BIDI_GREETING.len()),
            Ok(Err(e)) => warn!("Error writing to server-initiated bidi stream {}: {}", id, e),
            Err(e) => warn!("Error writing to server-initiated bidi stream {}: {}", id, e),
        }

        let worker = ChannelWorker::observe(
            id,
            recv,
            Some(send),
            self.lifetime.clone(),
            self.stats.clone(),
        );
        self.tasks.spawn(
            async move {
                worker.run().await;
                SessionTask::OutboundBidi
            }
            .instrument(self.span.clone()),
        );
    }

    async fn open_uni(&mut self) {
        let mut send = match self.lifetime.guard(self.session.open_uni()).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) | Err(e) => {
                warn!("Failed to open server-initiated uni stream: {}", e);
                return;
            }
        };
        let id = self.ids.next(Initiator::Local, StreamKind::Uni);
        self.stats.stream_opened();
        info!(
            "Sending to server-initiated uni stream {}: {}",
            id,
            String::from_utf8_lossy(UNI_GREETING)
        );
        match self.lifetime.guard(send.write_all(UNI_GREETING)).await {
            Ok(Ok(())) => self.stats.written(UNI_GREETING.len()),
            Ok(Err(e)) => warn!("Error writing to server-initiated uni stream {}: {}", id, e),
            Err(e) => warn!("Error writing to server-initiated uni stream {}: {}", id, e),
        }

        // Send-only: nothing to read, so just keep it open until the session
        // goes away.
        let lifetime = self.lifetime.clone();
        self.tasks.spawn(
            async move {
                lifetime.cancelled().await;
                drop(send);
                SessionTask::OutboundUni
            }
            .instrument(self.span.clone()),
        );
    }

    /// Wait until every task of the session has exited.
    pub async fn join(&mut self) -> StatsSnapshot {
        let span = self.span.clone();
        async {
            while let Some(joined) = self.tasks.join_next().await {
                match joined {
                    Ok(task) => info!("{} ended", task),
                    Err(e) => error!("Session task failed: {}", e),
                }
            }
            self.state = SessionState::Terminated;
            let stats = self.stats.snapshot();
            info!(?stats, "Finished handling session");
            stats
        }
        .instrument(span)
        .await
    }

    /// Cancel the lifetime, close the transport session and wait for every
    /// task to exit.
    pub async fn shutdown(&mut self) -> StatsSnapshot {
        if self.state != SessionState::Terminated {
            self.lifetime.cancel();
            self.session.close(CLOSE_CODE_NORMAL, b"shutdown");
        }
        self.join().await
    }
}
