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

//! Accepts peer-initiated streams of one kind and hands each to its own
//! worker.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info};

use crate::errors::SessionError;
use crate::lifetime::SessionLifetime;
use crate::stats::SessionStats;
use crate::transport::{Initiator, Session, StreamIds, StreamKind};
use crate::worker::{ChannelWorker, WorkerExit};

enum Incoming<S: Session> {
    Uni(S::RecvStream),
    Bidi(S::SendStream, S::RecvStream),
}

pub struct StreamAcceptor<S: Session> {
    session: S,
    kind: StreamKind,
    lifetime: SessionLifetime,
    ids: Arc<StreamIds>,
    stats: Arc<SessionStats>,
}

impl<S: Session> StreamAcceptor<S> {
    pub fn new(
        session: S,
        kind: StreamKind,
        lifetime: SessionLifetime,
        ids: Arc<StreamIds>,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            session,
            kind,
            lifetime,
            ids,
            stats,
        }
    }

    async fn accept_next(&self) -> Result<Incoming<S>, SessionError> {
        match self.kind {
            StreamKind::Uni => self.session.accept_uni().await.map(Incoming::Uni),
            StreamKind::Bidi => {
                let (send, recv) = self.session.accept_bi().await?;
                Ok(Incoming::Bidi(send, recv))
            }
        }
    }

    /// Accept until the session ends, then wait for every worker spawned
    /// here to exit. Returns the reason accepting stopped.
    pub async fn run(self) -> SessionError {
        let mut workers: JoinSet<WorkerExit> = JoinSet::new();
        let reason = loop {
            let incoming = match self.lifetime.guard(self.accept_next()).await {
                Ok(Ok(incoming)) => incoming,
                Ok(Err(e)) | Err(e) => break e,
            };
            while let Some(joined) = workers.try_join_next() {
                if let Err(e) = joined {
                    error!("{} stream worker panicked: {}", self.kind, e);
                }
            }

            let id = self.ids.next(Initiator::Peer, self.kind);
            self.stats.stream_accepted(self.kind);
            info!("Accepting incoming {} stream: {}", self.kind, id);
            let lifetime = self.lifetime.clone();
            let stats = self.stats.clone();
            match incoming {
                Incoming::Uni(recv) => {
                    // Peer-initiated uni streams are read-only from this side.
                    let worker = ChannelWorker::<S::RecvStream, S::SendStream>::observe(
                        id, recv, None, lifetime, stats,
                    );
                    workers.spawn(worker.run());
                }
                Incoming::Bidi(send, recv) => {
                    let worker = ChannelWorker::echo(id, recv, send, lifetime, stats);
                    workers.spawn(worker.run());
                }
            }
        };
        info!("Session closed, not accepting more {} streams: {}", self.kind, reason);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("{} stream worker panicked: {}", self.kind, e);
            }
        }
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{self, MemorySession};
    use crate::transport::{RecvStream, SendStream, SessionRequest};
    use std::time::Duration;

    async fn pair() -> (MemorySession, MemorySession) {
        let (request, client) = memory::request("https://localhost/counter", None).unwrap();
        let server = request.accept().await.unwrap();
        (server, client.established().await.unwrap())
    }

    fn acceptor(
        server: &MemorySession,
        kind: StreamKind,
        lifetime: &SessionLifetime,
    ) -> (StreamAcceptor<MemorySession>, Arc<SessionStats>) {
        let stats = Arc::new(SessionStats::new());
        (
            StreamAcceptor::new(
                server.clone(),
                kind,
                lifetime.clone(),
                Arc::new(StreamIds::new()),
                stats.clone(),
            ),
            stats,
        )
    }

    #[tokio::test]
    async fn test_bidi_acceptor_echoes_every_stream() {
        let (server, client) = pair().await;
        let lifetime = SessionLifetime::new();
        let (acceptor, stats) = acceptor(&server, StreamKind::Bidi, &lifetime);
        let task = tokio::spawn(acceptor.run());

        for payload in [&b"hello"[..], b"world"] {
            let (mut send, mut recv) = client.open_bi().await.unwrap();
            send.write_all(payload).await.unwrap();
            let mut buf = [0u8; 16];
            let n = recv.read(&mut buf).await.unwrap().unwrap();
            assert_eq!(&buf[..n], payload.to_ascii_uppercase().as_slice());
        }
        assert_eq!(stats.snapshot().bidi_streams_accepted, 2);

        lifetime.cancel();
        let reason = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("acceptor should stop")
            .unwrap();
        assert_eq!(reason, SessionError::Cancelled);
        assert_eq!(stats.snapshot().workers_running(), 0);
    }

    #[tokio::test]
    async fn test_uni_acceptor_stops_when_session_closes() {
        let (server, client) = pair().await;
        let lifetime = SessionLifetime::new();
        let (acceptor, stats) = acceptor(&server, StreamKind::Uni, &lifetime);
        let task = tokio::spawn(acceptor.run());

        let mut send = client.open_uni().await.unwrap();
        send.write_all(b"one way").await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while stats.snapshot().bytes_read < 7 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("stream should be accepted and read");
        client.close(0, b"done");

        let reason = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("acceptor should stop")
            .unwrap();
        assert!(matches!(reason, SessionError::Closed(_)));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.uni_streams_accepted, 1);
        assert_eq!(snapshot.workers_running(), 0);
    }
}
