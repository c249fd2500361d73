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

//! Channel worker: drives one stream until it ends.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::constants::{CLOSE_CODE_NORMAL, READ_BUFFER_CAPACITY};
use crate::errors::{SessionError, StreamError};
use crate::lifetime::SessionLifetime;
use crate::stats::SessionStats;
use crate::transform::transform;
use crate::transport::{RecvStream, SendStream, StreamId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// Write the transformed payload back on the same stream.
    Echo,
    /// Only log what arrives.
    Observe,
}

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The peer finished its side of the stream.
    Finished,
    /// The peer reset the stream.
    Reset(u32),
    /// The stream was already closed underneath the worker.
    Closed,
    /// Writing the reply failed.
    WriteFailed,
    /// The transport reported the session as gone.
    SessionClosed,
    /// The session lifetime was cancelled.
    Cancelled,
}

impl From<StreamError> for WorkerExit {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Reset(code) => WorkerExit::Reset(code),
            StreamError::Closed => WorkerExit::Closed,
            StreamError::Session(SessionError::Cancelled) => WorkerExit::Cancelled,
            StreamError::Session(_) => WorkerExit::SessionClosed,
        }
    }
}

/// Owns exactly one stream. No other task touches the stream while the
/// worker runs.
pub struct ChannelWorker<R, W> {
    id: StreamId,
    reader: R,
    writer: Option<W>,
    mode: WorkerMode,
    lifetime: SessionLifetime,
    stats: Arc<SessionStats>,
}

impl<R, W> ChannelWorker<R, W>
where
    R: RecvStream,
    W: SendStream,
{
    /// Echo worker for a bidirectional stream.
    pub fn echo(
        id: StreamId,
        reader: R,
        writer: W,
        lifetime: SessionLifetime,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            id,
            reader,
            writer: Some(writer),
            mode: WorkerMode::Echo,
            lifetime,
            stats,
        }
    }

    /// Read-only worker. A writer, if given, is only held so it can be
    /// finished when reading stops.
    pub fn observe(
        id: StreamId,
        reader: R,
        writer: Option<W>,
        lifetime: SessionLifetime,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            id,
            reader,
            writer,
            mode: WorkerMode::Observe,
            lifetime,
            stats,
        }
    }

    pub async fn run(mut self) -> WorkerExit {
        self.stats.worker_started();
        let exit = self.pump().await;
        self.release(exit);
        self.stats.worker_exited();
        exit
    }

    async fn pump(&mut self) -> WorkerExit {
        let mut buf = [0u8; READ_BUFFER_CAPACITY];
        loop {
            let read = match self.lifetime.guard(self.reader.read(&mut buf)).await {
                Ok(read) => read,
                Err(_) => return WorkerExit::Cancelled,
            };
            let n = match read {
                Ok(Some(n)) => n,
                Ok(None) => return WorkerExit::Finished,
                Err(e) => {
                    info!("Error reading from {} stream {}: {}", self.id.kind(), self.id, e);
                    return e.into();
                }
            };
            if n == 0 {
                continue;
            }
            self.stats.read(n);
            debug!(
                stream_id = %self.id,
                bytes = n,
                "Received from {} stream: {}",
                self.id.kind(),
                String::from_utf8_lossy(&buf[..n])
            );

            if self.mode == WorkerMode::Observe {
                continue;
            }
            let Some(writer) = self.writer.as_mut() else {
                continue;
            };
            let reply = transform(&buf[..n]);
            debug!(stream_id = %self.id, bytes = reply.len(), "Sending echo");
            match self.lifetime.guard(writer.write_all(&reply)).await {
                Ok(Ok(())) => self.stats.written(reply.len()),
                Ok(Err(e)) => {
                    warn!("Error writing to {} stream {}: {}", self.id.kind(), self.id, e);
                    return match WorkerExit::from(e) {
                        WorkerExit::SessionClosed => WorkerExit::SessionClosed,
                        _ => WorkerExit::WriteFailed,
                    };
                }
                Err(_) => return WorkerExit::Cancelled,
            }
        }
    }

    fn release(&mut self, exit: WorkerExit) {
        if matches!(exit, WorkerExit::Cancelled | WorkerExit::WriteFailed) {
            self.reader.stop(CLOSE_CODE_NORMAL);
        }
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.finish() {
                debug!(stream_id = %self.id, "Stream already closed on finish: {}", e);
            }
        }
        info!(stream_id = %self.id, exit = ?exit, "{} stream worker ended", self.id.kind());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{self, MemorySession};
    use crate::transport::{Initiator, Session, StreamIds, StreamKind};
    use std::time::Duration;

    async fn pair() -> (MemorySession, MemorySession) {
        let (request, client) = memory::request("https://localhost/counter", None).unwrap();
        let server = crate::transport::SessionRequest::accept(request).await.unwrap();
        (server, client.established().await.unwrap())
    }

    #[tokio::test]
    async fn test_echo_worker_uppercases_and_finishes() {
        let (server, client) = pair().await;
        let ids = StreamIds::new();
        let stats = Arc::new(SessionStats::new());
        let lifetime = SessionLifetime::new();

        let (mut send, mut recv) = client.open_bi().await.unwrap();
        let (server_send, server_recv) = server.accept_bi().await.unwrap();
        let worker = ChannelWorker::echo(
            ids.next(Initiator::Peer, StreamKind::Bidi),
            server_recv,
            server_send,
            lifetime,
            stats.clone(),
        );
        let handle = tokio::spawn(worker.run());

        send.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 16];
        let n = recv.read(&mut buf).await.unwrap().unwrap();
        assert_eq!(&buf[..n], b"HELLO");

        send.finish().unwrap();
        assert_eq!(handle.await.unwrap(), WorkerExit::Finished);
        // The worker finishes its own side once reading stops.
        assert_eq!(recv.read(&mut buf).await.unwrap(), None);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.bytes_read, 5);
        assert_eq!(snapshot.bytes_written, 5);
        assert_eq!(snapshot.workers_running(), 0);
    }

    #[tokio::test]
    async fn test_large_payload_is_echoed_in_chunks() {
        let (server, client) = pair().await;
        let ids = StreamIds::new();
        let (mut send, mut recv) = client.open_bi().await.unwrap();
        let (server_send, server_recv) = server.accept_bi().await.unwrap();
        let worker = ChannelWorker::echo(
            ids.next(Initiator::Peer, StreamKind::Bidi),
            server_recv,
            server_send,
            SessionLifetime::new(),
            Arc::new(SessionStats::new()),
        );
        tokio::spawn(worker.run());

        let payload = vec![b'a'; READ_BUFFER_CAPACITY * 2 + 10];
        send.write_all(&payload).await.unwrap();
        send.finish().unwrap();

        let mut echoed = Vec::new();
        let mut buf = [0u8; 4096];
        while let Some(n) = recv.read(&mut buf).await.unwrap() {
            echoed.extend_from_slice(&buf[..n]);
        }
        assert_eq!(echoed, vec![b'A'; payload.len()]);
    }

    #[tokio::test]
    async fn test_observe_worker_does_not_reply() {
        let (server, client) = pair().await;
        let ids = StreamIds::new();
        let (mut send, recv) = server.open_bi().await.unwrap();
        send.write_all(b"bidi").await.unwrap();
        let (mut client_send, mut client_recv) = client.accept_bi().await.unwrap();

        let worker = ChannelWorker::observe(
            ids.next(Initiator::Local, StreamKind::Bidi),
            recv,
            Some(send),
            SessionLifetime::new(),
            Arc::new(SessionStats::new()),
        );
        let handle = tokio::spawn(worker.run());

        let mut buf = [0u8; 16];
        let n = client_recv.read(&mut buf).await.unwrap().unwrap();
        assert_eq!(&buf[..n], b"bidi");

        client_send.write_all(b"quiet").await.unwrap();
        client_send.finish().unwrap();
        assert_eq!(handle.await.unwrap(), WorkerExit::Finished);
        assert_eq!(client_recv.read(&mut buf).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_failure_stops_reader_and_spares_siblings() {
        let (server, client) = pair().await;
        let ids = StreamIds::new();
        let lifetime = SessionLifetime::new();
        let stats = Arc::new(SessionStats::new());

        let (mut doomed_send, mut doomed_recv) = client.open_bi().await.unwrap();
        let (server_send, server_recv) = server.accept_bi().await.unwrap();
        let doomed_worker = tokio::spawn(
            ChannelWorker::echo(
                ids.next(Initiator::Peer, StreamKind::Bidi),
                server_recv,
                server_send,
                lifetime.clone(),
                stats.clone(),
            )
            .run(),
        );

        let (mut send, mut recv) = client.open_bi().await.unwrap();
        let (server_send, server_recv) = server.accept_bi().await.unwrap();
        let sibling = tokio::spawn(
            ChannelWorker::echo(
                ids.next(Initiator::Peer, StreamKind::Bidi),
                server_recv,
                server_send,
                lifetime.clone(),
                stats.clone(),
            )
            .run(),
        );

        // The client refuses the reply, so echoing it back fails.
        doomed_recv.stop(5);
        doomed_send.write_all(b"boom").await.unwrap();
        let exit = tokio::time::timeout(Duration::from_secs(1), doomed_worker)
            .await
            .expect("worker should stop after the failed write")
            .unwrap();
        assert_eq!(exit, WorkerExit::WriteFailed);
        assert_eq!(
            doomed_send.write_all(b"again").await,
            Err(StreamError::Reset(CLOSE_CODE_NORMAL))
        );
        assert!(!lifetime.is_cancelled());

        send.write_all(b"ok").await.unwrap();
        let mut buf = [0u8; 8];
        let n = recv.read(&mut buf).await.unwrap().unwrap();
        assert_eq!(&buf[..n], b"OK");

        send.finish().unwrap();
        assert_eq!(sibling.await.unwrap(), WorkerExit::Finished);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.workers_started, 2);
        assert_eq!(snapshot.workers_running(), 0);
    }

    #[tokio::test]
    async fn test_reset_ends_only_that_worker() {
        let (server, client) = pair().await;
        let ids = StreamIds::new();
        let lifetime = SessionLifetime::new();
        let stats = Arc::new(SessionStats::new());

        let mut doomed = client.open_uni().await.unwrap();
        let doomed_recv = server.accept_uni().await.unwrap();
        let mut healthy = client.open_uni().await.unwrap();
        let healthy_recv = server.accept_uni().await.unwrap();

        let doomed_worker = tokio::spawn(
            ChannelWorker::<_, memory::MemorySendStream>::observe(
                ids.next(Initiator::Peer, StreamKind::Uni),
                doomed_recv,
                None,
                lifetime.clone(),
                stats.clone(),
            )
            .run(),
        );
        let healthy_worker = tokio::spawn(
            ChannelWorker::<_, memory::MemorySendStream>::observe(
                ids.next(Initiator::Peer, StreamKind::Uni),
                healthy_recv,
                None,
                lifetime.clone(),
                stats.clone(),
            )
            .run(),
        );

        doomed.reset(7);
        assert_eq!(doomed_worker.await.unwrap(), WorkerExit::Reset(7));
        assert!(!lifetime.is_cancelled());

        healthy.write_all(b"still here").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!healthy_worker.is_finished());

        lifetime.cancel();
        let exit = tokio::time::timeout(Duration::from_secs(1), healthy_worker)
            .await
            .expect("worker should observe cancellation")
            .unwrap();
        assert_eq!(exit, WorkerExit::Cancelled);
        assert_eq!(stats.snapshot().bytes_read, 10);
    }
}
