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

//! In-process loopback transport.
//!
//! [`request`] builds a pending session request and the client end that
//! issued it. Once the server accepts, both ends are ordinary
//! [`MemorySession`]s implementing [`Session`], so the client can open and
//! accept streams, exchange datagrams, reset streams, and close the session.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use url::Url;

use super::{RecvStream, SendStream, Session, SessionRequest};
use crate::errors::{SessionError, StreamError};

#[derive(Debug)]
enum Frame {
    Data(Bytes),
    Reset(u32),
}

/// Session-wide state shared by both ends and every stream.
#[derive(Debug)]
struct Shared {
    closed: watch::Sender<Option<SessionError>>,
}

impl Shared {
    fn new() -> Self {
        let (closed, _rx) = watch::channel(None);
        Self { closed }
    }

    /// First reason wins.
    fn close(&self, reason: SessionError) {
        self.closed.send_if_modified(|state| {
            if state.is_none() {
                *state = Some(reason);
                true
            } else {
                false
            }
        });
    }

    fn error(&self) -> Option<SessionError> {
        self.closed.borrow().clone()
    }

    async fn wait(&self) -> SessionError {
        let mut rx = self.closed.subscribe();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(state) => (*state).clone(),
            Err(_) => None,
        };
        reason.unwrap_or_else(|| SessionError::Closed("connection dropped".to_string()))
    }
}

pub struct MemorySendStream {
    tx: Option<mpsc::UnboundedSender<Frame>>,
    stopped: Arc<OnceLock<u32>>,
    shared: Arc<Shared>,
}

pub struct MemoryRecvStream {
    rx: mpsc::UnboundedReceiver<Frame>,
    pending: Bytes,
    stopped: Arc<OnceLock<u32>>,
    shared: Arc<Shared>,
}

fn stream(shared: &Arc<Shared>) -> (MemorySendStream, MemoryRecvStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stopped = Arc::new(OnceLock::new());
    (
        MemorySendStream {
            tx: Some(tx),
            stopped: stopped.clone(),
            shared: shared.clone(),
        },
        MemoryRecvStream {
            rx,
            pending: Bytes::new(),
            stopped,
            shared: shared.clone(),
        },
    )
}

impl MemorySendStream {
    /// Abruptly terminate the stream. The reader sees
    /// [`StreamError::Reset`] with `code`.
    pub fn reset(&mut self, code: u32) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Frame::Reset(code));
        }
    }

    fn write_error(&self) -> StreamError {
        match self.stopped.get() {
            Some(code) => StreamError::Reset(*code),
            None => StreamError::Closed,
        }
    }
}

#[async_trait]
impl SendStream for MemorySendStream {
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), StreamError> {
        if let Some(err) = self.shared.error() {
            return Err(err.into());
        }
        if self.stopped.get().is_some() {
            return Err(self.write_error());
        }
        let tx = self.tx.as_ref().ok_or(StreamError::Closed)?;
        if buf.is_empty() {
            return Ok(());
        }
        tx.send(Frame::Data(Bytes::copy_from_slice(buf)))
            .map_err(|_| self.write_error())
    }

    fn finish(&mut self) -> Result<(), StreamError> {
        self.tx.take().map(drop).ok_or(StreamError::Closed)
    }
}

#[async_trait]
impl RecvStream for MemoryRecvStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>, StreamError> {
        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.len());
                buf[..n].copy_from_slice(&self.pending.split_to(n));
                return Ok(Some(n));
            }
            let frame = tokio::select! {
                biased;
                frame = self.rx.recv() => frame,
                reason = self.shared.wait() => return Err(reason.into()),
            };
            match frame {
                Some(Frame::Data(data)) => self.pending = data,
                Some(Frame::Reset(code)) => return Err(StreamError::Reset(code)),
                None => return Ok(None),
            }
        }
    }

    fn stop(&mut self, code: u32) {
        let _ = self.stopped.set(code);
        self.rx.close();
    }
}

/// Sending side of one direction of a connection.
struct Outbox {
    uni: mpsc::UnboundedSender<MemoryRecvStream>,
    bi: mpsc::UnboundedSender<(MemorySendStream, MemoryRecvStream)>,
    datagrams: mpsc::UnboundedSender<Bytes>,
}

/// Receiving side of one direction of a connection.
struct Inbox {
    uni: Mutex<mpsc::UnboundedReceiver<MemoryRecvStream>>,
    bi: Mutex<mpsc::UnboundedReceiver<(MemorySendStream, MemoryRecvStream)>>,
    datagrams: Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

fn wires() -> (Outbox, Inbox) {
    let (uni_tx, uni_rx) = mpsc::unbounded_channel();
    let (bi_tx, bi_rx) = mpsc::unbounded_channel();
    let (dgram_tx, dgram_rx) = mpsc::unbounded_channel();
    (
        Outbox {
            uni: uni_tx,
            bi: bi_tx,
            datagrams: dgram_tx,
        },
        Inbox {
            uni: Mutex::new(uni_rx),
            bi: Mutex::new(bi_rx),
            datagrams: Mutex::new(dgram_rx),
        },
    )
}

struct Endpoint {
    shared: Arc<Shared>,
    outbox: Outbox,
    inbox: Inbox,
    max_datagram_size: AtomicUsize,
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.shared
            .close(SessionError::Closed("connection dropped".to_string()));
    }
}

/// One end of an in-memory session.
#[derive(Clone)]
pub struct MemorySession {
    endpoint: Arc<Endpoint>,
}

impl MemorySession {
    fn connected_pair() -> (MemorySession, MemorySession) {
        let shared = Arc::new(Shared::new());
        let (a_out, b_in) = wires();
        let (b_out, a_in) = wires();
        let a = Endpoint {
            shared: shared.clone(),
            outbox: a_out,
            inbox: a_in,
            max_datagram_size: AtomicUsize::new(usize::MAX),
        };
        let b = Endpoint {
            shared,
            outbox: b_out,
            inbox: b_in,
            max_datagram_size: AtomicUsize::new(usize::MAX),
        };
        (
            MemorySession {
                endpoint: Arc::new(a),
            },
            MemorySession {
                endpoint: Arc::new(b),
            },
        )
    }

    fn shared(&self) -> &Arc<Shared> {
        &self.endpoint.shared
    }

    fn check_open(&self) -> Result<(), SessionError> {
        match self.shared().error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn peer_gone() -> SessionError {
        SessionError::Closed("peer went away".to_string())
    }

    pub fn is_closed(&self) -> bool {
        self.shared().error().is_some()
    }

    /// Datagrams this end sends above `size` bytes fail with
    /// [`SessionError::Transport`], like an oversized QUIC datagram.
    pub fn set_max_datagram_size(&self, size: usize) {
        self.endpoint
            .max_datagram_size
            .store(size, Ordering::Relaxed);
    }
}

#[async_trait]
impl Session for MemorySession {
    type SendStream = MemorySendStream;
    type RecvStream = MemoryRecvStream;

    async fn accept_uni(&self) -> Result<MemoryRecvStream, SessionError> {
        self.check_open()?;
        let mut incoming = self.endpoint.inbox.uni.lock().await;
        tokio::select! {
            stream = incoming.recv() => stream.ok_or_else(Self::peer_gone),
            reason = self.shared().wait() => Err(reason),
        }
    }

    async fn accept_bi(&self) -> Result<(MemorySendStream, MemoryRecvStream), SessionError> {
        self.check_open()?;
        let mut incoming = self.endpoint.inbox.bi.lock().await;
        tokio::select! {
            stream = incoming.recv() => stream.ok_or_else(Self::peer_gone),
            reason = self.shared().wait() => Err(reason),
        }
    }

    async fn open_uni(&self) -> Result<MemorySendStream, SessionError> {
        self.check_open()?;
        let (send, recv) = stream(self.shared());
        self.endpoint
            .outbox
            .uni
            .send(recv)
            .map_err(|_| Self::peer_gone())?;
        Ok(send)
    }

    async fn open_bi(&self) -> Result<(MemorySendStream, MemoryRecvStream), SessionError> {
        self.check_open()?;
        let (local_send, peer_recv) = stream(self.shared());
        let (peer_send, local_recv) = stream(self.shared());
        self.endpoint
            .outbox
            .bi
            .send((peer_send, peer_recv))
            .map_err(|_| Self::peer_gone())?;
        Ok((local_send, local_recv))
    }

    async fn read_datagram(&self) -> Result<Bytes, SessionError> {
        self.check_open()?;
        let mut incoming = self.endpoint.inbox.datagrams.lock().await;
        tokio::select! {
            datagram = incoming.recv() => datagram.ok_or_else(Self::peer_gone),
            reason = self.shared().wait() => Err(reason),
        }
    }

    fn send_datagram(&self, payload: Bytes) -> Result<(), SessionError> {
        self.check_open()?;
        let max = self.endpoint.max_datagram_size.load(Ordering::Relaxed);
        if payload.len() > max {
            return Err(SessionError::Transport(format!(
                "datagram of {} bytes exceeds the maximum of {max}",
                payload.len()
            )));
        }
        self.endpoint
            .outbox
            .datagrams
            .send(payload)
            .map_err(|_| Self::peer_gone())
    }

    async fn closed(&self) -> SessionError {
        self.shared().wait().await
    }

    fn close(&self, code: u32, reason: &[u8]) {
        self.shared().close(SessionError::Closed(format!(
            "closed by application with code {code}: {}",
            String::from_utf8_lossy(reason)
        )));
    }
}

/// Server side of a pending in-memory session.
pub struct MemoryRequest {
    url: Url,
    origin: Option<String>,
    session: MemorySession,
    verdict: oneshot::Sender<Result<(), StatusCode>>,
}

/// Client side of a pending in-memory session.
pub struct MemoryClient {
    session: MemorySession,
    verdict: oneshot::Receiver<Result<(), StatusCode>>,
}

impl MemoryClient {
    /// Wait for the server to accept or reject the request.
    pub async fn established(self) -> Result<MemorySession, StatusCode> {
        match self.verdict.await {
            Ok(Ok(())) => Ok(self.session),
            Ok(Err(status)) => Err(status),
            Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }
}

/// Create a session request for `url` carrying `origin`, plus the client end
/// waiting on it.
pub fn request(url: &str, origin: Option<&str>) -> anyhow::Result<(MemoryRequest, MemoryClient)> {
    let url = Url::parse(url)?;
    let (server, client) = MemorySession::connected_pair();
    let (verdict_tx, verdict_rx) = oneshot::channel();
    Ok((
        MemoryRequest {
            url,
            origin: origin.map(str::to_owned),
            session: server,
            verdict: verdict_tx,
        },
        MemoryClient {
            session: client,
            verdict: verdict_rx,
        },
    ))
}

#[async_trait]
impl SessionRequest for MemoryRequest {
    type Session = MemorySession;

    fn url(&self) -> &Url {
        &self.url
    }

    fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    async fn accept(self) -> anyhow::Result<MemorySession> {
        self.verdict
            .send(Ok(()))
            .map_err(|_| anyhow::anyhow!("client abandoned the session request"))?;
        Ok(self.session)
    }

    async fn reject(self, status: StatusCode) -> anyhow::Result<()> {
        let _ = self.verdict.send(Err(status));
        self.session.close(u32::from(status.as_u16()), b"rejected");
        Ok(())
    }
}
