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

//! `web-transport-quinn` behind the crate's transport traits.

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use url::Url;

use crate::errors::{SessionError, StreamError};
use crate::transport::{RecvStream, SendStream, Session, SessionRequest};

fn session_error(err: web_transport_quinn::SessionError) -> SessionError {
    SessionError::Closed(err.to_string())
}

pub struct QuinnSendStream(web_transport_quinn::SendStream);

pub struct QuinnRecvStream(web_transport_quinn::RecvStream);

#[async_trait]
impl SendStream for QuinnSendStream {
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), StreamError> {
        use web_transport_quinn::WriteError;
        self.0.write_all(buf).await.map_err(|e| match e {
            WriteError::Stopped(code) => StreamError::Reset(code),
            WriteError::SessionError(e) => StreamError::Session(session_error(e)),
            _ => StreamError::Closed,
        })
    }

    fn finish(&mut self) -> Result<(), StreamError> {
        self.0.finish().map_err(|_| StreamError::Closed)
    }
}

#[async_trait]
impl RecvStream for QuinnRecvStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>, StreamError> {
        use web_transport_quinn::ReadError;
        self.0.read(buf).await.map_err(|e| match e {
            ReadError::Reset(code) => StreamError::Reset(code),
            ReadError::SessionError(e) => StreamError::Session(session_error(e)),
            _ => StreamError::Closed,
        })
    }

    fn stop(&mut self, code: u32) {
        // Already-closed streams need no stop.
        let _ = self.0.stop(code);
    }
}

#[derive(Clone)]
pub struct QuinnSession(web_transport_quinn::Session);

#[async_trait]
impl Session for QuinnSession {
    type SendStream = QuinnSendStream;
    type RecvStream = QuinnRecvStream;

    async fn accept_uni(&self) -> Result<QuinnRecvStream, SessionError> {
        self.0
            .accept_uni()
            .await
            .map(QuinnRecvStream)
            .map_err(session_error)
    }

    async fn accept_bi(&self) -> Result<(QuinnSendStream, QuinnRecvStream), SessionError> {
        let (send, recv) = self.0.accept_bi().await.map_err(session_error)?;
        Ok((QuinnSendStream(send), QuinnRecvStream(recv)))
    }

    async fn open_uni(&self) -> Result<QuinnSendStream, SessionError> {
        self.0
            .open_uni()
            .await
            .map(QuinnSendStream)
            .map_err(session_error)
    }

    async fn open_bi(&self) -> Result<(QuinnSendStream, QuinnRecvStream), SessionError> {
        let (send, recv) = self.0.open_bi().await.map_err(session_error)?;
        Ok((QuinnSendStream(send), QuinnRecvStream(recv)))
    }

    async fn read_datagram(&self) -> Result<Bytes, SessionError> {
        self.0.read_datagram().await.map_err(session_error)
    }

    fn send_datagram(&self, payload: Bytes) -> Result<(), SessionError> {
        self.0.send_datagram(payload).map_err(session_error)
    }

    async fn closed(&self) -> SessionError {
        session_error(self.0.closed().await)
    }

    fn close(&self, code: u32, reason: &[u8]) {
        self.0.close(code, reason);
    }
}

/// A WebTransport CONNECT request waiting for a verdict.
pub struct QuinnRequest {
    inner: web_transport_quinn::Request,
    url: Url,
}

impl QuinnRequest {
    pub fn new(inner: web_transport_quinn::Request) -> Self {
        let url = inner.url().clone();
        Self { inner, url }
    }
}

#[async_trait]
impl SessionRequest for QuinnRequest {
    type Session = QuinnSession;

    fn url(&self) -> &Url {
        &self.url
    }

    // web-transport-quinn parses the CONNECT request into its target URL only;
    // the Origin header is not surfaced, so requests present as origin-less.
    fn origin(&self) -> Option<&str> {
        None
    }

    async fn accept(self) -> anyhow::Result<QuinnSession> {
        let session = self.inner.ok().await?;
        Ok(QuinnSession(session))
    }

    async fn reject(self, status: StatusCode) -> anyhow::Result<()> {
        self.inner.close(status).await?;
        Ok(())
    }
}
