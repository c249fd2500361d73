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

//! Transport seam.
//!
//! The engine only talks to these traits. `webtransport` adapts
//! `web-transport-quinn` onto them and `transport::memory` provides an
//! in-process loopback used by the tests.

pub mod memory;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use url::Url;

use crate::errors::{SessionError, StreamError};

/// Receiving half of a stream.
#[async_trait]
pub trait RecvStream: Send + 'static {
    /// Read up to `buf.len()` bytes. `Ok(None)` means the peer finished the
    /// stream.
    async fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>, StreamError>;

    /// Tell the peer we will not read any more.
    fn stop(&mut self, code: u32);
}

/// Sending half of a stream.
#[async_trait]
pub trait SendStream: Send + 'static {
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), StreamError>;

    /// Gracefully close the sending side.
    fn finish(&mut self) -> Result<(), StreamError>;
}

/// An established session. Handles are cheap to clone and all clones refer to
/// the same session.
#[async_trait]
pub trait Session: Clone + Send + Sync + 'static {
    type SendStream: SendStream;
    type RecvStream: RecvStream;

    async fn accept_uni(&self) -> Result<Self::RecvStream, SessionError>;

    async fn accept_bi(&self) -> Result<(Self::SendStream, Self::RecvStream), SessionError>;

    async fn open_uni(&self) -> Result<Self::SendStream, SessionError>;

    async fn open_bi(&self) -> Result<(Self::SendStream, Self::RecvStream), SessionError>;

    async fn read_datagram(&self) -> Result<Bytes, SessionError>;

    /// Fire and forget. Delivery is never confirmed.
    fn send_datagram(&self, payload: Bytes) -> Result<(), SessionError>;

    /// Resolves once the session is closed, with the reason.
    async fn closed(&self) -> SessionError;

    fn close(&self, code: u32, reason: &[u8]);
}

/// A pending session-establishment request, handed to the entry point by the
/// listener.
#[async_trait]
pub trait SessionRequest: Send + 'static {
    type Session: Session;

    fn url(&self) -> &Url;

    /// Declared origin of the request, if the transport surfaces one.
    fn origin(&self) -> Option<&str>;

    async fn accept(self) -> anyhow::Result<Self::Session>;

    async fn reject(self, status: StatusCode) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Uni,
    Bidi,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Uni => f.write_str("uni"),
            StreamKind::Bidi => f.write_str("bidi"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Initiator {
    /// Opened by the remote endpoint.
    Peer,
    /// Opened by this server.
    Local,
}

/// Session-scoped stream identifier, laid out like a QUIC stream id: bit 0 is
/// the initiator (0 = peer, 1 = this server) and bit 1 the direction
/// (0 = bidi, 1 = uni).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    fn new(index: u64, initiator: Initiator, kind: StreamKind) -> Self {
        let initiator_bit = match initiator {
            Initiator::Peer => 0,
            Initiator::Local => 1,
        };
        let kind_bit = match kind {
            StreamKind::Bidi => 0,
            StreamKind::Uni => 2,
        };
        StreamId((index << 2) | kind_bit | initiator_bit)
    }

    pub fn initiator(self) -> Initiator {
        if self.0 & 1 == 0 {
            Initiator::Peer
        } else {
            Initiator::Local
        }
    }

    pub fn kind(self) -> StreamKind {
        if self.0 & 2 == 0 {
            StreamKind::Bidi
        } else {
            StreamKind::Uni
        }
    }

    pub fn index(self) -> u64 {
        self.0 >> 2
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out stream ids for one session. Ids are never reused.
#[derive(Debug, Default)]
pub struct StreamIds {
    // Indexed by the two low bits of the id.
    next: [AtomicU64; 4],
}

impl StreamIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, initiator: Initiator, kind: StreamKind) -> StreamId {
        let slot = StreamId::new(0, initiator, kind).into_inner() as usize;
        let index = self.next[slot].fetch_add(1, Ordering::Relaxed);
        StreamId::new(index, initiator, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_stream_id_layout_matches_quic() {
        let ids = StreamIds::new();
        assert_eq!(ids.next(Initiator::Peer, StreamKind::Bidi).into_inner(), 0);
        assert_eq!(ids.next(Initiator::Local, StreamKind::Bidi).into_inner(), 1);
        assert_eq!(ids.next(Initiator::Peer, StreamKind::Uni).into_inner(), 2);
        assert_eq!(ids.next(Initiator::Local, StreamKind::Uni).into_inner(), 3);
        assert_eq!(ids.next(Initiator::Peer, StreamKind::Bidi).into_inner(), 4);
    }

    #[test]
    fn test_stream_id_round_trips_its_attributes() {
        let ids = StreamIds::new();
        ids.next(Initiator::Local, StreamKind::Uni);
        let id = ids.next(Initiator::Local, StreamKind::Uni);
        assert_eq!(id.initiator(), Initiator::Local);
        assert_eq!(id.kind(), StreamKind::Uni);
        assert_eq!(id.index(), 1);
    }

    #[test]
    fn test_stream_ids_never_repeat() {
        let ids = StreamIds::new();
        let mut seen = HashSet::new();
        for _ in 0..64 {
            for initiator in [Initiator::Peer, Initiator::Local] {
                for kind in [StreamKind::Uni, StreamKind::Bidi] {
                    assert!(seen.insert(ids.next(initiator, kind)));
                }
            }
        }
    }
}
