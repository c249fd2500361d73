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

use std::sync::atomic::{AtomicU64, Ordering};

use crate::transport::StreamKind;

/// Per-session counters. Every task of a session shares one instance.
#[derive(Debug, Default)]
pub struct SessionStats {
    datagrams_received: AtomicU64,
    datagrams_sent: AtomicU64,
    datagram_send_failures: AtomicU64,
    uni_streams_accepted: AtomicU64,
    bidi_streams_accepted: AtomicU64,
    streams_opened: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    workers_started: AtomicU64,
    workers_exited: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub datagrams_received: u64,
    pub datagrams_sent: u64,
    pub datagram_send_failures: u64,
    pub uni_streams_accepted: u64,
    pub bidi_streams_accepted: u64,
    pub streams_opened: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub workers_started: u64,
    pub workers_exited: u64,
}

impl StatsSnapshot {
    pub fn workers_running(&self) -> u64 {
        self.workers_started.saturating_sub(self.workers_exited)
    }
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn datagram_received(&self) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn datagram_sent(&self) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn datagram_send_failed(&self) {
        self.datagram_send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_accepted(&self, kind: StreamKind) {
        let counter = match kind {
            StreamKind::Uni => &self.uni_streams_accepted,
            StreamKind::Bidi => &self.bidi_streams_accepted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_opened(&self) {
        self.streams_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read(&self, bytes: usize) {
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn written(&self, bytes: usize) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn worker_started(&self) {
        self.workers_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_exited(&self) {
        self.workers_exited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            datagram_send_failures: self.datagram_send_failures.load(Ordering::Relaxed),
            uni_streams_accepted: self.uni_streams_accepted.load(Ordering::Relaxed),
            bidi_streams_accepted: self.bidi_streams_accepted.load(Ordering::Relaxed),
            streams_opened: self.streams_opened.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            workers_started: self.workers_started.load(Ordering::Relaxed),
            workers_exited: self.workers_exited.load(Ordering::Relaxed),
        }
    }
}
