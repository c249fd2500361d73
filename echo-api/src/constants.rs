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

use std::time::Duration;

/// Capacity of the per-worker read buffer. Larger payloads are echoed one
/// chunk at a time.
pub const READ_BUFFER_CAPACITY: usize = 1024;

/// Written on the server-initiated bidirectional stream when a session starts.
pub const BIDI_GREETING: &[u8] = b"bidi";

/// Written on the server-initiated unidirectional stream when a session starts.
pub const UNI_GREETING: &[u8] = b"uni";

/// ALPN advertised by the QUIC endpoint. WebTransport rides on HTTP/3.
pub const WEB_TRANSPORT_ALPN: &[u8] = b"h3";

pub const DEFAULT_LISTEN_ADDR: &str = "[::]:4433";
pub const DEFAULT_PATH: &str = "/counter";
pub const DEFAULT_CERT_PATH: &str = "cert.pem";
pub const DEFAULT_KEY_PATH: &str = "cert.key";

/// "new-tab-page" admits a blank Chrome tab (DevTools console); "" admits
/// pages loaded from disk and clients that send no origin at all.
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "googlechrome.github.io",
    "127.0.0.1:8000",
    "localhost:8000",
    "new-tab-page",
    "",
];

pub const DEFAULT_MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 1000;

/// Application error code used when the server closes a session or stops a
/// stream it no longer reads.
pub const CLOSE_CODE_NORMAL: u32 = 0;
