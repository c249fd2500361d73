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

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::errors::SessionError;
use crate::lifetime::SessionLifetime;
use crate::stats::SessionStats;
use crate::transform::transform;
use crate::transport::Session;

/// Echo datagrams until the session ends. Returns the reason it ended.
pub async fn datagram_loop<S: Session>(
    session: S,
    lifetime: SessionLifetime,
    stats: Arc<SessionStats>,
) -> SessionError {
    loop {
        let datagram = match lifetime.guard(session.read_datagram()).await {
            Ok(Ok(datagram)) => datagram,
            Ok(Err(e)) | Err(e) => {
                info!("Session closed, ending datagram listener: {}", e);
                return e;
            }
        };
        stats.datagram_received();
        debug!("Received datagram: {}", String::from_utf8_lossy(&datagram));

        let reply = transform(&datagram);
        debug!("Sending datagram: {}", String::from_utf8_lossy(&reply));
        match session.send_datagram(reply) {
            Ok(()) => stats.datagram_sent(),
            Err(e) => {
                // Datagrams are unreliable anyway, keep listening.
                warn!("Error sending datagram: {}", e);
                stats.datagram_send_failed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory;
    use crate::transport::SessionRequest;
    use bytes::Bytes;
    use std::time::Duration;

    #[tokio::test]
    async fn test_datagram_echo() {
        let (request, client) = memory::request("https://localhost/counter", None).unwrap();
        let server = request.accept().await.unwrap();
        let client = client.established().await.unwrap();
        let lifetime = SessionLifetime::new();
        let stats = Arc::new(SessionStats::new());
        let task = tokio::spawn(datagram_loop(server, lifetime.clone(), stats.clone()));

        client.send_datagram(Bytes::from_static(b"ping")).unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(1), client.read_datagram())
            .await
            .expect("reply expected")
            .unwrap();
        assert_eq!(reply, Bytes::from_static(b"PING"));

        lifetime.cancel();
        let reason = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop should stop")
            .unwrap();
        assert_eq!(reason, SessionError::Cancelled);
        assert_eq!(stats.snapshot().datagrams_sent, 1);
    }

    #[tokio::test]
    async fn test_failed_send_keeps_loop_running() {
        let (request, client) = memory::request("https://localhost/counter", None).unwrap();
        let server = request.accept().await.unwrap();
        let client = client.established().await.unwrap();
        server.set_max_datagram_size(4);
        let lifetime = SessionLifetime::new();
        let stats = Arc::new(SessionStats::new());
        let task = tokio::spawn(datagram_loop(server, lifetime.clone(), stats.clone()));

        client.send_datagram(Bytes::from_static(b"hello")).unwrap();
        client.send_datagram(Bytes::from_static(b"ping")).unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(1), client.read_datagram())
            .await
            .expect("reply expected")
            .unwrap();
        assert_eq!(reply, Bytes::from_static(b"PING"));

        lifetime.cancel();
        let reason = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop should stop")
            .unwrap();
        assert_eq!(reason, SessionError::Cancelled);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.datagrams_received, 2);
        assert_eq!(snapshot.datagram_send_failures, 1);
        assert_eq!(snapshot.datagrams_sent, 1);
    }

    #[tokio::test]
    async fn test_datagram_loop_ends_on_close() {
        let (request, client) = memory::request("https://localhost/counter", None).unwrap();
        let server = request.accept().await.unwrap();
        let client = client.established().await.unwrap();
        let task = tokio::spawn(datagram_loop(
            server,
            SessionLifetime::new(),
            Arc::new(SessionStats::new()),
        ));
        client.close(0, b"");
        let reason = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop should stop")
            .unwrap();
        assert!(matches!(reason, SessionError::Closed(_)));
    }
}
