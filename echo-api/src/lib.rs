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

//! Uppercase echo service over WebTransport.
//!
//! One session multiplexes datagrams, unidirectional streams and
//! bidirectional streams. [`gate::serve_request`] admits a session request
//! and [`session::SessionHandle`] runs every channel of the session
//! concurrently until the session ends.

pub mod acceptor;
pub mod config;
pub mod constants;
pub mod datagram;
pub mod errors;
pub mod gate;
pub mod lifetime;
pub mod session;
pub mod stats;
pub mod transform;
pub mod transport;
pub mod webtransport;
pub mod worker;
