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

//! Payload transform applied by every echo path.

use bytes::Bytes;

/// Uppercase every ASCII letter, leaving all other bytes untouched.
///
/// The result never aliases `payload`, and has the same length.
pub fn transform(payload: &[u8]) -> Bytes {
    Bytes::from(payload.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uppercases_ascii() {
        assert_eq!(transform(b"hello"), Bytes::from_static(b"HELLO"));
        assert_eq!(transform(b"ping"), Bytes::from_static(b"PING"));
    }

    #[test]
    fn test_non_alphabetic_bytes_unchanged() {
        let input = [0u8, b'1', b'-', 0xff, 0xc3, 0xa9, b'a'];
        let out = transform(&input);
        assert_eq!(out.len(), input.len());
        assert_eq!(&out[..], &[0u8, b'1', b'-', 0xff, 0xc3, 0xa9, b'A']);
    }

    #[test]
    fn test_idempotent() {
        let inputs: [&[u8]; 4] = [b"", b"MiXeD cAsE 123", b"\x00\x7f\x80", b"already UPPER"];
        for input in inputs {
            let once = transform(input);
            assert_eq!(transform(&once), once);
        }
    }

    #[test]
    fn test_empty_payload() {
        assert!(transform(b"").is_empty());
    }
}
