// Copyright 2026 Gatekeeper Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! SIMD-accelerated JSON parsing for the ingest hot path (§4.7).
//!
//! `simd_json` parses its input in place, so a body has to live in a
//! mutable buffer. Each worker thread keeps one scratch `Vec<u8>` alive for
//! the lifetime of the thread; a request body is copied into it once and
//! the buffer's capacity only grows on the first few requests, after which
//! steady-state ingest traffic never touches the allocator for parsing.

use std::cell::RefCell;

use crate::api::ingest::IngestEvent;

thread_local! {
    static SCRATCH: RefCell<Vec<u8>> = RefCell::new(Vec::with_capacity(4096));
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ParseError(String);

fn parse_in_scratch<T, F>(body: &[u8], f: F) -> Result<T, ParseError>
where
    F: FnOnce(&mut [u8]) -> simd_json::Result<T>,
{
    SCRATCH.with(|cell| {
        let mut buf = cell.borrow_mut();
        buf.clear();
        buf.extend_from_slice(body);
        f(&mut buf).map_err(|e| ParseError(e.to_string()))
    })
}

/// Parses a single `{u, v, t}` ingest event body.
pub fn parse_event(body: &[u8]) -> Result<IngestEvent, ParseError> {
    parse_in_scratch(body, |buf| simd_json::serde::from_slice(buf))
}

/// Parses a `POST /ingest/batch` body: a bare JSON array of events (§6).
pub fn parse_batch(body: &[u8]) -> Result<Vec<IngestEvent>, ParseError> {
    parse_in_scratch(body, |buf| simd_json::serde::from_slice(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_maps_short_field_names() {
        let body = br#"{"u":"user-1","v":1.5,"t":42}"#.to_vec();
        let event = parse_event(&body).unwrap();
        assert_eq!(event.entity_id, "user-1");
        assert_eq!(event.value, 1.5);
        assert_eq!(event.timestamp_ns, 42);
    }

    #[test]
    fn test_parse_batch_is_bare_array() {
        let body = br#"[{"u":"a","v":1.0,"t":1},{"u":"b","v":2.0,"t":2}]"#.to_vec();
        let events = parse_batch(&body).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].entity_id, "a");
        assert_eq!(events[1].entity_id, "b");
    }

    #[test]
    fn test_malformed_body_is_an_error() {
        let body = b"not json".to_vec();
        assert!(parse_event(&body).is_err());
    }

    #[test]
    fn test_scratch_buffer_is_reused_across_calls() {
        // Regression guard: an earlier call's leftover bytes must never
        // leak into a shorter follow-up body.
        let long = format!(r#"{{"u":"{}","v":1.0,"t":1}}"#, "x".repeat(64));
        parse_event(long.as_bytes()).unwrap();
        let short = br#"{"u":"y","v":2.0,"t":2}"#.to_vec();
        let event = parse_event(&short).unwrap();
        assert_eq!(event.entity_id, "y");
    }
}
