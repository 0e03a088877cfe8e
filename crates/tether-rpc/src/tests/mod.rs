//! Test module for tether-rpc
//!
//! End-to-end scenarios against in-memory and real WebSocket servers:
//! - Request/response correlation and case conversion
//! - Cancellation and progress
//! - Reconnection and pending request rejection
//! - Chunked uploads, including cancellation mid-stream

// Fixtures build byte patterns with truncating casts
#![allow(clippy::cast_possible_truncation)]

mod session_tests;
