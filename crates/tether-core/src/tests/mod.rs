//! Test module for tether-core
//!
//! This module contains tests for:
//! - Configuration loading, defaults and client settings
//! - Session wiring between the client, the bus and the display cache
