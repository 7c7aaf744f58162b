//! This module contains utilities for testing the engines without real network I/O. They are
//!  used by the crate's own unit tests, and they are exported for end-to-end tests and
//!  application testing.
//!
//! Test doubles are part of the crate's regular (non-#[cfg(test)]) code so that integration
//!  tests in `tests/` can use them as well.

pub mod addr;
pub mod tracking_socket;
