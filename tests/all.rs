//! End-to-end session tests against a mock chat server.
//!
//! Fixtures live in `common/`; scenarios are grouped under `suite/`.

mod common;
mod suite;
