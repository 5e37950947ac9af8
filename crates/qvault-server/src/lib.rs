//! `QVault` HTTP server.
//!
//! Wires the core library and a storage backend into a running Axum server.
//! The HTTP layer is a thin shell: every handler extracts the request, runs
//! quorum authorization, calls one core operation, and maps the result to a
//! status code. No domain logic lives here.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
