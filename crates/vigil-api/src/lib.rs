//! # vigil-api
//!
//! HTTP surface for the vigil operation tracker.
//!
//! Exposes the six tracker operations as JSON endpoints plus a
//! server-sent-events stream for watching a single operation:
//!
//! - `POST /v1/operations` - register
//! - `GET /v1/operations` - query
//! - `GET /v1/operations/{id}` - get
//! - `PATCH /v1/operations/{id}` - update ("ping")
//! - `POST /v1/operations/{id}/complete` - complete
//! - `GET /v1/operations/{id}/watch` - SSE stream of snapshots
//!
//! The transport is a thin collaborator over [`vigil_ops`]: request
//! validation and error mapping live here, every domain rule lives in
//! the ops crate.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod routes;
pub mod server;

pub use config::Config;
pub use server::{AppState, router};
