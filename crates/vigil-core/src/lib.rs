//! # vigil-core
//!
//! Core abstractions shared by all vigil components:
//!
//! - **Identifiers**: the strongly-typed [`OperationId`]
//! - **Error Types**: shared error definitions and result types
//! - **Observability**: logging initialization and span helpers
//!
//! ## Crate Boundary
//!
//! `vigil-core` is the only crate allowed to define shared primitives.
//! The domain logic lives in `vigil-ops`; the HTTP surface in
//! `vigil-api`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod error;
pub mod id;
pub mod observability;

pub use error::{Error, Result};
pub use id::OperationId;
