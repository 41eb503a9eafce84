//! Gateway core library.
//!
//! Exports the stream accumulator, the governance engine, and the shared
//! runtime primitives both lean on, plus the HTTP glue that wires them to
//! actix-web.

pub mod accumulator;
pub mod config;
pub mod error;
pub mod governance;
pub mod ingress;
pub mod models;
pub mod routes;
pub mod runtime;

pub use config::AppSettings;
pub use error::AppError;
