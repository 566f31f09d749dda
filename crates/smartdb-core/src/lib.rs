//! Core types and capability traits for SmartDB.
//!
//! This crate provides the foundations the rest of the workspace builds on:
//!
//! - [`Value`] — the dynamically-typed SQL scalar
//! - [`Error`], [`ErrorKind`], [`DbResult`] — the single error channel
//! - [`Connection`], [`ResultSet`], [`Driver`] — the capability traits
//!   drivers implement
//! - [`TransactionGuard`] — scoped transactions with rollback on drop
//! - [`query_one`]/[`query_all`] — row materializers over any connection
//! - [`logging`] — env-driven structured logging

pub mod connection;
pub mod error;
pub mod logging;
pub mod query;
pub mod transaction;
pub mod value;

pub use connection::{Connection, Driver, ResultSet};
pub use error::{DbResult, Error, ErrorCounters, ErrorKind};
pub use query::{query_all, query_one, Row};
pub use transaction::TransactionGuard;
pub use value::Value;
