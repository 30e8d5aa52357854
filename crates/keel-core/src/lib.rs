//! Core types and traits for Keel.
//!
//! This crate provides the foundational abstractions shared by every other
//! Keel crate:
//!
//! - [`Value`] is the tagged variant every field and argument travels as
//! - [`Row`] carries one result row and checks it against an entity shape
//! - [`EntityDescriptor`] and [`ColumnDescriptor`] declare a shape statically
//! - [`Entity`] maps a Rust struct onto that shape
//! - [`Connection`] and [`TransactionOps`] are the blocking store contract
//! - [`Error`] is the error taxonomy

pub mod connection;
pub mod entity;
pub mod error;
pub mod row;
pub mod types;
pub mod value;

pub use connection::{Connection, Dialect, IsolationLevel, TransactionOps};
pub use entity::{ColumnDescriptor, Entity, EntityDescriptor, EntityState};
pub use error::{
    ConnectionError, ConnectionErrorKind, Error, FlushError, MappingError, QueryError,
    QueryErrorKind, Result, ValidationError, ValidationErrorKind,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use types::SqlType;
pub use value::{Timestamp, Value};
