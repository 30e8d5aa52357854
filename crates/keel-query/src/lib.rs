//! Composable conditions and SQL lowering for Keel.
//!
//! `keel-query` is the **statement construction layer**. It turns entity
//! descriptors and condition trees into SQL text plus positional arguments
//! and never touches a connection itself.
//!
//! # Role In The Architecture
//!
//! - **Condition algebra**: [`Condition`] trees lower with globally monotonic
//!   placeholder numbers.
//! - **Typed columns**: [`Column`] constants build conditions and orderings.
//! - **SELECT**: [`Select`] assembles projection, conditions, ordering and paging.
//! - **DML**: [`InsertBuilder`], [`UpdateBuilder`] and [`DeleteBuilder`] build the
//!   per-entry statements the unit-of-work flush runs.
//!
//! Execution lives in `keel-session`.

pub mod builder;
pub mod clause;
pub mod column;
pub mod condition;
pub mod select;

pub use builder::{DeleteBuilder, InsertBuilder, Statement, UpdateBuilder};
pub use clause::{Limit, Offset, OrderBy, OrderDirection};
pub use column::Column;
pub use condition::{CompareOp, Condition, Lowered};
pub use select::Select;
