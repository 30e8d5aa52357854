//! Test utilities for Keel.
//!
//! - [`MockConnection`]: a scripted connection that stages transactional
//!   writes, publishes them on commit and can fail a chosen statement
//! - [`Patient`] and [`Ward`]: fixture entities with integer and text keys

pub mod fixtures;
pub mod mock;

pub use fixtures::{Patient, Ward, patient_row, ward_row};
pub use mock::{MockConnection, MockTransaction, Recorded};
