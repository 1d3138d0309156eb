//! Primary store access.
//!
//! The [`transaction`] module defines the store seam: [`PrimaryStore`] opens read-committed
//! transactions and [`StoreTx`] exposes the handful of row operations the services need. Two
//! implementations exist:
//!
//! - [`postgres::PgStore`] delegates each operation to a repository in [`handlers`], all bound to
//!   the same open `sqlx` transaction.
//! - [`memory::MemoryStore`] keeps the tables in process. It is selected with
//!   `database.type: memory` and backs the unit tests.
//!
//! Store errors are reported as [`errors::DbError`] and turned into service errors by the caller,
//! which knows which audited operation was running.

pub mod errors;
pub mod handlers;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod transaction;

pub use transaction::{PrimaryStore, StoreTx, TransactionManager};
