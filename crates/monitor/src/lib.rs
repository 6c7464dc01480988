//! Polling directory monitor with a durable change lifecycle.
//!
//! A [`snapshot::TreeObserver`] diffs the monitored tree every poll tick, the
//! [`controller::ChangeController`] turns each change into exactly one
//! [`processor::Processor`] call and records the outcome in a
//! [`store::PathRecordStore`], and the [`reconcile`] passes catch up on
//! anything missed while the process was down or a call failed.

pub mod controller;
pub mod error;
pub mod filter;
pub mod processor;
pub mod processor_default;
pub mod processor_shell;
pub mod reconcile;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;

pub use error::{Error, Result};

/// Run database migrations for the monitor crate.
///
/// This creates the `path_records` table. Should be called at application
/// startup when using [`store_sqlite::SqliteStore`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
