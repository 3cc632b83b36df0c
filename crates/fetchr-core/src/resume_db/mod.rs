//! Persisted transfer state (SQLite via sqlx).
//!
//! One row per in-progress transfer, keyed by task id. The row is written
//! after every completed segment and deleted once the file is assembled.

mod db;
mod transfers;

pub use db::ResumeDb;
pub use transfers::{task_id, TransferSummary};

#[cfg(test)]
pub(crate) use db::open_memory;
