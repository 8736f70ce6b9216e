// castcheck Infrastructure - SQLite Adapter
// Implements: ReportStore

mod connection;
mod migration;
mod report_store;

pub use connection::create_pool;
pub use migration::run_migrations;
pub use report_store::SqliteReportStore;

// sqlx errors become AppError::Database through `map_sqlx_error`; the orphan
// rule rules out a From impl in this crate
