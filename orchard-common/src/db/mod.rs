//! Database layer: schema initialization, migrations, models, settings and
//! the durable task queue. All workers share one SQLite database; it is the
//! single source of truth and the only coordination point between processes.

pub mod init;
pub mod migrations;
pub mod models;
pub mod settings;
pub mod tasks;

pub use init::{init_database, init_schema};
