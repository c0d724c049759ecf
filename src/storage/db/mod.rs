//! Database connection layer.
//!
//! Only SQLite is supported. The pool wrapper hides the sqlx options needed
//! to keep WAL mode on file databases and a single shared connection for
//! in-memory databases.
//!
//! # Example
//!
//! ```ignore
//! let pool = SqlitePool::connect("sqlite:data/nrt.db?mode=rwc").await?;
//! let row = sqlx::query("SELECT 1").fetch_one(pool.inner()).await?;
//! ```

mod sqlite;

pub use sqlite::SqlitePool;
