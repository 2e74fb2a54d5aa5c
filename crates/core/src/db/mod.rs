//! SQLite plumbing shared by the cache store and the subscription registry.
//!
//! Both stores run on tokio-rusqlite connections opened with WAL pragmas and
//! their own ordered migration set.

pub mod connection;
pub mod migrations;

pub use connection::open;
pub use migrations::Migration;
