//! Persistence layer: libSQL-backed storage for agents, contacts, messages,
//! and the blacklist.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{ContactFilter, Database};
