//! # Pitch Lake Database Crate
//!
//! A high-level, application-specific interface to the indexer's PostgreSQL
//! database. The websocket server is a read-only consumer: point and list
//! lookups for session snapshots, plus a LISTEN/NOTIFY change stream that
//! feeds the dispatcher.
//!
//! ## Architectural Principles
//!
//! - **Adapter:** encapsulates all SQL and channel names. The rest of the
//!   application sees `DbRepository` and `ChangeStream`, never raw queries.
//! - **Asynchronous & Pooled:** all operations are async on a shared
//!   `PgPool`; the change stream holds its own dedicated connection.
//! - **Schema ownership:** the indexer owns the schema and its triggers.
//!   This crate runs no migrations and creates no triggers.
//!
//! ## Public API
//!
//! - `connect`: establish the connection pool.
//! - `DbRepository`: the snapshot/point-lookup surface.
//! - `ChangeStream`: the live notification stream.
//! - `DbError`: the error type for everything above.

// Declare the modules that constitute this crate.
pub mod connection;
pub mod error;
pub mod listen;
pub mod repository;

// Re-export the key components to create a clean, public-facing API.
pub use connection::connect;
pub use error::DbError;
pub use listen::ChangeStream;
pub use repository::DbRepository;
