//! Sapa storage crate - SQLite persistence for conversation sessions.
//!
//! Provides a WAL-mode SQLite database with migrations and the session store
//! that keeps one atomically replaced transcript record per session.

pub mod db;
pub mod migrations;
pub mod sessions;

pub use db::Database;
pub use sessions::SessionStore;
