//! SQLite-backed session storage for web session managers.
//!
//! One row per session identifier: a JSON-encoded key/value bag plus an
//! absolute expiration deadline. A session manager plugs [`SessionDatabase`]
//! in as its storage backend; expiry is advisory state the manager compares
//! against its own clock, nothing here reaps expired rows.

pub mod config;
pub mod data;
pub mod database;
pub mod error;
pub mod store;

pub use {
    config::SessionDbConfig,
    data::SessionData,
    database::{LifeTime, SessionDatabase},
    error::{Result, SessionError},
    store::{SessionRecord, SessionStore},
};
