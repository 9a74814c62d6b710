//! Volley Storage - Record store abstraction
//!
//! This crate provides the transactional record store backing the campaign
//! dispatcher: PostgreSQL for production and an in-memory store for tests
//! and embedded use.

pub mod db;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use db::DatabasePool;
pub use memory::MemoryStore;
pub use models::*;
pub use postgres::PgStore;
pub use store::{NewCampaign, NewLogEntry, NewReceiver, NewSender, NewTemplate, RecordStore};
