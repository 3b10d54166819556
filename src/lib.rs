//! EduSync Server Library
//!
//! Offline-first synchronization engine: clients submit batches of queued
//! mutations, the server reconciles them against a keyed state store and
//! answers with accepted ids, conflicts and the changes the client missed.
//!
//! # Modules
//!
//! - `sync`: reconciliation engine, state stores, access policy, history
//! - `routes`: HTTP surface
//! - `state`: shared application state

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
pub mod sync;
