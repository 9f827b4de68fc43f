//! Core authsync library (identity provider client, state store, session sync).

pub mod config;
pub mod error;
pub mod identity;
pub mod kv;
pub mod logging;
pub mod model;
pub mod persist;
pub mod preferences;
pub mod store;
pub mod sync;
pub mod validation;
