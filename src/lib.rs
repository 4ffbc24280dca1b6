//! Receives signed Novu email webhooks, keeps a three-day log of them and
//! serves a live inbox view over that log.

pub mod auth;
pub mod config;
pub mod error;
pub mod feed;
pub mod http_server;
pub mod ingest;
pub mod live;
pub mod retention;
pub mod selection;
pub mod store;
pub mod types;
pub mod verification;
pub mod viewer;

pub use error::{Error, Result};
