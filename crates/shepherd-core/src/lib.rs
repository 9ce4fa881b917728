//! Core library for shepherd: church data models, service clients, local
//! cache, sign-in state and the broadcast dispatcher.
//!
//! The binary in `shepherd-cli` is a thin front end over this crate.

pub mod api;
pub mod auth;
pub mod broadcast;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod utils;

pub use config::Config;
pub use error::ValidationError;
