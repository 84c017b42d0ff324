//! # SVTK Common Library
//!
//! Shared code for the survey session tracker:
//! - Database schema and session row model
//! - Lifecycle event payloads
//! - Configuration loading
//! - Time and identifier helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
