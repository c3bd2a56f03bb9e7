//! # LMS Common Library
//!
//! Shared code for the LMS workspace including:
//! - Database initialization, migrations and row models
//! - Event types (LmsEvent enum) and the broadcast event bus
//! - API envelope types and credential hashing
//! - Configuration loading and root folder resolution
//! - Time utilities

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod sse;
pub mod time;

pub use error::{Error, Result};
