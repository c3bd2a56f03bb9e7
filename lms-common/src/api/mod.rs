//! Shared HTTP API functionality
//!
//! Contains ONLY framework-independent pieces: the response envelope,
//! error kinds and credential hashing. The server wraps these with Axum
//! extractors and middleware.

pub mod auth;
pub mod types;

pub use auth::{
    generate_salt, generate_session_token, hash_password, hash_token, is_valid_email,
    validate_password, verify_password, CredentialError,
};
pub use types::{ApiEnvelope, ErrorKind};
