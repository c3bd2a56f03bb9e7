//! Credential hashing
//!
//! - Passwords: SHA-256 over `salt ":" password`, hex encoded, with a
//!   random 16-byte salt per user
//! - Session tokens: 32 random bytes, hex encoded; only their SHA-256 is
//!   stored so a leaked table cannot be replayed
//!
//! Pure functions only; no database or HTTP framework dependencies.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Credential validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Password shorter than the configured minimum
    PasswordTooShort { min_length: usize },
    /// Email address is not plausibly shaped
    InvalidEmail(String),
}

impl std::fmt::Display for CredentialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialError::PasswordTooShort { min_length } => {
                write!(f, "Password must be at least {} characters", min_length)
            }
            CredentialError::InvalidEmail(email) => write!(f, "Invalid email address: {}", email),
        }
    }
}

impl std::error::Error for CredentialError {}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// New random password salt (32 hex characters)
pub fn generate_salt() -> String {
    random_hex(16)
}

/// Hash a password with its salt (64 hex characters)
///
/// # Examples
///
/// ```
/// use lms_common::api::auth::hash_password;
///
/// let hash = hash_password("correct horse", "0011");
/// assert_eq!(hash.len(), 64);
/// assert_eq!(hash, hash_password("correct horse", "0011"));
/// ```
pub fn hash_password(password: &str, salt: &str) -> String {
    sha256_hex(&format!("{}:{}", salt, password))
}

/// Compare a password against a stored hash
///
/// An empty stored hash never matches (accounts created without a
/// password, e.g. by import).
pub fn verify_password(password: &str, salt: &str, stored_hash: &str) -> bool {
    if stored_hash.is_empty() {
        return false;
    }
    constant_time_eq(hash_password(password, salt).as_bytes(), stored_hash.as_bytes())
}

/// New opaque session token (64 hex characters)
pub fn generate_session_token() -> String {
    random_hex(32)
}

/// Hash a session token for storage and lookup
pub fn hash_token(token: &str) -> String {
    sha256_hex(token)
}

/// Check password length
pub fn validate_password(password: &str, min_length: usize) -> Result<(), CredentialError> {
    if password.chars().count() < min_length {
        return Err(CredentialError::PasswordTooShort { min_length });
    }
    Ok(())
}

/// Minimal email shape check: one `@`, non-empty local part, dotted domain
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.contains(char::is_whitespace)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
