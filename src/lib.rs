//! # Latchkey (Credential & Token Lifecycle)
//!
//! `latchkey` is an authentication service: registration, login, logout, email
//! verification, password reset, and access/refresh token issuance backed by
//! PostgreSQL.
//!
//! ## Credentials
//!
//! Passwords are hashed with **Argon2id** using a per-user random salt. Verification
//! recomputes the hash and compares it in constant time. Hashing runs on the blocking
//! thread pool so it never stalls the async runtime.
//!
//! ## Tokens
//!
//! - **Access tokens** are HS256 JWTs carrying `sub`, `email` and a fresh `jti`.
//! - **Refresh tokens** are opaque random strings persisted per user. Rotation revokes
//!   the presented token and links it to its successor inside one transaction.
//! - **Verification links** (email verification, password reset) carry a raw token;
//!   only `HMAC-SHA256(secret, context:token)` is stored. Each link is single-use and
//!   any attempt that finds a record clears every record for that user.
//!
//! ## Enumeration Resistance
//!
//! Every handler enforces a minimum wall-clock duration, and the HTTP boundary
//! collapses outcomes that would reveal whether an account exists.

pub mod api;
pub mod cli;
pub mod clock;
pub mod crypto;
pub mod email;
pub mod error;
pub mod handlers;
pub mod model;
pub mod random;
pub mod redact;
pub mod services;
pub mod store;

pub use error::{Error, Result};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
