//! Secret handling utilities.
//!
//! Re-exports secrecy types so callers don't need a direct dependency to
//! read the database URL out of [`super::Config`].

pub use secrecy::{ExposeSecret, SecretString};
