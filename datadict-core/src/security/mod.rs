//! Credential protection.
//!
//! Credentials live in `Zeroizing` containers so their memory is cleared on
//! drop, and their `Debug` output never shows the secret.

mod credentials;

pub use credentials::Credentials;
