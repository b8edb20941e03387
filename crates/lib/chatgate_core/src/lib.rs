//! # chatgate_core
//!
//! Core domain logic for Chatgate: access tokens, entitlement lookups,
//! payload sanitization and the retrying upstream call.

pub mod authorizer;
pub mod codec;
pub mod config;
pub mod entitlement;
pub mod issuer;
pub mod sanitize;
pub mod time;
pub mod token;
pub mod upstream;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
