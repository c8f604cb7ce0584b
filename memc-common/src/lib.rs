// memc-common - Shared types for the memcache text-protocol client
//
// Endpoints, key rules, expiry and reply payload types used by memc-client
// and its callers.

pub mod error;
pub mod types;

// Re-export for convenience
pub use error::*;
pub use types::*;
