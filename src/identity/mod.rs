//! Caller identity: who is asking, and what credentials they map to.
//!
//! [`claim`] reads the subject email out of the edge-issued assertion
//! header; [`resolver`] turns that email into the stored
//! [`IdentityRecord`](resolver::IdentityRecord).

pub mod claim;
pub mod resolver;

pub use claim::{ClaimExtractor, IdentityClaim};
pub use resolver::{IdentityRecord, IdentityResolver};
