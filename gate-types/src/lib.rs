//! # gate-types
//!
//! Shared types for the 0k-Gate authorization gateway.
//!
//! This crate is framework-free so a sync engine can embed it without pulling
//! in the HTTP or storage stack:
//! - [`WireMessage`] - The sync protocol envelope the wire guard inspects and stamps
//! - [`key_variants`], [`membership_hex`] - Public-key normalization
//! - [`TokenId`] - Bearer token identifiers
//! - [`Principal`], [`TrustSource`] - Authorization results
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod keys;
mod principal;
mod wire;

pub use error::{KeyError, TypesError};
pub use ids::TokenId;
pub use keys::{key_variants, membership_hex, strip_key};
pub use principal::{Principal, TrustSource};
pub use wire::{is_identity_soul, Direction, WireHeaders, WireMessage, IDENTITY_MARKER};
