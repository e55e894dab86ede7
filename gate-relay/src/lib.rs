//! # gate-relay
//!
//! Authorization gateway in front of a graph-sync relay.
//!
//! This crate decides, per HTTP request and per wire message, whether the
//! caller may write or use administrative endpoints:
//! - Resolves callers through an ordered trust hierarchy (shared secret,
//!   on-chain membership, bearer tokens, pre-authorization grants)
//! - Stamps outbound wire messages and silently drops unauthorized writes
//! - Issues, lists and revokes bearer tokens stored in a key-value graph
//! - Keeps a rate-limited audit trail of wire traffic
//!
//! ## Architecture
//!
//! ```text
//!  HTTP request ──► require_auth ──► AuthorizationHierarchy ──► handler
//!                                      │   │    │     │
//!                         shared secret┘   │    │     └ PreAuthorizationCache
//!                           MembershipGate ┘    └ TokenStore ──► GraphStore
//!
//!  wire message ──► WireGuard ──► sync engine
//!                      └──► ThrottledAuditLog ──► drain ──► AuditSink
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audit;
pub mod cleanup;
pub mod clock;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod http;
pub mod membership;
pub mod preauth;
pub mod server;
pub mod storage;
pub mod tokens;
pub mod wire;

pub use error::{GatewayError, Result};
pub use server::Gateway;
