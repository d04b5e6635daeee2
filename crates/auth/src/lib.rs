//! `linkdesk-auth`: admin authentication boundary.
//!
//! This crate is decoupled from HTTP and storage: callers hand it a
//! [`RequestContext`] and get back a decision.

pub mod claims;
pub mod gate;
pub mod roles;
pub mod token;

pub use claims::AuthClaims;
pub use gate::{AuthorizationGate, RequestContext, SESSION_COOKIE};
pub use roles::Role;
pub use token::{VerificationFailure, verify, verify_at};
