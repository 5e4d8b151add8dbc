//! Tourbook API client
//!
//! This crate provides the REST client for the Tourbook backend, the auth
//! endpoint payloads, and the [`SessionManager`] that owns token state and
//! transparently refreshes expired credentials.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod resources;
pub mod rest;
pub mod session;

#[cfg(test)]
pub(crate) mod test_utils;

pub use auth::{AccountType, TokenPair, User};
pub use resources::{Resource, ResourceClient};
pub use rest::{Envelope, RestClient, RestClientConfig, RestError, RestRequest, RestResponse};
pub use session::{AuthError, CallbackId, SessionEvent, SessionManager};
