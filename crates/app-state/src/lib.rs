//! Application state for the Tourbook client
//!
//! This crate exposes the observable authentication state that screens
//! subscribe to.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod session;

pub use session::{AuthSnapshot, AuthStore};
