// src/lib.rs

pub mod claims;
pub mod clock;
pub mod config;
pub mod error;
pub mod flow;
pub mod jwks;
pub mod model;
mod secret;
pub mod state;
pub mod verifier;

/// The public prelude for the `nila-apple-signin` crate.
///
/// This module re-exports the most commonly used types for convenience.
pub mod prelude {
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::config::{Config, ConfigBuilder};
    pub use crate::error::NilaAppleError;
    pub use crate::flow::{AuthFlowClient, AuthorizationRequest};
    pub use crate::jwks::KeySetCache;
    pub use crate::model::{CallbackParams, IdentityResult, TokenResponse};
    pub use crate::state::AuthState;
    pub use crate::verifier::{TokenVerifier, VerifiedToken};
}
