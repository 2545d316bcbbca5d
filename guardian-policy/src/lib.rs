//! Policy agent for guardian.
//!
//! Sits between forwarded agent connections and the user's real SSH agent.
//! Signing requests only reach the real agent once the policy file, or the
//! user through an [`AuthorizationUi`](guardian_prompt::AuthorizationUi),
//! has approved them.

pub mod agent;
pub mod error;
pub mod policy;
pub mod proto;

pub use agent::GuardAgent;
pub use error::PolicyError;
pub use policy::{Policy, SignAction};
