//! Shared model for guardian: the resolved [`Session`], the error taxonomy
//! and the small bits of configuration handling every crate needs.

pub mod config;
pub mod error;
pub mod session;

pub use error::{EXIT_FAILURE, GuardError};
pub use session::{Environment, Invocation, Mode, ProcessEnv, PromptKind, Session, SshOptions};
