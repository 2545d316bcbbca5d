//! Agent forwarding for guardian.
//!
//! Carries agent-protocol connections from the remote host back to this
//! process and hands each one to a [`ConnectionHandler`].
//!
//! # Architecture
//!
//! ```text
//!            ┌──────── command worker: channel.run(cmd) ──► complete() ──► close()
//!            │                                                                │
//! Supervisor ┤                                                                ▼
//!            └──────── accept loop: channel.accept() ──► spawn(handle_connection)
//!                            │ Err
//!                            ▼
//!                 is_complete() ? graceful exit : transport failure
//! ```
//!
//! [`SshDelegatedClient`] is the alternative that runs the session directly
//! with no forwarding at all.

pub mod channel;
pub mod delegated;
pub mod error;
pub mod ssh;
pub mod supervisor;

pub use channel::ForwardingChannel;
pub use delegated::{DelegatedClient, SshDelegatedClient};
pub use error::FwdError;
pub use ssh::{SshForward, SshTarget};
pub use supervisor::{Completer, CompletionSignal, ConnectionHandler, Supervisor, completion_signal};
