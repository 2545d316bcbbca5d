//! The forwarding channel contract.

use async_trait::async_trait;
use tokio::net::UnixStream;

use crate::error::FwdError;

/// Tunnel carrying agent-protocol connections from the remote host.
///
/// Lifecycle: `setup` once, at most one `run`, repeated `accept`, `close`.
/// Methods take `&self` so the command worker and the accept loop can share
/// one channel behind an `Arc`.
#[async_trait]
pub trait ForwardingChannel: Send + Sync {
    /// Establish the tunnel.  On error nothing may be left listening.
    async fn setup(&self) -> Result<(), FwdError>;

    /// Run `command` on the remote host and wait for it to finish.  An empty
    /// command starts an interactive login shell.
    async fn run(&self, command: &str) -> Result<(), FwdError>;

    /// Wait for the next forwarded connection.  Single caller only.  Returns
    /// [`FwdError::Closed`] once the channel is closed or broken.
    async fn accept(&self) -> Result<UnixStream, FwdError>;

    /// Release the channel.  Safe to call while another task is blocked in
    /// [`accept`](Self::accept); that call returns promptly.  Idempotent.
    async fn close(&self);
}
