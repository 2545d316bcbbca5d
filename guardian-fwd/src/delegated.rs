//! Delegated client: run the remote session directly, without forwarding.

use std::process::ExitStatus;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use guardian_core::Session;
use guardian_core::config::DEFAULT_SSH_PROGRAM;

use crate::error::FwdError;

#[async_trait]
pub trait DelegatedClient: Send + Sync {
    /// Run the whole session and wait for it to end.
    async fn run(&self) -> Result<(), FwdError>;
}

/// Delegated session over the system `ssh`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshDelegatedClient {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub command: Option<String>,
    /// Extra `ssh` arguments, placed before the host.
    pub extra_args: Vec<String>,
}

impl SshDelegatedClient {
    pub fn new(session: &Session) -> Self {
        Self {
            host: session.host.clone(),
            port: session.port,
            username: session.username.clone(),
            command: session.command.clone(),
            extra_args: session.ssh.args.clone(),
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.port.to_string(),
            "-l".to_string(),
            self.username.clone(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args.push(self.host.clone());
        if let Some(command) = &self.command {
            args.push(command.clone());
        }
        args
    }
}

/// Map an `ssh` exit status onto the session outcome.
fn session_result(status: ExitStatus) -> Result<(), FwdError> {
    if status.success() {
        return Ok(());
    }
    match status.code() {
        Some(code) => Err(FwdError::RemoteExit {
            status: code,
            message: None,
        }),
        None => Err(FwdError::Remote(format!("ssh terminated by {status}"))),
    }
}

#[async_trait]
impl DelegatedClient for SshDelegatedClient {
    async fn run(&self) -> Result<(), FwdError> {
        debug!(host = %self.host, port = self.port, user = %self.username, "starting delegated session");
        let status = Command::new(DEFAULT_SSH_PROGRAM)
            .args(self.args())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| FwdError::Setup(format!("failed to launch {DEFAULT_SSH_PROGRAM}: {e}")))?;
        session_result(status)
    }
}
