//! Error taxonomy shared by every guardian crate.

/// Exit status used for every failure that does not carry a remote status.
pub const EXIT_FAILURE: i32 = 255;

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// Incompatible flags or a missing precondition.  Raised before any
    /// network activity.
    #[error("{0}")]
    Configuration(String),

    /// The forwarding channel could not be set up or broke while the remote
    /// command was still running.
    #[error("{0}")]
    Transport(String),

    /// The remote side failed.  `status` is the remote exit status when the
    /// remote reported one.
    #[error("{}", remote_execution_message(.status, .message))]
    RemoteExecution {
        status: Option<i32>,
        message: Option<String>,
    },

    /// The policy agent could not be constructed.
    #[error("{0}")]
    Policy(String),
}

impl GuardError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::RemoteExecution {
                status: Some(status),
                ..
            } => *status,
            _ => EXIT_FAILURE,
        }
    }

    /// Message the remote side attached to its failure, if any.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            Self::RemoteExecution {
                message: Some(msg), ..
            } if !msg.is_empty() => Some(msg),
            _ => None,
        }
    }
}

fn remote_execution_message(status: &Option<i32>, message: &Option<String>) -> String {
    match (status, message.as_deref()) {
        (_, Some(msg)) if !msg.is_empty() => msg.to_string(),
        (Some(status), _) => format!("remote command exited with status {status}"),
        (None, _) => "remote command failed".to_string(),
    }
}
