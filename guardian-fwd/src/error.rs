use guardian_core::GuardError;

#[derive(Debug, thiserror::Error)]
pub enum FwdError {
    #[error("forwarding setup failed: {0}")]
    Setup(String),

    #[error("forwarding channel closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote command exited with status {status}")]
    RemoteExit {
        status: i32,
        message: Option<String>,
    },

    #[error("remote command terminated: {0}")]
    Remote(String),

    #[error("command worker failed: {0}")]
    Worker(String),

    #[error("interrupted")]
    Interrupted,
}

/// Exit status of a shell child killed by SIGINT.
const INTERRUPTED_STATUS: i32 = 130;

impl From<FwdError> for GuardError {
    fn from(err: FwdError) -> Self {
        match err {
            FwdError::RemoteExit { status, message } => Self::RemoteExecution {
                status: Some(status),
                message,
            },
            FwdError::Remote(msg) => Self::RemoteExecution {
                status: None,
                message: Some(msg),
            },
            FwdError::Interrupted => Self::RemoteExecution {
                status: Some(INTERRUPTED_STATUS),
                message: None,
            },
            other => Self::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_exit_keeps_status() {
        let err: GuardError = FwdError::RemoteExit {
            status: 42,
            message: Some("boom".into()),
        }
        .into();
        assert_eq!(err.exit_code(), 42);
        assert_eq!(err.remote_message(), Some("boom"));
    }

    #[test]
    fn channel_failures_are_transport_errors() {
        let err: GuardError = FwdError::Closed.into();
        assert!(matches!(err, GuardError::Transport(_)));
        assert_eq!(err.exit_code(), 255);
    }

    #[test]
    fn interrupt_exits_like_sigint() {
        let err: GuardError = FwdError::Interrupted.into();
        assert_eq!(err.exit_code(), 130);
        assert_eq!(err.remote_message(), None);
    }
}
