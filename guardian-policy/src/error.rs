use std::path::PathBuf;

use guardian_core::GuardError;

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("failed to read policy file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse policy file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no upstream agent: set SSH_AUTH_SOCK or [agent] upstream in the policy file")]
    NoUpstream,

    #[error("agent message too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("malformed agent message: {0}")]
    Malformed(&'static str),

    #[error("upstream agent: {0}")]
    Upstream(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PolicyError> for GuardError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::Parse { .. } | PolicyError::Read { .. } => {
                Self::Configuration(err.to_string())
            }
            other => Self::Policy(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_policy_file_is_a_configuration_error() {
        let source = toml::from_str::<toml::Table>("[sign").unwrap_err();
        let err: GuardError = PolicyError::Parse {
            path: "/tmp/p".into(),
            source,
        }
        .into();
        assert!(matches!(err, GuardError::Configuration(_)));
        assert_eq!(err.exit_code(), 255);
    }

    #[test]
    fn missing_upstream_is_a_policy_error() {
        let err: GuardError = PolicyError::NoUpstream.into();
        assert!(matches!(err, GuardError::Policy(_)));
    }
}
