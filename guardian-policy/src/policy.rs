//! Policy file.
//!
//! ```toml
//! [sign]
//! action = "prompt"   # prompt | allow | deny
//!
//! [agent]
//! upstream = "/run/user/1000/ssh-agent.sock"
//! ```
//!
//! Every section is optional.  A missing file means the default policy:
//! ask for every signature, use `$SSH_AUTH_SOCK` as the upstream agent.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PolicyError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub sign: SignPolicy,
    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignPolicy {
    #[serde(default)]
    pub action: SignAction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignAction {
    #[default]
    Prompt,
    Allow,
    Deny,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Socket of the agent holding the keys.  Falls back to `SSH_AUTH_SOCK`.
    #[serde(default)]
    pub upstream: Option<PathBuf>,
}

impl Policy {
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        if !path.exists() {
            debug!(path = %path.display(), "policy file not found, using defaults");
            return Ok(Self::default());
        }
        warn_if_shared(path);

        let content = std::fs::read_to_string(path).map_err(|source| PolicyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| PolicyError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Upstream agent socket: the configured one, else `ssh_auth_sock`.
    pub fn upstream(&self, ssh_auth_sock: Option<PathBuf>) -> Result<PathBuf, PolicyError> {
        self.agent
            .upstream
            .clone()
            .or(ssh_auth_sock.filter(|p| !p.as_os_str().is_empty()))
            .ok_or(PolicyError::NoUpstream)
    }
}

fn warn_if_shared(path: &Path) {
    use std::os::unix::fs::MetadataExt as _;

    match std::fs::metadata(path) {
        Ok(meta) if meta.mode() & 0o022 != 0 => {
            warn!(
                path = %path.display(),
                mode = format!("{:o}", meta.mode() & 0o777),
                "policy file is writable by group or others"
            );
        }
        Ok(_) => {}
        Err(e) => warn!("could not check policy file permissions: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let policy: Policy = toml::from_str("").unwrap();
        assert_eq!(policy, Policy::default());
        assert_eq!(policy.sign.action, SignAction::Prompt);
        assert!(policy.agent.upstream.is_none());
    }

    #[test]
    fn parse_sections() {
        let policy: Policy = toml::from_str(
            r#"
            [sign]
            action = "deny"

            [agent]
            upstream = "/run/agent.sock"
        "#,
        )
        .unwrap();
        assert_eq!(policy.sign.action, SignAction::Deny);
        assert_eq!(policy.agent.upstream.as_deref(), Some(Path::new("/run/agent.sock")));
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert!(toml::from_str::<Policy>("[sign]\naction = \"maybe\"").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let policy = Policy::load(&dir.path().join("agent_policies")).unwrap();
        assert_eq!(policy, Policy::default());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_policies");
        std::fs::write(&path, "[sign]\naction = \"allow\"\n").unwrap();
        assert_eq!(Policy::load(&path).unwrap().sign.action, SignAction::Allow);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_policies");
        std::fs::write(&path, "[sign\n").unwrap();
        assert!(matches!(Policy::load(&path), Err(PolicyError::Parse { .. })));
    }

    #[test]
    fn upstream_prefers_configured_socket() {
        let mut policy = Policy::default();
        assert!(matches!(policy.upstream(None), Err(PolicyError::NoUpstream)));
        assert!(matches!(
            policy.upstream(Some(PathBuf::new())),
            Err(PolicyError::NoUpstream)
        ));
        assert_eq!(
            policy.upstream(Some("/env.sock".into())).unwrap(),
            PathBuf::from("/env.sock")
        );
        policy.agent.upstream = Some("/cfg.sock".into());
        assert_eq!(
            policy.upstream(Some("/env.sock".into())).unwrap(),
            PathBuf::from("/cfg.sock")
        );
    }
}
