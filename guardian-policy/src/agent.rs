//! Policy agent: the per-connection authorization proxy.
//!
//! Each forwarded connection speaks the agent protocol.  Identity listings
//! go straight to the upstream agent; sign requests are held until the
//! policy (and, if it says so, the user) approves them.  Everything else,
//! adding or removing keys, locking, extensions, is refused outright.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::net::UnixStream;
use tracing::{debug, info, warn};

use guardian_fwd::ConnectionHandler;
use guardian_prompt::{AuthorizationUi, Prompt, PromptError};

use crate::error::PolicyError;
use crate::policy::{Policy, SignAction};
use crate::proto::{
    self, FAILURE, KeyInfo, SSH_AGENTC_REQUEST_IDENTITIES, SSH_AGENTC_SIGN_REQUEST,
};

const ALLOW_ONCE: usize = 1;
const ALLOW_CONNECTION: usize = 2;

type SharedUi = Arc<Mutex<Box<dyn AuthorizationUi>>>;

pub struct GuardAgent {
    host: String,
    policy: Policy,
    upstream: PathBuf,
    ui: SharedUi,
}

impl std::fmt::Debug for GuardAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardAgent")
            .field("host", &self.host)
            .field("policy", &self.policy)
            .field("upstream", &self.upstream)
            .finish_non_exhaustive()
    }
}

impl GuardAgent {
    /// Load the policy at `policy_path` and resolve the upstream agent from
    /// it or from `SSH_AUTH_SOCK`.
    pub fn new(
        policy_path: &Path,
        host: impl Into<String>,
        ui: Box<dyn AuthorizationUi>,
    ) -> Result<Self, PolicyError> {
        let policy = Policy::load(policy_path)?;
        let upstream = policy.upstream(std::env::var_os("SSH_AUTH_SOCK").map(PathBuf::from))?;
        Ok(Self::with_upstream(policy, host, upstream, ui))
    }

    pub fn with_upstream(
        policy: Policy,
        host: impl Into<String>,
        upstream: PathBuf,
        ui: Box<dyn AuthorizationUi>,
    ) -> Self {
        Self {
            host: host.into(),
            policy,
            upstream,
            ui: Arc::new(Mutex::new(ui)),
        }
    }

    pub fn upstream(&self) -> &Path {
        &self.upstream
    }

    /// Run `f` against the UI on a blocking thread.  The lock serializes
    /// prompts from concurrent connections.
    async fn with_ui<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn AuthorizationUi) -> T + Send + 'static,
    {
        let ui = Arc::clone(&self.ui);
        tokio::task::spawn_blocking(move || {
            let mut ui = ui.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(ui.as_mut())
        })
        .await
        .context("authorization UI task panicked")
    }

    /// Ask the user about one sign request.
    async fn ask(&self, key: &KeyInfo) -> Result<usize, PromptError> {
        let prompt = Prompt::new(
            format!("{} wants to sign with your key\n    {key}", self.host),
            ["Allow once", "Allow for the rest of this connection", "Deny"],
        );
        match self.with_ui(move |ui| ui.ask(&prompt)).await {
            Ok(answer) => answer,
            Err(e) => Err(PromptError::Io(std::io::Error::other(e.to_string()))),
        }
    }

    async fn notify(&self, approved: bool, msg: String) {
        let result = self
            .with_ui(move |ui| {
                if approved {
                    ui.inform(&msg)
                } else {
                    ui.alert(&msg)
                }
            })
            .await;
        if let Err(e) = result {
            warn!("failed to show notice: {e:#}");
        }
    }

    /// Decide a sign request.  `trusted` carries an earlier "rest of this
    /// connection" answer.
    async fn authorize(&self, request: &[u8], trusted: &mut bool) -> bool {
        let key = match proto::sign_request_key(request) {
            Ok(key) => key,
            Err(e) => {
                warn!(host = %self.host, "refusing sign request: {e}");
                return false;
            }
        };

        match self.policy.sign.action {
            SignAction::Allow => {
                debug!(host = %self.host, key = %key, "sign request allowed by policy");
                return true;
            }
            SignAction::Deny => {
                info!(host = %self.host, key = %key, "sign request denied by policy");
                self.notify(false, format!("Denied {} signing with {key} (policy)", self.host))
                    .await;
                return false;
            }
            SignAction::Prompt if *trusted => {
                debug!(host = %self.host, key = %key, "sign request allowed for this connection");
                return true;
            }
            SignAction::Prompt => {}
        }

        let approved = match self.ask(&key).await {
            Ok(ALLOW_ONCE) => true,
            Ok(ALLOW_CONNECTION) => {
                *trusted = true;
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(host = %self.host, "authorization prompt failed, denying: {e}");
                false
            }
        };

        if approved {
            info!(host = %self.host, key = %key, "sign request approved");
            self.notify(true, format!("Allowed {} to sign with {key}", self.host))
                .await;
        } else {
            info!(host = %self.host, key = %key, "sign request denied");
            self.notify(false, format!("Denied {} signing with {key}", self.host))
                .await;
        }
        approved
    }

    /// Relay one request to the upstream agent, connecting on first use.
    async fn forward(
        &self,
        upstream: &mut Option<UnixStream>,
        request: &[u8],
    ) -> Result<Vec<u8>, PolicyError> {
        let stream = match upstream.take() {
            Some(stream) => stream,
            None => UnixStream::connect(&self.upstream)
                .await
                .map_err(PolicyError::Upstream)?,
        };
        let stream = upstream.insert(stream);
        proto::write_frame(stream, request).await?;
        proto::read_frame(stream).await?.ok_or_else(|| {
            PolicyError::Upstream(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "upstream agent closed the connection",
            ))
        })
    }
}

#[async_trait]
impl ConnectionHandler for GuardAgent {
    async fn handle_connection(&self, mut conn: UnixStream) -> anyhow::Result<()> {
        let mut upstream = None;
        let mut trusted = false;

        while let Some(request) = proto::read_frame(&mut conn).await? {
            let reply = match request.first().copied() {
                Some(SSH_AGENTC_REQUEST_IDENTITIES) => self.forward(&mut upstream, &request).await?,
                Some(SSH_AGENTC_SIGN_REQUEST) => {
                    if self.authorize(&request, &mut trusted).await {
                        self.forward(&mut upstream, &request).await?
                    } else {
                        FAILURE.to_vec()
                    }
                }
                other => {
                    debug!(host = %self.host, kind = ?other, "refusing agent request");
                    FAILURE.to_vec()
                }
            };
            proto::write_frame(&mut conn, &reply).await?;
        }
        Ok(())
    }
}
