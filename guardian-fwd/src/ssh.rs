//! OpenSSH-backed forwarding channel.
//!
//! [`SshForward`] binds a private Unix socket locally and asks an `ssh`
//! control master to forward a remote Unix socket onto it (`-R remote:local`).
//! The remote command then runs through the same master with
//! `SSH_AUTH_SOCK` pointing at the remote end, so every agent request made
//! on the remote host arrives here as one accepted connection.
//!
//! ```text
//! remote ssh client ──► /tmp/guardian-agent-….sock ══ ssh -R ══► agent.sock ──► accept()
//! ```

use std::os::unix::fs::{DirBuilderExt as _, PermissionsExt as _};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{UnixListener, UnixStream};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

use guardian_core::Session;

use crate::channel::ForwardingChannel;
use crate::error::FwdError;

/// Interval between control-master readiness checks during setup.
const READY_POLL: Duration = Duration::from_millis(100);

/// Remote command used when the session has no command of its own.
const LOGIN_SHELL: &str = r#"sh -c 'exec "${SHELL:-/bin/sh}" -l'"#;

/// Where and how to reach the remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub program: String,
    pub args: Vec<String>,
    pub stub: String,
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl From<&Session> for SshTarget {
    fn from(session: &Session) -> Self {
        Self {
            program: session.ssh.program.clone(),
            args: session.ssh.args.clone(),
            stub: session.ssh.stub.clone(),
            host: session.host.clone(),
            port: session.port,
            username: session.username.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct Paths {
    /// Private runtime directory holding the local socket and control path.
    dir: PathBuf,
    local: PathBuf,
    control: PathBuf,
    remote: String,
}

impl Paths {
    fn generate() -> Self {
        let base = std::env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        Self::under(&base)
    }

    fn under(base: &Path) -> Self {
        let dir = base.join(format!(
            "guardian-{}-{:08x}",
            std::process::id(),
            rand::random::<u32>()
        ));
        Self {
            local: dir.join("agent.sock"),
            control: dir.join("control"),
            remote: format!("/tmp/guardian-agent-{:016x}.sock", rand::random::<u64>()),
            dir,
        }
    }
}

pub struct SshForward {
    target: SshTarget,
    paths: Paths,
    listener: Mutex<Option<UnixListener>>,
    closed: Arc<watch::Sender<bool>>,
}

impl std::fmt::Debug for SshForward {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshForward")
            .field("host", &self.target.host)
            .field("local", &self.paths.local)
            .field("remote", &self.paths.remote)
            .finish_non_exhaustive()
    }
}

impl SshForward {
    pub fn new(target: SshTarget) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            target,
            paths: Paths::generate(),
            listener: Mutex::new(None),
            closed: Arc::new(closed),
        }
    }

    /// Path of the forwarded socket on the remote host.
    pub fn remote_socket(&self) -> &str {
        &self.paths.remote
    }

    /// Arguments for the control master that owns the reverse forwarding.
    fn master_args(&self) -> Vec<String> {
        let mut args = vec![
            "-M".to_string(),
            "-S".to_string(),
            self.paths.control.display().to_string(),
            "-N".to_string(),
            "-o".to_string(),
            "ExitOnForwardFailure=yes".to_string(),
            "-o".to_string(),
            "StreamLocalBindUnlink=yes".to_string(),
            "-R".to_string(),
            format!("{}:{}", self.paths.remote, self.paths.local.display()),
        ];
        args.extend(self.connect_args());
        args.push(self.target.host.clone());
        args
    }

    /// Arguments running `command` through the control master.
    fn run_args(&self, command: &str) -> Vec<String> {
        let mut args = vec!["-S".to_string(), self.paths.control.display().to_string()];
        args.extend(self.connect_args());
        let command = if command.trim().is_empty() {
            args.push("-t".to_string());
            LOGIN_SHELL
        } else {
            command
        };
        args.push(self.target.host.clone());
        args.push(format!(
            "{} SSH_AUTH_SOCK={} {}",
            self.target.stub, self.paths.remote, command
        ));
        args
    }

    fn control_args(&self, op: &str) -> Vec<String> {
        vec![
            "-S".to_string(),
            self.paths.control.display().to_string(),
            "-O".to_string(),
            op.to_string(),
            self.target.host.clone(),
        ]
    }

    fn connect_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.target.port.to_string(),
            "-l".to_string(),
            self.target.username.clone(),
        ];
        args.extend(self.target.args.iter().cloned());
        args
    }

    async fn control(&self, op: &str) -> std::io::Result<ExitStatus> {
        Command::new(&self.target.program)
            .args(self.control_args(op))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
    }

    /// Create the runtime directory and listen on the local socket.
    async fn bind_local(&self) -> Result<(), FwdError> {
        std::fs::DirBuilder::new()
            .mode(0o700)
            .create(&self.paths.dir)
            .map_err(|e| FwdError::Setup(format!("create {:?}: {e}", self.paths.dir)))?;

        let listener = UnixListener::bind(&self.paths.local)
            .map_err(|e| FwdError::Setup(format!("bind {:?}: {e}", self.paths.local)))?;
        std::fs::set_permissions(&self.paths.local, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| FwdError::Setup(format!("chmod 0600 {:?}: {e}", self.paths.local)))?;
        *self.listener.lock().await = Some(listener);
        Ok(())
    }

    async fn try_setup(&self) -> Result<(), FwdError> {
        self.bind_local().await?;

        let mut master = Command::new(&self.target.program)
            .args(self.master_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                FwdError::Setup(format!("'{}' failed to launch: {e}", self.target.program))
            })?;

        loop {
            if let Some(status) = master.try_wait()? {
                return Err(FwdError::Setup(format!(
                    "ssh exited with {status} before forwarding was established"
                )));
            }
            if self.control("check").await?.success() {
                break;
            }
            tokio::time::sleep(READY_POLL).await;
        }

        self.watch_master(master);

        debug!(
            local = %self.paths.local.display(),
            remote = %self.paths.remote,
            "agent forwarding established"
        );
        Ok(())
    }

    /// The master going away means the tunnel is gone.
    fn watch_master(&self, mut master: Child) {
        let closed = Arc::clone(&self.closed);
        tokio::spawn(async move {
            match master.wait().await {
                Ok(status) => debug!(%status, "ssh control master exited"),
                Err(e) => warn!("waiting for ssh control master: {e}"),
            }
            closed.send_replace(true);
        });
    }

    /// Remove the runtime directory.  Safe to call repeatedly.
    fn remove_runtime_dir(&self) {
        if let Err(e) = std::fs::remove_dir_all(&self.paths.dir)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.paths.dir.display(), "failed to remove runtime dir: {e}");
        }
    }

    pub fn local_socket(&self) -> &Path {
        &self.paths.local
    }
}

#[async_trait]
impl ForwardingChannel for SshForward {
    async fn setup(&self) -> Result<(), FwdError> {
        let result = self.try_setup().await;
        if result.is_err() {
            self.closed.send_replace(true);
            self.listener.lock().await.take();
            self.remove_runtime_dir();
        }
        result
    }

    async fn run(&self, command: &str) -> Result<(), FwdError> {
        debug!(host = %self.target.host, "running remote command");
        let status = Command::new(&self.target.program)
            .args(self.run_args(command))
            .kill_on_drop(true)
            .status()
            .await?;
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

    async fn accept(&self) -> Result<UnixStream, FwdError> {
        let mut closed = self.closed.subscribe();
        let guard = self.listener.lock().await;
        let Some(listener) = guard.as_ref() else {
            return Err(FwdError::Closed);
        };
        tokio::select! {
            biased;
            _ = async { let _ = closed.wait_for(|closed| *closed).await; } => Err(FwdError::Closed),
            accepted = listener.accept() => Ok(accepted?.0),
        }
    }

    async fn close(&self) {
        let was_closed = self.closed.send_replace(true);
        if !was_closed {
            match self.control("exit").await {
                Ok(status) if !status.success() => debug!(%status, "ssh -O exit"),
                Ok(_) => {}
                Err(e) => debug!("ssh -O exit failed: {e}"),
            }
        }
        self.remove_runtime_dir();
    }
}

impl Drop for SshForward {
    fn drop(&mut self) {
        self.remove_runtime_dir();
    }
}
