//! Forwarding supervisor: the accept/dispatch loop.
//!
//! One optional worker runs the remote command; when it finishes it marks
//! the [`CompletionSignal`] and closes the channel.  The accept loop hands
//! every connection to its own handler task.  When `accept` fails the loop
//! consults the signal: set means the session ended normally, unset means
//! the tunnel broke underneath a running session.
//!
//! The worker completes the signal *before* it closes the channel, and the
//! loop only reads the signal *after* `accept` observed the closure, so a
//! normal shutdown can never be mistaken for a transport failure.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::net::UnixStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::ForwardingChannel;
use crate::error::FwdError;

// ---------------------------------------------------------------------------
// Completion signal
// ---------------------------------------------------------------------------

/// Create a completion signal and the single handle allowed to set it.
pub fn completion_signal() -> (Completer, CompletionSignal) {
    let (tx, rx) = watch::channel(false);
    (Completer { tx }, CompletionSignal { rx })
}

/// Write side.  Not `Clone`: only the command worker may complete a session.
#[derive(Debug)]
pub struct Completer {
    tx: watch::Sender<bool>,
}

impl Completer {
    pub fn complete(self) {
        self.tx.send_replace(true);
    }
}

/// Read side, shared with the accept loop.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    rx: watch::Receiver<bool>,
}

impl CompletionSignal {
    pub fn is_complete(&self) -> bool {
        *self.rx.borrow()
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Consumer of accepted connections (the policy agent).
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    async fn handle_connection(&self, conn: UnixStream) -> anyhow::Result<()>;
}

pub struct Supervisor {
    channel: Arc<dyn ForwardingChannel>,
    handler: Arc<dyn ConnectionHandler>,
    next_id: AtomicU64,
}

impl Supervisor {
    /// `channel` must already be set up.
    pub fn new(channel: Arc<dyn ForwardingChannel>, handler: Arc<dyn ConnectionHandler>) -> Self {
        Self {
            channel,
            handler,
            next_id: AtomicU64::new(1),
        }
    }

    /// Run the accept loop until the channel closes.
    ///
    /// With `command` set, the command runs concurrently and the loop ends
    /// cleanly once it has finished; the command's own result is then
    /// returned.  Any channel failure while the session is still live is a
    /// transport error.
    pub async fn run(&self, command: Option<String>) -> Result<(), FwdError> {
        let (completer, done) = completion_signal();
        let worker = command.map(|command| self.spawn_command(command, completer));

        loop {
            match self.channel.accept().await {
                Ok(conn) => self.dispatch(conn),
                Err(err) if done.is_complete() => {
                    debug!("forwarding channel closed after remote command finished: {err}");
                    break;
                }
                Err(err) => {
                    warn!("Error forwarding: {err}");
                    return Err(err);
                }
            }
        }

        match worker {
            Some(handle) => handle
                .await
                .map_err(|e| FwdError::Worker(e.to_string()))?,
            None => Ok(()),
        }
    }

    /// [`run`](Self::run), abandoned when `shutdown` resolves first.  The
    /// channel is closed before returning so its runtime files go away.
    pub async fn run_until<F>(&self, command: Option<String>, shutdown: F) -> Result<(), FwdError>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::select! {
            result = self.run(command) => result,
            () = shutdown => {
                info!("interrupted, closing forwarding channel");
                self.channel.close().await;
                Err(FwdError::Interrupted)
            }
        }
    }

    fn spawn_command(&self, command: String, completer: Completer) -> JoinHandle<Result<(), FwdError>> {
        let channel = Arc::clone(&self.channel);
        tokio::spawn(async move {
            let result = channel.run(&command).await;
            match &result {
                Ok(()) => debug!("remote command finished"),
                Err(e) => info!("remote command finished: {e}"),
            }
            completer.complete();
            channel.close().await;
            result
        })
    }

    fn dispatch(&self, conn: UnixStream) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handler = Arc::clone(&self.handler);
        debug!(conn = id, "accepted forwarded connection");
        tokio::spawn(async move {
            if let Err(e) = handler.handle_connection(conn).await {
                warn!(conn = id, "Error forwarding: {e:#}");
            } else {
                debug!(conn = id, "connection finished");
            }
        });
    }
}
