mod bootstrap;
mod cli;
mod logging;

use std::sync::Arc;

use tracing::{debug, warn};

use guardian_core::{EXIT_FAILURE, GuardError, Mode, ProcessEnv, Session};
use guardian_fwd::{
    DelegatedClient as _, ForwardingChannel as _, SshDelegatedClient, SshForward, SshTarget, Supervisor,
};
use guardian_policy::GuardAgent;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    let cli = match Cli::parse_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() { EXIT_FAILURE } else { 0 };
        }
    };

    if let Err(e) = logging::init(cli.debug, cli.logfile.as_deref()) {
        eprintln!("Failed to open log file: {e}");
        return EXIT_FAILURE;
    }

    bootstrap::secure_bootstrap();

    let session = match Session::resolve(&cli.invocation(), &ProcessEnv) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("{e}");
            return e.exit_code();
        }
    };
    debug!(host = %session.host, port = session.port, user = %session.username, "starting session");

    match dispatch(&session).await {
        Ok(()) => 0,
        Err(e) => {
            report(&e);
            e.exit_code()
        }
    }
}

async fn dispatch(session: &Session) -> Result<(), GuardError> {
    match session.mode {
        Mode::DelegatedClient => run_delegated(session).await,
        Mode::AgentForwarding => run_forwarding(session).await,
        Mode::Passthrough => {
            debug!("neither -d nor -A given, nothing to do");
            Ok(())
        }
    }
}

async fn run_delegated(session: &Session) -> Result<(), GuardError> {
    SshDelegatedClient::new(session).run().await?;
    Ok(())
}

async fn run_forwarding(session: &Session) -> Result<(), GuardError> {
    let ui = guardian_prompt::for_kind(session.prompt_kind);
    let agent = GuardAgent::new(&session.policy_path, session.host.clone(), ui)?;
    debug!(policy = %session.policy_path.display(), upstream = %agent.upstream().display(), kind = ?session.prompt_kind, "policy agent ready");

    let channel = Arc::new(SshForward::new(SshTarget::from(session)));
    channel.setup().await?;
    debug!(
        local = %channel.local_socket().display(),
        remote = channel.remote_socket(),
        "forwarding established"
    );

    // -N keeps the forwarding up without running anything; otherwise an
    // empty command means an interactive login shell.
    let command = (!session.no_command).then(|| session.command.clone().unwrap_or_default());

    let supervisor = Supervisor::new(channel.clone(), Arc::new(agent));
    let result = supervisor.run_until(command, shutdown_signal()).await;
    channel.close().await;
    result.map_err(Into::into)
}

/// Wait for SIGINT or SIGTERM.  Never resolves if neither can be watched.
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                () = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!("failed to register SIGTERM handler: {e}, falling back to SIGINT only");
            ctrl_c.await;
        }
    }
}

fn report(err: &GuardError) {
    match err {
        GuardError::RemoteExecution { status: Some(_), .. } => {
            if let Some(msg) = err.remote_message() {
                eprintln!("{msg}");
            }
        }
        GuardError::Transport(_) => {
            warn!("Error forwarding: {err}");
            eprintln!("{err}");
        }
        _ => eprintln!("{err}"),
    }
}
