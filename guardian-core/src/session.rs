//! Session model and invocation resolution.
//!
//! [`Session::resolve`] turns the raw flags of one invocation into an
//! immutable [`Session`], enforcing every mode-exclusivity precondition
//! before anything touches the network.

use std::path::PathBuf;

use tracing::debug;

use crate::config::{DEFAULT_SSH_PROGRAM, expand_env};
use crate::error::GuardError;

/// How the signing decision is put in front of the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// Plain numbered prompt on the local terminal.
    Terminal,
    /// Menu-driven prompt on the local terminal.
    Fancy,
    /// External graphical helper (`ssh-askpass`).
    Display,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Run the remote session directly with delegated authentication.
    DelegatedClient,
    /// Guarded agent forwarding through the forwarding supervisor.
    AgentForwarding,
    /// Neither `-d` nor `-A`: nothing happens after validation.
    Passthrough,
}

/// Raw flags of one invocation, independent of how they were parsed.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub port: u16,
    pub ssh_program: String,
    pub ssh_args: String,
    pub delegated: bool,
    pub forward_agent: bool,
    pub no_command: bool,
    pub policy: String,
    pub stub: String,
    pub prompt: Option<PromptKind>,
    pub target: String,
    pub command: Vec<String>,
}

/// What the resolver needs from the outside world.
pub trait Environment {
    fn display_available(&self) -> bool;
    fn current_user(&self) -> Result<String, GuardError>;
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn display_available(&self) -> bool {
        std::env::var_os("DISPLAY").is_some_and(|d| !d.is_empty())
    }

    fn current_user(&self) -> Result<String, GuardError> {
        current_username()
    }

    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// ssh invocation details shared by both forwarding and delegated modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshOptions {
    pub program: String,
    pub args: Vec<String>,
    pub stub: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub command: Option<String>,
    pub mode: Mode,
    pub forward_agent: bool,
    pub no_command: bool,
    /// Only meaningful in [`Mode::AgentForwarding`].
    pub prompt_kind: PromptKind,
    pub policy_path: PathBuf,
    pub ssh: SshOptions,
}

impl Session {
    pub fn resolve(inv: &Invocation, env: &impl Environment) -> Result<Self, GuardError> {
        let (username, host) = match split_target(&inv.target) {
            (Some(user), host) => (user.to_string(), host.to_string()),
            (None, host) => (env.current_user()?, host.to_string()),
        };
        if host.is_empty() {
            return Err(GuardError::config(format!(
                "missing hostname in '{}'",
                inv.target
            )));
        }

        let command = Some(inv.command.join(" ")).filter(|c| !c.is_empty());

        if inv.delegated {
            if inv.ssh_program != DEFAULT_SSH_PROGRAM {
                return Err(GuardError::config(
                    "--ssh flag not supported when running in delegated mode (-d)",
                ));
            }
            if inv.forward_agent {
                return Err(GuardError::config(
                    "agent forwarding (-A) is not supported in delegated mode (-d)",
                ));
            }
            if inv.no_command {
                return Err(GuardError::config(
                    "no command (-N) is not supported in delegated mode (-d)",
                ));
            }
        }

        let mode = if inv.delegated {
            Mode::DelegatedClient
        } else if inv.forward_agent {
            Mode::AgentForwarding
        } else {
            Mode::Passthrough
        };

        let prompt_kind = if mode == Mode::AgentForwarding {
            resolve_prompt_kind(inv.no_command, inv.prompt, env.display_available())?
        } else {
            inv.prompt.unwrap_or(PromptKind::Terminal)
        };

        let args = shlex::split(&inv.ssh_args)
            .ok_or_else(|| GuardError::config(format!("Failed to parse ssh_args: {}", inv.ssh_args)))?;

        let policy_path = PathBuf::from(expand_env(&inv.policy, |key| env.var(key)));

        debug!(%host, port = inv.port, user = %username, ?mode, "session resolved");

        Ok(Self {
            host,
            port: inv.port,
            username,
            command,
            mode,
            forward_agent: inv.forward_agent,
            no_command: inv.no_command,
            prompt_kind,
            policy_path,
            ssh: SshOptions {
                program: inv.ssh_program.clone(),
                args,
                stub: inv.stub.clone(),
            },
        })
    }
}

/// Split `[user@]host` on the last `@`.
pub fn split_target(target: &str) -> (Option<&str>, &str) {
    match target.rsplit_once('@') {
        Some((user, host)) => (Some(user), host),
        None => (None, target),
    }
}

/// Pick the prompt backend for guarded forwarding.
///
/// With `-N` the local terminal is free, so a terminal prompt is used unless
/// the display helper was explicitly requested.  In every other case the
/// terminal belongs to the remote command and the display helper is the only
/// option, which requires `DISPLAY`.
pub fn resolve_prompt_kind(
    no_command: bool,
    requested: Option<PromptKind>,
    display_available: bool,
) -> Result<PromptKind, GuardError> {
    if no_command && requested != Some(PromptKind::Display) {
        return Ok(requested.unwrap_or(PromptKind::Terminal));
    }
    if !display_available {
        return Err(GuardError::config(
            "DISPLAY must be set for user prompts.\nEither set the DISPLAY environment variable or use -N.",
        ));
    }
    Ok(PromptKind::Display)
}

/// Login name of the invoking user.
pub fn current_username() -> Result<String, GuardError> {
    if let Some(name) = passwd_username() {
        return Ok(name);
    }
    ["USER", "LOGNAME"]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
        .ok_or_else(|| GuardError::config("Failed to get current user"))
}

#[cfg(unix)]
fn passwd_username() -> Option<String> {
    let mut buf = vec![0 as libc::c_char; 4096];
    let mut pwd = std::mem::MaybeUninit::<libc::passwd>::uninit();
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    // SAFETY: every pointer refers to a live local buffer of the stated size;
    // `result` is only dereferenced when getpwuid_r reports success.
    let rc = unsafe {
        libc::getpwuid_r(
            libc::getuid(),
            pwd.as_mut_ptr(),
            buf.as_mut_ptr(),
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 || result.is_null() {
        return None;
    }
    // SAFETY: result is non-null, so pw_name points into `buf` and is
    // NUL-terminated.
    let name = unsafe { std::ffi::CStr::from_ptr((*result).pw_name) };
    name.to_str().ok().map(str::to_string).filter(|n| !n.is_empty())
}

#[cfg(not(unix))]
fn passwd_username() -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_POLICY_PATH, DEFAULT_PORT, DEFAULT_STUB};

    struct FakeEnv {
        display: bool,
    }

    impl Environment for FakeEnv {
        fn display_available(&self) -> bool {
            self.display
        }

        fn current_user(&self) -> Result<String, GuardError> {
            Ok("localuser".to_string())
        }

        fn var(&self, key: &str) -> Option<String> {
            (key == "HOME").then(|| "/home/localuser".to_string())
        }
    }

    fn invocation(target: &str) -> Invocation {
        Invocation {
            port: DEFAULT_PORT,
            ssh_program: DEFAULT_SSH_PROGRAM.to_string(),
            ssh_args: String::new(),
            delegated: false,
            forward_agent: false,
            no_command: false,
            policy: DEFAULT_POLICY_PATH.to_string(),
            stub: DEFAULT_STUB.to_string(),
            prompt: None,
            target: target.to_string(),
            command: Vec::new(),
        }
    }

    const NO_DISPLAY: FakeEnv = FakeEnv { display: false };
    const WITH_DISPLAY: FakeEnv = FakeEnv { display: true };

    #[test]
    fn explicit_user_prefix_wins() {
        let session = Session::resolve(&invocation("bob@example.com"), &NO_DISPLAY).unwrap();
        assert_eq!(session.username, "bob");
        assert_eq!(session.host, "example.com");
    }

    #[test]
    fn bare_host_uses_invoking_user() {
        let session = Session::resolve(&invocation("example.com"), &NO_DISPLAY).unwrap();
        assert_eq!(session.username, "localuser");
        assert_eq!(session.host, "example.com");
    }

    #[test]
    fn host_is_after_last_at() {
        assert_eq!(split_target("a@b@host"), (Some("a@b"), "host"));
        assert_eq!(split_target("host"), (None, "host"));
        assert_eq!(split_target("@host"), (Some(""), "host"));
    }

    #[test]
    fn empty_host_is_rejected() {
        let err = Session::resolve(&invocation("bob@"), &NO_DISPLAY).unwrap_err();
        assert!(matches!(err, GuardError::Configuration(_)));
    }

    #[test]
    fn command_words_are_joined() {
        let mut inv = invocation("host");
        inv.command = vec!["ls".into(), "-la".into(), "/tmp".into()];
        let session = Session::resolve(&inv, &NO_DISPLAY).unwrap();
        assert_eq!(session.command.as_deref(), Some("ls -la /tmp"));
    }

    #[test]
    fn delegated_rejects_agent_forwarding() {
        let mut inv = invocation("host");
        inv.delegated = true;
        inv.forward_agent = true;
        let err = Session::resolve(&inv, &WITH_DISPLAY).unwrap_err();
        assert!(err.to_string().contains("agent forwarding (-A)"));
        assert_eq!(err.exit_code(), 255);
    }

    #[test]
    fn delegated_rejects_no_command_and_custom_ssh() {
        let mut inv = invocation("host");
        inv.delegated = true;
        inv.no_command = true;
        let err = Session::resolve(&inv, &WITH_DISPLAY).unwrap_err();
        assert!(err.to_string().contains("no command (-N)"));

        let mut inv = invocation("host");
        inv.delegated = true;
        inv.ssh_program = "/usr/local/bin/ssh".into();
        let err = Session::resolve(&inv, &WITH_DISPLAY).unwrap_err();
        assert!(err.to_string().contains("--ssh flag"));
    }

    #[test]
    fn delegated_mode_resolves() {
        let mut inv = invocation("bob@host");
        inv.delegated = true;
        inv.command = vec!["uptime".into()];
        let session = Session::resolve(&inv, &NO_DISPLAY).unwrap();
        assert_eq!(session.mode, Mode::DelegatedClient);
        assert_eq!(session.command.as_deref(), Some("uptime"));
        assert_eq!(session.port, 22);
    }

    #[test]
    fn forwarding_with_command_requires_display() {
        let mut inv = invocation("host");
        inv.forward_agent = true;
        let err = Session::resolve(&inv, &NO_DISPLAY).unwrap_err();
        assert!(err.to_string().contains("DISPLAY must be set"));
        assert!(err.to_string().contains("-N"));
        assert_eq!(err.exit_code(), 255);

        let session = Session::resolve(&inv, &WITH_DISPLAY).unwrap();
        assert_eq!(session.prompt_kind, PromptKind::Display);
    }

    #[test]
    fn forwarding_without_command_uses_terminal() {
        let mut inv = invocation("host");
        inv.forward_agent = true;
        inv.no_command = true;
        let session = Session::resolve(&inv, &NO_DISPLAY).unwrap();
        assert_eq!(session.mode, Mode::AgentForwarding);
        assert_eq!(session.prompt_kind, PromptKind::Terminal);
    }

    #[test]
    fn explicit_display_overrides_no_command_exemption() {
        let mut inv = invocation("host");
        inv.forward_agent = true;
        inv.no_command = true;
        inv.prompt = Some(PromptKind::Display);
        let err = Session::resolve(&inv, &NO_DISPLAY).unwrap_err();
        assert!(matches!(err, GuardError::Configuration(_)));
    }

    #[test]
    fn fancy_prompt_is_kept_without_command() {
        assert_eq!(
            resolve_prompt_kind(true, Some(PromptKind::Fancy), false).unwrap(),
            PromptKind::Fancy
        );
        // A remote command owns the terminal, so the display helper wins.
        assert_eq!(
            resolve_prompt_kind(false, Some(PromptKind::Fancy), true).unwrap(),
            PromptKind::Display
        );
    }

    #[test]
    fn no_mode_selected_is_passthrough() {
        // Neither -d nor -A: validation only, no session action.
        let session = Session::resolve(&invocation("host"), &NO_DISPLAY).unwrap();
        assert_eq!(session.mode, Mode::Passthrough);
    }

    #[test]
    fn ssh_args_are_shell_split() {
        let mut inv = invocation("host");
        inv.ssh_args = r#"-o "ProxyJump bastion" -v"#.into();
        let session = Session::resolve(&inv, &NO_DISPLAY).unwrap();
        assert_eq!(session.ssh.args, vec!["-o", "ProxyJump bastion", "-v"]);
    }

    #[test]
    fn unbalanced_ssh_args_are_a_config_error() {
        let mut inv = invocation("host");
        inv.ssh_args = r#"-o "unterminated"#.into();
        let err = Session::resolve(&inv, &NO_DISPLAY).unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse ssh_args"));
    }

    #[test]
    fn policy_path_is_expanded() {
        let session = Session::resolve(&invocation("host"), &NO_DISPLAY).unwrap();
        assert_eq!(
            session.policy_path,
            PathBuf::from("/home/localuser/.ssh/agent_policies")
        );
    }
}
