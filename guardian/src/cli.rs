//! Command-line flags.
//!
//! The flag set keeps the classic single-dash spelling (`-debug`,
//! `-ssh_args "-v"`, `-prompt=DISPLAY`).  [`normalize_args`] rewrites those
//! to the double-dash form clap expects, and marks the end of the options at
//! the first positional argument so that everything after `[user@]hostname`
//! belongs to the remote command, dashes included.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use guardian_core::config::{DEFAULT_POLICY_PATH, DEFAULT_PORT, DEFAULT_SSH_PROGRAM, DEFAULT_STUB};
use guardian_core::{Invocation, PromptKind};

/// Long flags that may be written with a single dash.
const LONG_FLAGS: &[&str] = &[
    "debug", "ssh", "ssh_args", "policy", "stub", "prompt", "logfile", "help",
];

/// Flags whose value may follow as the next argument.
const VALUE_FLAGS: &[&str] = &[
    "-p", "--ssh", "--ssh_args", "--policy", "--stub", "--prompt", "--logfile",
];

#[derive(Debug, Parser)]
#[command(
    name = "guardian",
    override_usage = "guardian [-AdN] [-p port] [-prompt=DISPLAY|TERMINAL|FANCY] [user@]hostname [command]",
    disable_version_flag = true
)]
pub struct Cli {
    /// Debug Mode
    #[arg(long)]
    pub debug: bool,

    /// Port to connect to on the remote host.
    #[arg(short = 'p', value_name = "port", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// ssh command to run when setting up session
    #[arg(long, value_name = "cmd", default_value = DEFAULT_SSH_PROGRAM)]
    pub ssh: String,

    /// additional arguments to pass to ssh command
    #[arg(long = "ssh_args", value_name = "args", default_value = "", allow_hyphen_values = true)]
    pub ssh_args: String,

    /// Delegate authentication to the remote session.
    #[arg(short = 'd')]
    pub delegated: bool,

    /// (Secure) SSH Agent Forwarding.
    #[arg(short = 'A')]
    pub forward_agent: bool,

    /// Do not execute Commands. Useful for standalone SSH Agent Forwarding.
    #[arg(short = 'N')]
    pub no_command: bool,

    /// Policy config file
    #[arg(long, value_name = "path", default_value = DEFAULT_POLICY_PATH)]
    pub policy: String,

    /// Remote stub executable path
    #[arg(long, value_name = "path", default_value = DEFAULT_STUB)]
    pub stub: String,

    /// Type of prompt to use
    #[arg(long, value_enum, ignore_case = true)]
    pub prompt: Option<PromptArg>,

    /// log filename
    #[arg(long, value_name = "path")]
    pub logfile: Option<PathBuf>,

    #[arg(value_name = "[user@]hostname")]
    pub target: String,

    #[arg(value_name = "command", trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "UPPERCASE")]
pub enum PromptArg {
    Display,
    Terminal,
    Fancy,
}

impl From<PromptArg> for PromptKind {
    fn from(arg: PromptArg) -> Self {
        match arg {
            PromptArg::Display => Self::Display,
            PromptArg::Terminal => Self::Terminal,
            PromptArg::Fancy => Self::Fancy,
        }
    }
}

impl Cli {
    pub fn parse_args<I>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = OsString>,
    {
        Self::try_parse_from(normalize_args(args))
    }

    pub fn invocation(&self) -> Invocation {
        Invocation {
            port: self.port,
            ssh_program: self.ssh.clone(),
            ssh_args: self.ssh_args.clone(),
            delegated: self.delegated,
            forward_agent: self.forward_agent,
            no_command: self.no_command,
            policy: self.policy.clone(),
            stub: self.stub.clone(),
            prompt: self.prompt.map(Into::into),
            target: self.target.clone(),
            command: self.command.clone(),
        }
    }
}

/// Rewrite single-dash long flags to double-dash and insert `--` before the
/// first positional argument.  The first element (program name) is kept.
pub fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut args = args.into_iter();
    let mut out: Vec<OsString> = args.next().into_iter().collect();

    while let Some(arg) = args.next() {
        let Some(text) = arg.to_str() else {
            // Not UTF-8, so not a flag: the target.
            out.push(OsString::from("--"));
            out.push(arg);
            break;
        };

        if text == "--" {
            out.push(arg);
            break;
        }
        if !text.starts_with('-') || text == "-" {
            out.push(OsString::from("--"));
            out.push(arg);
            break;
        }

        let flag = single_dash_long(text).unwrap_or_else(|| text.to_string());
        let takes_value = !flag.contains('=') && VALUE_FLAGS.contains(&flag.as_str());
        out.push(OsString::from(flag));
        if takes_value && let Some(value) = args.next() {
            out.push(value);
        }
    }

    out.extend(args);
    out
}

/// `-name[=value]` → `--name[=value]` for the known long flags.
fn single_dash_long(text: &str) -> Option<String> {
    let rest = text.strip_prefix('-')?;
    if rest.starts_with('-') {
        return None;
    }
    let name = rest.split_once('=').map_or(rest, |(name, _)| name);
    LONG_FLAGS.contains(&name).then(|| format!("-{text}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::parse_args(os(args))
    }

    #[test]
    fn normalize_rewrites_single_dash_long_flags() {
        assert_eq!(
            normalize_args(os(&["guardian", "-debug", "-prompt=DISPLAY", "-ssh_args", "-v -4", "-A", "host"])),
            os(&["guardian", "--debug", "--prompt=DISPLAY", "--ssh_args", "-v -4", "-A", "--", "host"])
        );
    }

    #[test]
    fn normalize_stops_at_first_positional() {
        assert_eq!(
            normalize_args(os(&["guardian", "-p", "2222", "host", "ls", "-A", "-debug"])),
            os(&["guardian", "-p", "2222", "--", "host", "ls", "-A", "-debug"])
        );
    }

    #[test]
    fn normalize_keeps_double_dash_and_combined_shorts() {
        assert_eq!(
            normalize_args(os(&["guardian", "--policy", "/p", "-AN", "--", "host"])),
            os(&["guardian", "--policy", "/p", "-AN", "--", "host"])
        );
    }

    #[test]
    fn defaults() {
        let cli = parse(&["guardian", "example.org"]).unwrap();
        assert!(!cli.debug);
        assert_eq!(cli.port, 22);
        assert_eq!(cli.ssh, "ssh");
        assert_eq!(cli.ssh_args, "");
        assert_eq!(cli.policy, "$HOME/.ssh/agent_policies");
        assert_eq!(cli.stub, "env");
        assert_eq!(cli.prompt, None);
        assert_eq!(cli.logfile, None);
        assert_eq!(cli.target, "example.org");
        assert!(cli.command.is_empty());
    }

    #[test]
    fn flags_and_command() {
        let cli = parse(&[
            "guardian", "-debug", "-A", "-p", "2200", "-stub=guard-stub", "alice@example.org", "tail", "-f", "/var/log/syslog",
        ])
        .unwrap();
        assert!(cli.debug);
        assert!(cli.forward_agent);
        assert_eq!(cli.port, 2200);
        assert_eq!(cli.stub, "guard-stub");
        assert_eq!(cli.target, "alice@example.org");
        assert_eq!(cli.command, ["tail", "-f", "/var/log/syslog"]);
    }

    #[test]
    fn flags_after_host_belong_to_command() {
        let cli = parse(&["guardian", "example.org", "-A"]).unwrap();
        assert!(!cli.forward_agent);
        assert_eq!(cli.command, ["-A"]);
    }

    #[test]
    fn combined_short_flags() {
        let cli = parse(&["guardian", "-AN", "example.org"]).unwrap();
        assert!(cli.forward_agent);
        assert!(cli.no_command);
        assert!(!cli.delegated);
    }

    #[test]
    fn prompt_is_case_insensitive() {
        for (value, kind) in [
            ("DISPLAY", PromptArg::Display),
            ("terminal", PromptArg::Terminal),
            ("Fancy", PromptArg::Fancy),
        ] {
            let flag = format!("-prompt={value}");
            let cli = parse(&["guardian", &flag, "h"]).unwrap();
            assert_eq!(cli.prompt, Some(kind));
        }
        assert!(parse(&["guardian", "-prompt=GUI", "h"]).is_err());
    }

    #[test]
    fn missing_host_is_an_error() {
        let err = parse(&["guardian", "-A"]).unwrap_err();
        assert!(err.use_stderr());
    }

    #[test]
    fn help_is_not_an_error() {
        for flag in ["-h", "--help", "-help"] {
            let err = parse(&["guardian", flag]).unwrap_err();
            assert!(!err.use_stderr(), "{flag}");
        }
    }

    #[test]
    fn invocation_carries_every_flag() {
        let cli = parse(&[
            "guardian", "-d", "-ssh_args", "-o BatchMode=yes", "-policy", "/etc/guard", "-prompt", "terminal", "bob@h", "uptime",
        ])
        .unwrap();
        let inv = cli.invocation();
        assert!(inv.delegated);
        assert_eq!(inv.ssh_args, "-o BatchMode=yes");
        assert_eq!(inv.policy, "/etc/guard");
        assert_eq!(inv.prompt, Some(PromptKind::Terminal));
        assert_eq!(inv.target, "bob@h");
        assert_eq!(inv.command, ["uptime"]);
    }
}
