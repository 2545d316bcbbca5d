//! External graphical helper backend (`SSH_ASKPASS` convention).
//!
//! Each operation runs the helper once with the prompt text as `argv[1]` and
//! reads the answer from its stdout.  Stdin is closed and stderr inherited,
//! matching how OpenSSH drives askpass programs.

use std::io::{BufRead as _, BufReader};
use std::process::{Command, Stdio};

use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::{AuthorizationUi, Prompt, PromptError, ensure_choices, format_prompt, parse_choice};

pub const DEFAULT_ASKPASS: &str = "ssh-askpass";

#[derive(Debug, Clone)]
pub struct AskPassUi {
    program: String,
    /// Fixed arguments placed before the prompt text.
    args: Vec<String>,
}

impl AskPassUi {
    /// `SSH_ASKPASS` when set and non-empty, else `ssh-askpass` from `PATH`.
    pub fn from_env() -> Self {
        let program = std::env::var("SSH_ASKPASS")
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_ASKPASS.to_string());
        Self::with_program(program)
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self::with_args(program, Vec::<String>::new())
    }

    pub fn with_args<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn command(&self, text: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        cmd
    }

    fn launch_error(&self, source: std::io::Error) -> PromptError {
        PromptError::Helper {
            program: self.program.clone(),
            source,
        }
    }

    /// Run the helper to completion and return its trimmed stdout.
    fn run(&self, text: &str) -> Result<String, PromptError> {
        let output = self
            .command(text)
            .output()
            .map_err(|e| self.launch_error(e))?;
        if !output.status.success() {
            return Err(PromptError::HelperStatus {
                program: self.program.clone(),
                status: output.status,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl AuthorizationUi for AskPassUi {
    fn ask(&mut self, prompt: &Prompt) -> Result<usize, PromptError> {
        ensure_choices(prompt)?;
        let text = format_prompt(prompt);
        loop {
            let reply = self.run(&text)?;
            if let Some(choice) = parse_choice(&reply, prompt.choices.len()) {
                return Ok(choice);
            }
            debug!(program = %self.program, "invalid answer from helper, asking again");
        }
    }

    /// Empty output means the user just pressed OK, which counts as yes.
    fn confirm(&mut self, msg: &str) -> Result<bool, PromptError> {
        let reply = self.run(msg)?.to_lowercase();
        Ok(reply.is_empty() || reply == "yes")
    }

    fn inform(&mut self, msg: &str) {
        println!("{msg}");
    }

    fn alert(&mut self, msg: &str) {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(msg)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        match cmd.spawn() {
            Ok(mut child) => {
                // Reap in the background; the notice stays up as long as the
                // user wants it to.
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
            }
            Err(e) => {
                warn!(program = %self.program, "alert helper failed to launch: {e}");
                eprintln!("{msg}");
            }
        }
    }

    fn ask_password(&mut self, msg: &str) -> Result<Zeroizing<Vec<u8>>, PromptError> {
        let mut child = self
            .command(msg)
            .spawn()
            .map_err(|e| self.launch_error(e))?;

        // Read exactly one line into a zeroizing buffer instead of collecting
        // the whole output, so no plain copy of the secret lingers.
        let mut line = Zeroizing::new(Vec::new());
        {
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| self.launch_error(std::io::Error::other("no stdout pipe")))?;
            let mut reader = BufReader::new(stdout);
            reader.read_until(b'\n', &mut line)?;
        }

        let status = child.wait()?;
        if !status.success() {
            return Err(PromptError::HelperStatus {
                program: self.program.clone(),
                status,
            });
        }

        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A helper whose body is an inline shell script; the prompt text
    /// arrives as `$1`.
    fn sh(body: &str) -> AskPassUi {
        AskPassUi::with_args("/bin/sh", ["-c", body, "askpass"])
    }

    #[test]
    fn ask_parses_helper_output() {
        let mut ui = sh("echo ' 2 '");
        let prompt = Prompt::new("Pick", ["a", "b"]);
        assert_eq!(ui.ask(&prompt).unwrap(), 2);
    }

    #[test]
    fn ask_passes_formatted_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let seen = dir.path().join("seen");
        let mut ui = sh(&format!("printf '%s' \"$1\" > '{}'; echo 1", seen.display()));
        let prompt = Prompt::new("Allow?", ["Yes", "No"]);
        ui.ask(&prompt).unwrap();
        assert_eq!(std::fs::read_to_string(seen).unwrap(), format_prompt(&prompt));
    }

    #[test]
    fn ask_retries_invalid_answers() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("asked");
        let mut ui = sh(&format!(
            "if [ -f '{m}' ]; then echo 1; else touch '{m}'; echo banana; fi",
            m = marker.display()
        ));
        assert_eq!(ui.ask(&Prompt::yes_no("Sure?")).unwrap(), 1);
        assert!(marker.exists());
    }

    #[test]
    fn helper_failure_is_an_error() {
        let mut ui = sh("exit 1");
        let err = ui.ask(&Prompt::yes_no("Sure?")).unwrap_err();
        assert!(matches!(err, PromptError::HelperStatus { .. }));
        assert!(ui.confirm("Sure?").is_err());
    }

    #[test]
    fn missing_helper_is_an_error() {
        let mut ui = AskPassUi::with_program("/nonexistent/guardian-askpass");
        let err = ui.ask(&Prompt::yes_no("Sure?")).unwrap_err();
        assert!(matches!(err, PromptError::Helper { .. }));
    }

    #[test]
    fn confirm_passes_bare_message() {
        let dir = tempfile::tempdir().unwrap();
        let seen = dir.path().join("seen");
        let mut ui = sh(&format!("printf '%s' \"$1\" > '{}'", seen.display()));
        assert!(ui.confirm("Really sign?").unwrap());
        assert_eq!(std::fs::read_to_string(seen).unwrap(), "Really sign?");
    }

    #[test]
    fn confirm_empty_means_yes() {
        assert!(sh("echo").confirm("Sure?").unwrap());
    }

    #[test]
    fn confirm_yes_is_case_insensitive() {
        assert!(sh("echo YeS").confirm("Sure?").unwrap());
    }

    #[test]
    fn confirm_anything_else_means_no() {
        assert!(!sh("echo no").confirm("Sure?").unwrap());
        assert!(!sh("echo 1").confirm("Sure?").unwrap());
        assert!(!sh("echo yes please").confirm("Sure?").unwrap());
    }

    #[test]
    fn password_is_first_line_trimmed() {
        let mut ui = sh("printf 'hunter2\\r\\n'");
        let password = ui.ask_password("Passphrase:").unwrap();
        assert_eq!(password.as_slice(), b"hunter2");
    }

    #[test]
    fn cancelled_password_is_an_error() {
        assert!(sh("exit 1").ask_password("Passphrase:").is_err());
    }
}
