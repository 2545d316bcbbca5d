//! Plain numbered prompt on the process's standard streams.

use std::io::{self, BufRead, BufReader, Stdin, Stderr, Stdout, Write};

use tracing::debug;
use zeroize::Zeroizing;

use crate::{AuthorizationUi, Prompt, PromptError, ensure_choices, format_prompt, parse_choice};

/// Numbered prompt over a reader and two writers.
///
/// `ask` re-prompts until the reply is a number within range; there is no
/// retry bound.  End of input is the only way out without an answer.
pub struct TerminalUi<R = BufReader<Stdin>, W = Stdout, E = Stderr> {
    input: R,
    output: W,
    alerts: E,
}

impl TerminalUi {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout(), io::stderr())
    }
}

impl<R, W, E> TerminalUi<R, W, E>
where
    R: BufRead,
    W: Write,
    E: Write,
{
    pub fn new(input: R, output: W, alerts: E) -> Self {
        Self {
            input,
            output,
            alerts,
        }
    }

    #[cfg(test)]
    fn into_parts(self) -> (R, W, E) {
        (self.input, self.output, self.alerts)
    }

    fn read_reply(&mut self) -> Result<String, PromptError> {
        let mut raw = Vec::new();
        if self.input.read_until(b'\n', &mut raw)? == 0 {
            return Err(PromptError::Closed);
        }
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}

impl<R, W, E> AuthorizationUi for TerminalUi<R, W, E>
where
    R: BufRead + Send,
    W: Write + Send,
    E: Write + Send,
{
    fn ask(&mut self, prompt: &Prompt) -> Result<usize, PromptError> {
        ensure_choices(prompt)?;
        let text = format_prompt(prompt);
        loop {
            self.output.write_all(text.as_bytes())?;
            self.output.flush()?;
            let reply = self.read_reply()?;
            if let Some(choice) = parse_choice(&reply, prompt.choices.len()) {
                return Ok(choice);
            }
            debug!("invalid answer, asking again");
        }
    }

    fn inform(&mut self, msg: &str) {
        let _ = writeln!(self.output, "{msg}");
        let _ = self.output.flush();
    }

    fn alert(&mut self, msg: &str) {
        let _ = writeln!(self.alerts, "{msg}");
        let _ = self.alerts.flush();
    }

    fn ask_password(&mut self, msg: &str) -> Result<Zeroizing<Vec<u8>>, PromptError> {
        writeln!(self.output, "{msg}")?;
        self.output.flush()?;
        // rpassword reads the controlling terminal with echo disabled.
        let password = Zeroizing::new(rpassword::read_password()?);
        Ok(Zeroizing::new(password.as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ui(input: &str) -> TerminalUi<&[u8], Vec<u8>, Vec<u8>> {
        TerminalUi::new(input.as_bytes(), Vec::new(), Vec::new())
    }

    #[test]
    fn returns_valid_choice() {
        let mut ui = ui("2\n");
        let prompt = Prompt::new("Pick", ["a", "b", "c"]);
        assert_eq!(ui.ask(&prompt).unwrap(), 2);
        let (_, out, _) = ui.into_parts();
        assert_eq!(String::from_utf8(out).unwrap(), format_prompt(&prompt));
    }

    #[test]
    fn reprompts_until_valid() {
        let mut ui = ui("nope\n0\n7\n\n3\n");
        let prompt = Prompt::new("Pick", ["a", "b", "c"]);
        assert_eq!(ui.ask(&prompt).unwrap(), 3);
        let (_, out, _) = ui.into_parts();
        let shown = String::from_utf8(out).unwrap();
        assert_eq!(shown.matches("Answer (enter a number): ").count(), 5);
    }

    #[test]
    fn eof_is_reported_as_closed() {
        let mut ui = ui("x\n");
        let err = ui.ask(&Prompt::yes_no("Sure?")).unwrap_err();
        assert!(matches!(err, PromptError::Closed));
    }

    #[test]
    fn last_line_without_newline_counts() {
        let mut ui = ui("1");
        assert_eq!(ui.ask(&Prompt::yes_no("Sure?")).unwrap(), 1);
    }

    #[test]
    fn confirm_is_first_choice() {
        assert!(ui("1\n").confirm("Sure?").unwrap());
        assert!(!ui("2\n").confirm("Sure?").unwrap());
        assert!(ui("maybe\n1\n").confirm("Sure?").unwrap());
    }

    #[test]
    fn inform_and_alert_use_separate_channels() {
        let mut ui = ui("");
        ui.inform("request approved");
        ui.alert("request denied");
        let (_, out, alerts) = ui.into_parts();
        assert_eq!(String::from_utf8(out).unwrap(), "request approved\n");
        assert_eq!(String::from_utf8(alerts).unwrap(), "request denied\n");
    }

    #[test]
    fn non_utf8_reply_is_just_invalid() {
        let input: &[u8] = b"\xff\xfe\n1\n";
        let mut ui = TerminalUi::new(input, Vec::new(), Vec::new());
        assert_eq!(ui.ask(&Prompt::yes_no("Sure?")).unwrap(), 1);
    }
}
