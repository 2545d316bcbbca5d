//! Authorization UI for guardian.
//!
//! Every remote signing request that needs a human decision goes through an
//! [`AuthorizationUi`].  Three interchangeable backends implement it:
//!
//! | Backend        | Channel                                   |
//! |----------------|-------------------------------------------|
//! | [`TerminalUi`] | plain numbered prompt on stdin/stdout     |
//! | [`FancyUi`]    | `dialoguer` menu on the local terminal    |
//! | [`AskPassUi`]  | one `ssh-askpass` helper run per call     |
//!
//! All operations block.  Backends are not safe for concurrent use; the
//! `&mut self` receivers make callers serialize access (the policy agent
//! keeps its backend behind a mutex).
//!
//! The interactive backends never report a malformed answer as an error:
//! they ask again until they get a number in range.  Only the helper backend
//! surfaces failures to collect an answer ([`PromptError::Helper`]).

use zeroize::Zeroizing;

use guardian_core::PromptKind;

pub mod askpass;
pub mod fancy;
pub mod terminal;

pub use askpass::AskPassUi;
pub use fancy::FancyUi;
pub use terminal::TerminalUi;

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("prompt has no choices")]
    NoChoices,

    #[error("input closed before an answer was given")]
    Closed,

    #[error("terminal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("terminal prompt failed: {0}")]
    Terminal(#[from] dialoguer::Error),

    #[error("prompt helper '{program}' failed to launch: {source}")]
    Helper {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("prompt helper '{program}' exited with {status}")]
    HelperStatus {
        program: String,
        status: std::process::ExitStatus,
    },
}

/// A question and the ordered labels the user picks from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub question: String,
    pub choices: Vec<String>,
}

impl Prompt {
    pub fn new<I, S>(question: impl Into<String>, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            question: question.into(),
            choices: choices.into_iter().map(Into::into).collect(),
        }
    }

    /// The fixed two-choice prompt behind `confirm`.
    pub fn yes_no(question: impl Into<String>) -> Self {
        Self::new(question, ["Yes", "No"])
    }
}

pub trait AuthorizationUi: Send {
    /// Present `prompt` and return the selected choice, 1-indexed.
    fn ask(&mut self, prompt: &Prompt) -> Result<usize, PromptError>;

    /// Yes/No question; `true` iff the answer is the first choice.
    fn confirm(&mut self, msg: &str) -> Result<bool, PromptError> {
        Ok(self.ask(&Prompt::yes_no(msg))? == 1)
    }

    /// Status notice on the normal output channel.
    fn inform(&mut self, msg: &str);

    /// Notice on the error/alert channel.
    fn alert(&mut self, msg: &str);

    /// Collect a secret without echoing it.  Never log the result.
    fn ask_password(&mut self, msg: &str) -> Result<Zeroizing<Vec<u8>>, PromptError>;
}

/// Render a prompt as shown to the user: the question, the numbered choices
/// and an instruction to answer with a number.
pub fn format_prompt(prompt: &Prompt) -> String {
    let mut out = String::with_capacity(prompt.question.len() + 64);
    out.push_str(&prompt.question);
    for (i, choice) in prompt.choices.iter().enumerate() {
        out.push_str(&format!("\n    {}) {}", i + 1, choice));
    }
    out.push_str("\n\nAnswer (enter a number): ");
    out
}

/// Parse a reply into a 1-indexed choice, `None` unless it is an integer in
/// `1..=choices`.
pub fn parse_choice(reply: &str, choices: usize) -> Option<usize> {
    reply
        .trim()
        .parse::<usize>()
        .ok()
        .filter(|n| (1..=choices).contains(n))
}

/// Build the backend for `kind`.
pub fn for_kind(kind: PromptKind) -> Box<dyn AuthorizationUi> {
    match kind {
        PromptKind::Terminal => Box::new(TerminalUi::stdio()),
        PromptKind::Fancy => Box::new(FancyUi::new()),
        PromptKind::Display => Box::new(AskPassUi::from_env()),
    }
}

pub(crate) fn ensure_choices(prompt: &Prompt) -> Result<(), PromptError> {
    if prompt.choices.is_empty() {
        Err(PromptError::NoChoices)
    } else {
        Ok(())
    }
}
