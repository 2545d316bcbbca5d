//! Menu-driven terminal prompt built on `dialoguer`.

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Password, Select};
use tracing::debug;
use zeroize::Zeroizing;

use crate::{AuthorizationUi, Prompt, PromptError, ensure_choices};

/// Same contract as [`TerminalUi`](crate::TerminalUi), presented as an
/// arrow-key menu.  Dismissing the menu (Esc/q) asks again.
#[derive(Default)]
pub struct FancyUi {
    theme: ColorfulTheme,
}

impl FancyUi {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Map a menu selection (0-based, `None` when dismissed) to a 1-based
/// choice.  `None` means the question has to be asked again.
fn menu_choice(selection: Option<usize>, choices: usize) -> Option<usize> {
    selection.filter(|&index| index < choices).map(|index| index + 1)
}

impl AuthorizationUi for FancyUi {
    fn ask(&mut self, prompt: &Prompt) -> Result<usize, PromptError> {
        ensure_choices(prompt)?;
        loop {
            let selection = Select::with_theme(&self.theme)
                .with_prompt(prompt.question.as_str())
                .items(prompt.choices.as_slice())
                .default(0)
                .interact_opt()?;
            match menu_choice(selection, prompt.choices.len()) {
                Some(choice) => return Ok(choice),
                None => debug!("menu dismissed, asking again"),
            }
        }
    }

    fn inform(&mut self, msg: &str) {
        println!("{msg}");
    }

    fn alert(&mut self, msg: &str) {
        eprintln!("{msg}");
    }

    fn ask_password(&mut self, msg: &str) -> Result<Zeroizing<Vec<u8>>, PromptError> {
        let password = Zeroizing::new(
            Password::with_theme(&self.theme)
                .with_prompt(msg)
                .allow_empty_password(true)
                .interact()?,
        );
        Ok(Zeroizing::new(password.as_bytes().to_vec()))
    }
}
