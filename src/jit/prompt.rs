//! Interactive prompt for the access window when none was given.

use std::io::IsTerminal;

use dialoguer::Input;

use super::duration::{parse_hours_input, MAX_HOURS, MIN_HOURS};
use crate::error::JitError;

/// Source of hours when a new rule needs a maximum duration.
pub trait HoursPrompt {
    fn prompt_hours(&self, vm_name: &str, port: u16) -> Result<u32, JitError>;
}

/// Asks on the terminal using dialoguer.
pub struct TerminalPrompt;

/// Checks if stdin and stderr are terminals; dialoguer draws on stderr.
fn is_interactive_terminal() -> bool {
    std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
}

impl HoursPrompt for TerminalPrompt {
    fn prompt_hours(&self, vm_name: &str, port: u16) -> Result<u32, JitError> {
        if !is_interactive_terminal() {
            return Err(JitError::PromptUnavailable);
        }

        let input: String = Input::new()
            .with_prompt(format!(
                "Hours of access to {} port {} ({}-{})",
                vm_name, port, MIN_HOURS, MAX_HOURS
            ))
            .interact_text()
            .map_err(|e| JitError::Prompt(e.to_string()))?;

        // Invalid input aborts rather than re-prompting
        parse_hours_input(&input)
    }
}

/// Canned answer used by tests.
#[cfg(test)]
pub struct FixedHours(pub Option<u32>);

#[cfg(test)]
impl HoursPrompt for FixedHours {
    fn prompt_hours(&self, _vm_name: &str, _port: u16) -> Result<u32, JitError> {
        self.0.ok_or(JitError::PromptUnavailable)
    }
}
