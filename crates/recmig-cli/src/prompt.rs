//! Interactive confirmation on the terminal.

use recmig_core::Confirm;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

/// Asks the operator at each prompt; anything but yes aborts.
pub struct TerminalConfirm {
    editor: Option<DefaultEditor>,
}

impl TerminalConfirm {
    pub fn new() -> Self {
        let editor = match DefaultEditor::new() {
            Ok(editor) => Some(editor),
            Err(e) => {
                tracing::warn!(error = %e, "terminal unavailable, prompts will abort");
                None
            }
        };
        Self { editor }
    }
}

impl Confirm for TerminalConfirm {
    fn confirm(&mut self, prompt: &str) -> bool {
        let Some(editor) = self.editor.as_mut() else {
            return false;
        };
        match editor.readline(&format!("{prompt} [y/N] ")) {
            Ok(line) => is_yes(&line),
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => false,
            Err(e) => {
                tracing::warn!(error = %e, "could not read answer");
                false
            }
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y"));
        assert!(is_yes(" YES \n"));
        assert!(!is_yes(""));
        assert!(!is_yes("no"));
    }
}
