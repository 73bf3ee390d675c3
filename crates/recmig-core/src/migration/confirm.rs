//! Operator decisions at prompts.

/// Decides whether the run continues at a prompt.
pub trait Confirm {
    /// Ask; `true` continues the run.
    fn confirm(&mut self, prompt: &str) -> bool;
}

/// A fixed answer, for unattended runs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmPolicy {
    AlwaysContinue,
    AlwaysAbort,
}

impl Confirm for ConfirmPolicy {
    fn confirm(&mut self, prompt: &str) -> bool {
        let answer = *self == ConfirmPolicy::AlwaysContinue;
        tracing::info!(prompt, answer, "automatic confirmation");
        answer
    }
}

/// Records prompts and answers from a script of responses.
#[derive(Debug, Default)]
pub struct RecordedConfirm {
    answers: Vec<bool>,
    pub prompts: Vec<String>,
}

impl RecordedConfirm {
    /// Answer with `answers` in order, then abort.
    pub fn new(answers: Vec<bool>) -> Self {
        Self {
            answers,
            prompts: Vec::new(),
        }
    }
}

impl Confirm for RecordedConfirm {
    fn confirm(&mut self, prompt: &str) -> bool {
        self.prompts.push(prompt.to_string());
        if self.answers.is_empty() {
            false
        } else {
            self.answers.remove(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policies() {
        assert!(ConfirmPolicy::AlwaysContinue.confirm("go on?"));
        assert!(!ConfirmPolicy::AlwaysAbort.confirm("go on?"));
    }

    #[test]
    fn test_recorded() {
        let mut confirm = RecordedConfirm::new(vec![true]);
        assert!(confirm.confirm("first"));
        assert!(!confirm.confirm("second"));
        assert_eq!(confirm.prompts, vec!["first", "second"]);
    }
}
