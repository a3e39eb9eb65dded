// src/poll.rs
use crate::models::Choice;

/// Result of a user submitting a choice on a question.
#[derive(Debug, Clone, PartialEq)]
pub enum Ballot {
    /// First vote on the question.
    Recorded { choice: Choice },
    /// Previous vote removed, new one recorded.
    Changed { from: Choice, to: Choice },
    /// The user already voted for this exact choice; nothing written.
    Unchanged { choice: Choice },
}

impl Ballot {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Ballot::Unchanged { .. })
    }

    /// The choice the user holds once the ballot is applied.
    pub fn choice(&self) -> &Choice {
        match self {
            Ballot::Recorded { choice } | Ballot::Unchanged { choice } => choice,
            Ballot::Changed { to, .. } => to,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Ballot::Recorded { .. } => "Your choice successfully recorded. Thank you.".to_string(),
            Ballot::Changed { from, to } => {
                format!("Your vote changed from \"{}\" to \"{}\".", from.text, to.text)
            }
            Ballot::Unchanged { choice } => {
                format!("You have already voted for \"{}\".", choice.text)
            }
        }
    }
}

/// Decide what a submission does given the choice the user currently holds on
/// the same question, if any.
pub fn resolve(current: Option<Choice>, selected: Choice) -> Ballot {
    match current {
        None => Ballot::Recorded { choice: selected },
        Some(current) if current.id == selected.id => Ballot::Unchanged { choice: current },
        Some(current) => Ballot::Changed {
            from: current,
            to: selected,
        },
    }
}
