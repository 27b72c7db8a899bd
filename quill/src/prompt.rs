// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interactive user input.

use crate::{
    error::QuillError,
    event_bus::{Event, EventBus},
};

/// Something that can ask the user a question.
pub trait Prompter {
    /// Ask for a line of input. Sensitive input is not echoed.
    fn prompt(&self, message: &str, sensitive: bool) -> Result<String, QuillError>;
}

/// Prompts on the controlling terminal.
#[derive(Clone, Copy, Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn prompt(&self, message: &str, sensitive: bool) -> Result<String, QuillError> {
        let response = if sensitive {
            dialoguer::Password::new()
                .with_prompt(message)
                .allow_empty_password(true)
                .interact()
        } else {
            dialoguer::Input::<String>::new()
                .with_prompt(message)
                .allow_empty(true)
                .interact_text()
        };

        response.map_err(|e| QuillError::Prompt(e.to_string()))
    }
}

/// A prompter for non-interactive contexts. Always fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPrompter;

impl Prompter for NoPrompter {
    fn prompt(&self, message: &str, _sensitive: bool) -> Result<String, QuillError> {
        Err(QuillError::Prompt(format!(
            "input required but prompting is disabled: {}",
            message
        )))
    }
}

/// Announces each prompt on an [EventBus] before delegating.
///
/// Lets a progress display get out of the way while input is read.
pub struct EventPrompter<P: Prompter> {
    events: EventBus,
    inner: P,
}

impl<P: Prompter> EventPrompter<P> {
    pub fn new(events: EventBus, inner: P) -> Self {
        Self { events, inner }
    }
}

impl<P: Prompter> Prompter for EventPrompter<P> {
    fn prompt(&self, message: &str, sensitive: bool) -> Result<String, QuillError> {
        self.events.publish(Event::InputPrompt {
            message: message.to_string(),
            sensitive,
        });

        self.inner.prompt(message, sensitive)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn prompts_are_published() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let prompter = EventPrompter::new(bus, NoPrompter);
        assert!(prompter.prompt("P12 password", true).is_err());

        match rx.try_recv().unwrap() {
            Event::InputPrompt { message, sensitive } => {
                assert_eq!(message, "P12 password");
                assert!(sensitive);
            }
            _ => panic!("expected prompt event"),
        }
    }
}
