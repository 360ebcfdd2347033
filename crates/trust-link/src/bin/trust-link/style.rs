//! Terminal colouring for CLI output.

use std::io::IsTerminal;

use owo_colors::OwoColorize;
use trust_link::NotificationLevel;

#[derive(Debug, Clone, Copy)]
pub enum Tone {
    Plain,
    Success,
    Warning,
    Error,
    Accent,
}

impl From<NotificationLevel> for Tone {
    fn from(level: NotificationLevel) -> Self {
        match level {
            NotificationLevel::Info => Self::Plain,
            NotificationLevel::Success => Self::Success,
            NotificationLevel::Warning => Self::Warning,
            NotificationLevel::Error => Self::Error,
        }
    }
}

/// Colour `text` when stderr is a terminal.
pub fn paint(tone: Tone, text: impl AsRef<str>) -> String {
    let text = text.as_ref();
    if !std::io::stderr().is_terminal() {
        return text.to_string();
    }
    match tone {
        Tone::Plain => text.to_string(),
        Tone::Success => text.green().to_string(),
        Tone::Warning => text.yellow().to_string(),
        Tone::Error => text.red().to_string(),
        Tone::Accent => text.cyan().to_string(),
    }
}
