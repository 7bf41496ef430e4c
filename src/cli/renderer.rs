//! Event Renderer - Subscribes to an agent topic and renders events to the terminal
//!
//! The `EventRenderer` is an opt-in component for the operator binary:
//! - Log lines are printed with their level, colored by severity
//! - Status changes are highlighted, with pid and exit code when known
//! - Chat payloads are printed as compact JSON
//!
//! Other consumers (WebSocket relays, persistence) subscribe to the same
//! topics independently.

use colored::*;

use crate::core::{Event, EventKind, LifecycleStatus, LogLevel};
use crate::events::Subscription;

/// Terminal renderer for supervisor events
pub struct EventRenderer {
    topic_color: Color,
    status_color: Color,
    chat_color: Color,
    /// Whether to prefix lines with the event timestamp
    show_timestamps: bool,
}

impl EventRenderer {
    /// Create a renderer with default colors
    pub fn new() -> Self {
        Self {
            topic_color: Color::Blue,
            status_color: Color::Cyan,
            chat_color: Color::Magenta,
            show_timestamps: false,
        }
    }

    pub fn with_timestamps(mut self, show: bool) -> Self {
        self.show_timestamps = show;
        self
    }

    /// Format one event as a single terminal line
    pub fn format(&self, event: &Event) -> String {
        let mut line = String::new();
        if self.show_timestamps {
            line.push_str(&format!(
                "{} ",
                event.timestamp.format("%H:%M:%S%.3f").to_string().dimmed()
            ));
        }
        line.push_str(&format!(
            "{} ",
            format!("[{}]", event.topic).color(self.topic_color)
        ));

        match event.kind {
            EventKind::Log => {
                let level = event.level.unwrap_or(LogLevel::Info);
                line.push_str(&format!(
                    "{} {}",
                    level_label(level),
                    event.message.as_deref().unwrap_or_default()
                ));
            }
            EventKind::Status => {
                let state = event
                    .state()
                    .map(|s| s.as_str())
                    .unwrap_or("unknown");
                line.push_str(&format!("{} {}", "●".color(self.status_color), state.bold()));

                if let Some(pid) = event.payload.get("pid").and_then(|v| v.as_u64()) {
                    line.push_str(&format!(" (pid {})", pid));
                }
                if let Some(code) = event.payload.get("exit_code").and_then(|v| v.as_i64()) {
                    line.push_str(&format!(" (exit code {})", code));
                }
                if event.payload.get("forced").and_then(|v| v.as_bool()) == Some(true) {
                    line.push_str(&format!(" {}", "[killed]".red()));
                }
            }
            EventKind::Chat => {
                line.push_str(&format!(
                    "{} {}",
                    "chat:".color(self.chat_color).bold(),
                    event.payload
                ));
            }
        }

        line
    }

    /// Print one event
    pub fn render(&self, event: &Event) {
        println!("{}", self.format(event));
    }

    /// Render events until the agent process exits or the subscription ends
    ///
    /// Returns the exit status (`completed` or `crashed`) if one was seen.
    pub async fn run(&self, mut subscription: Subscription) -> Option<LifecycleStatus> {
        while let Some(event) = subscription.recv().await {
            self.render(&event);
            if let Some(state) = event.state().filter(LifecycleStatus::is_exit) {
                return Some(state);
            }
        }
        None
    }
}

impl Default for EventRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn level_label(level: LogLevel) -> ColoredString {
    let label = format!("{:<7}", level.as_str());
    match level {
        LogLevel::Debug => label.dimmed(),
        LogLevel::Info => label.green(),
        LogLevel::Warning => label.yellow(),
        LogLevel::Error => label.red().bold(),
    }
}
