//! Event records published through the registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::state::LifecycleStatus;
use super::topic::Topic;

/// Category of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A line of agent output or a supervisor log message
    Log,
    /// A chat message relayed for an agent
    Chat,
    /// A lifecycle transition
    Status,
}

/// Severity of a log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured event delivered to subscribers of a topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub topic: Topic,

    #[serde(rename = "type")]
    pub kind: EventKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default)]
    pub payload: Value,

    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a log event
    pub fn log(topic: Topic, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            topic,
            kind: EventKind::Log,
            level: Some(level),
            message: Some(message.into()),
            payload: Value::Object(Map::new()),
            timestamp: Utc::now(),
        }
    }

    /// Create a chat event carrying an opaque payload
    pub fn chat(topic: Topic, payload: Value) -> Self {
        Self {
            topic,
            kind: EventKind::Chat,
            level: None,
            message: None,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Create a status event
    ///
    /// `payload.state` is set to `status`; fields of `details` (when it is an
    /// object) are merged next to it.
    pub fn status(topic: Topic, status: LifecycleStatus, details: Value) -> Self {
        let mut payload = Map::new();
        payload.insert("state".to_string(), json!(status));
        if let Value::Object(extra) = details {
            for (key, value) in extra {
                if key != "state" {
                    payload.insert(key, value);
                }
            }
        }

        Self {
            topic,
            kind: EventKind::Status,
            level: None,
            message: None,
            payload: Value::Object(payload),
            timestamp: Utc::now(),
        }
    }

    /// Attach metadata to the payload (builder style)
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        if !self.payload.is_object() {
            self.payload = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut self.payload {
            map.insert(key.into(), value);
        }
        self
    }

    /// Same event addressed to another topic
    pub fn retarget(&self, topic: Topic) -> Self {
        Self {
            topic,
            ..self.clone()
        }
    }

    /// The `state` of a status event
    pub fn state(&self) -> Option<LifecycleStatus> {
        if self.kind != EventKind::Status {
            return None;
        }
        self.payload
            .get("state")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn is_log(&self) -> bool {
        self.kind == EventKind::Log
    }

    pub fn is_status(&self) -> bool {
        self.kind == EventKind::Status
    }
}
