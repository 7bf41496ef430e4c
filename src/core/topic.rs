//! Topic keys for the event registry

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::error::SupervisorError;

/// Kind half of a topic key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TopicKind {
    /// Events of one agent
    Agent,
    /// Events addressed to one user
    User,
    /// Named broadcast channel
    Broadcast,
}

impl TopicKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicKind::Agent => "agent",
            TopicKind::User => "user",
            TopicKind::Broadcast => "broadcast",
        }
    }
}

/// Composite `(kind, identifier)` topic key, written as `kind:identifier`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic {
    kind: TopicKind,
    id: String,
}

impl Topic {
    pub fn new(kind: TopicKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// `agent:<id>`
    pub fn agent(id: impl Into<String>) -> Self {
        Self::new(TopicKind::Agent, id)
    }

    /// `user:<id>`
    pub fn user(id: impl Into<String>) -> Self {
        Self::new(TopicKind::User, id)
    }

    /// `broadcast:<id>`
    pub fn broadcast(id: impl Into<String>) -> Self {
        Self::new(TopicKind::Broadcast, id)
    }

    pub fn kind(&self) -> TopicKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

impl FromStr for Topic {
    type Err = SupervisorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| SupervisorError::InvalidTopic(s.to_string()))?;

        if id.is_empty() {
            return Err(SupervisorError::InvalidTopic(s.to_string()));
        }

        let kind = match kind {
            "agent" => TopicKind::Agent,
            "user" => TopicKind::User,
            "broadcast" => TopicKind::Broadcast,
            _ => return Err(SupervisorError::InvalidTopic(s.to_string())),
        };

        Ok(Topic::new(kind, id))
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
