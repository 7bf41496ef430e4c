//! Per-agent event publishing
//!
//! Every event about an agent goes to `agent:<agent_id>`. When owner
//! forwarding is enabled the same event is also published to
//! `user:<owner_id>`.

use serde_json::Value;

use crate::core::{Event, LifecycleStatus, LogLevel, Topic};
use crate::events::EventRegistry;

/// Publishes events for one agent
#[derive(Debug, Clone)]
pub struct AgentPublisher {
    registry: EventRegistry,
    topic: Topic,
    owner_topic: Option<Topic>,
}

impl AgentPublisher {
    pub fn new(registry: EventRegistry, agent_id: &str) -> Self {
        Self {
            registry,
            topic: Topic::agent(agent_id),
            owner_topic: None,
        }
    }

    /// Also deliver every event to `user:<owner_id>`
    pub fn with_owner(mut self, owner_id: &str) -> Self {
        self.owner_topic = Some(Topic::user(owner_id));
        self
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn owner_topic(&self) -> Option<&Topic> {
        self.owner_topic.as_ref()
    }

    /// Publish to the agent topic (and owner topic); returns total deliveries
    pub fn publish(&self, event: Event) -> usize {
        let forwarded = match &self.owner_topic {
            Some(owner) => self.registry.publish(event.retarget(owner.clone())),
            None => 0,
        };
        forwarded + self.registry.publish(event)
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) -> usize {
        self.publish(Event::log(self.topic.clone(), level, message))
    }

    pub fn chat(&self, payload: Value) -> usize {
        self.publish(Event::chat(self.topic.clone(), payload))
    }

    pub fn status(&self, status: LifecycleStatus, details: Value) -> usize {
        self.publish(Event::status(self.topic.clone(), status, details))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publishes_to_agent_topic() {
        let registry = EventRegistry::new();
        let mut sub = registry.subscribe(Topic::agent("a1"));
        let publisher = AgentPublisher::new(registry.clone(), "a1");

        assert_eq!(publisher.log(LogLevel::Info, "hello"), 1);
        let event = sub.recv().await.unwrap();
        assert_eq!(event.topic, Topic::agent("a1"));
        assert_eq!(event.message.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_forwards_to_owner() {
        let registry = EventRegistry::new();
        let mut agent_sub = registry.subscribe(Topic::agent("a1"));
        let mut owner_sub = registry.subscribe(Topic::user("u7"));
        let publisher = AgentPublisher::new(registry.clone(), "a1").with_owner("u7");

        assert_eq!(publisher.status(LifecycleStatus::Running, json!({"pid": 1})), 2);

        let direct = agent_sub.recv().await.unwrap();
        let forwarded = owner_sub.recv().await.unwrap();
        assert_eq!(direct.state(), Some(LifecycleStatus::Running));
        assert_eq!(forwarded.topic, Topic::user("u7"));
        assert_eq!(forwarded.payload, direct.payload);
    }
}
