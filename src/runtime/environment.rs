//! Child process environment
//!
//! Serializes a descriptor into the variables an agent process reads at
//! startup. The resulting map holds secrets and must never be logged.

use std::collections::BTreeMap;
use std::path::Path;

use crate::config::SupervisorConfig;
use crate::core::SupervisorResult;

use super::descriptor::AgentDescriptor;

/// Environment handed to an agent process on top of the inherited one
#[derive(Clone, Default)]
pub struct AgentEnvironment {
    vars: BTreeMap<String, String>,
}

impl AgentEnvironment {
    /// Build the environment for `descriptor` running in `workspace`
    pub fn build(
        descriptor: &AgentDescriptor,
        workspace: &Path,
        config: &SupervisorConfig,
    ) -> SupervisorResult<Self> {
        let mut vars = BTreeMap::new();
        let api_base = config.api_base_url.trim_end_matches('/');

        vars.insert("AGENT_ID".to_string(), descriptor.agent_id.clone());
        vars.insert("AGENT_NAME".to_string(), descriptor.name.clone());
        vars.insert(
            "AGENT_CONFIG".to_string(),
            serde_json::to_string(&descriptor.config)?,
        );
        vars.insert(
            "AGENT_TOOLS".to_string(),
            serde_json::to_string(&descriptor.tools)?,
        );
        vars.insert(
            "AGENT_PERMISSIONS".to_string(),
            serde_json::to_string(&descriptor.permissions)?,
        );
        vars.insert(
            "AGENT_WORKSPACE".to_string(),
            workspace.to_string_lossy().into_owned(),
        );
        vars.insert(
            "WEBSOCKET_URL".to_string(),
            websocket_url(api_base, &descriptor.agent_id),
        );
        vars.insert("API_BASE_URL".to_string(), api_base.to_string());

        for (provider, key) in descriptor.api_keys.iter() {
            vars.insert(api_key_var(provider), key.to_string());
        }

        Ok(Self { vars })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl std::fmt::Debug for AgentEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentEnvironment")
            .field("keys", &self.vars.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// `http://host/api` -> `ws://host/api/agents/<id>/ws`
fn websocket_url(api_base: &str, agent_id: &str) -> String {
    let base = if let Some(rest) = api_base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = api_base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        api_base.to_string()
    };
    format!("{}/agents/{}/ws", base, agent_id)
}

/// `openai` -> `OPENAI_API_KEY`, `my-llm` -> `MY_LLM_API_KEY`
fn api_key_var(provider: &str) -> String {
    let name: String = provider
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_API_KEY", name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn descriptor() -> AgentDescriptor {
        AgentDescriptor::new("demo", "Demo Agent")
            .with_config(json!({"model": "gpt-4", "temperature": 0.7}))
            .with_tools(["file", "shell"])
            .with_api_key("openai", "sk-1")
            .with_api_key("my-llm", "k-2")
            .with_api_key("google", "")
    }

    #[test]
    fn test_environment_contents() {
        let config = SupervisorConfig::default();
        let workspace = PathBuf::from("/tmp/ws/demo");
        let env = AgentEnvironment::build(&descriptor(), &workspace, &config).unwrap();

        assert_eq!(env.get("AGENT_ID"), Some("demo"));
        assert_eq!(env.get("AGENT_NAME"), Some("Demo Agent"));
        assert_eq!(env.get("AGENT_TOOLS"), Some(r#"["file","shell"]"#));
        assert_eq!(env.get("AGENT_WORKSPACE"), Some("/tmp/ws/demo"));
        assert_eq!(env.get("API_BASE_URL"), Some("http://localhost:5000/api"));
        assert_eq!(
            env.get("WEBSOCKET_URL"),
            Some("ws://localhost:5000/api/agents/demo/ws")
        );

        let config_json: serde_json::Value =
            serde_json::from_str(env.get("AGENT_CONFIG").unwrap()).unwrap();
        assert_eq!(config_json["model"], "gpt-4");

        let permissions: serde_json::Value =
            serde_json::from_str(env.get("AGENT_PERMISSIONS").unwrap()).unwrap();
        assert_eq!(permissions["network_access"], true);
    }

    #[test]
    fn test_api_key_variables() {
        let config = SupervisorConfig::default();
        let env = AgentEnvironment::build(&descriptor(), Path::new("/tmp"), &config).unwrap();

        assert_eq!(env.get("OPENAI_API_KEY"), Some("sk-1"));
        assert_eq!(env.get("MY_LLM_API_KEY"), Some("k-2"));
        assert_eq!(env.get("GOOGLE_API_KEY"), None);
    }

    #[test]
    fn test_secure_websocket_url() {
        assert_eq!(
            websocket_url("https://agents.example.com/api", "a1"),
            "wss://agents.example.com/api/agents/a1/ws"
        );
    }

    #[test]
    fn test_debug_hides_values() {
        let config = SupervisorConfig::default();
        let env = AgentEnvironment::build(&descriptor(), Path::new("/tmp"), &config).unwrap();
        let debug = format!("{:?}", env);
        assert!(debug.contains("OPENAI_API_KEY"));
        assert!(!debug.contains("sk-1"));
    }
}
