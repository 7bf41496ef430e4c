//! Agent descriptors
//!
//! The descriptor is everything the caller knows about an agent that the
//! supervisor needs to launch it. Configuration, tools, and permissions are
//! opaque here; they are only serialized into the child's environment.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{SupervisorError, SupervisorResult};

/// Maximum length of an agent identifier
pub const MAX_AGENT_ID_LEN: usize = 50;

/// Capability flags granted to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPermissions {
    #[serde(default)]
    pub file_access: bool,

    #[serde(default)]
    pub shell_access: bool,

    #[serde(default = "default_true")]
    pub network_access: bool,

    #[serde(default)]
    pub browser_access: bool,

    #[serde(default = "default_true")]
    pub api_access: bool,

    #[serde(default)]
    pub database_access: bool,

    /// Additional flags not known to the supervisor
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_true() -> bool {
    true
}

impl Default for AgentPermissions {
    fn default() -> Self {
        Self {
            file_access: false,
            shell_access: false,
            network_access: true,
            browser_access: false,
            api_access: true,
            database_access: false,
            extra: BTreeMap::new(),
        }
    }
}

/// Provider credentials, keyed by provider name
///
/// `Debug` never prints key material.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKeys(BTreeMap<String, String>);

impl ApiKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, provider: impl Into<String>, key: impl Into<String>) {
        self.0.insert(provider.into(), key.into());
    }

    pub fn with_key(mut self, provider: impl Into<String>, key: impl Into<String>) -> Self {
        self.insert(provider, key);
        self
    }

    /// Providers with a non-empty key
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .filter(|(_, key)| !key.is_empty())
            .map(|(provider, key)| (provider.as_str(), key.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|provider| (provider, "<redacted>")))
            .finish()
    }
}

/// Launch description of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Stable identity; also the topic key (`agent:<agent_id>`)
    pub agent_id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Model/runtime configuration, passed through as `AGENT_CONFIG`
    #[serde(default)]
    pub config: Value,

    /// Declared tools, passed through as `AGENT_TOOLS`
    #[serde(default)]
    pub tools: Vec<String>,

    #[serde(default)]
    pub permissions: AgentPermissions,

    #[serde(default)]
    pub api_keys: ApiKeys,

    /// User owning the agent, for `user:<owner_id>` forwarding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,

    /// Program and arguments; the supervisor's default command when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
}

impl AgentDescriptor {
    pub fn new(agent_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            name: name.into(),
            description: None,
            config: Value::Object(Default::default()),
            tools: Vec::new(),
            permissions: AgentPermissions::default(),
            api_keys: ApiKeys::default(),
            owner_id: None,
            command: None,
        }
    }

    /// Load a descriptor from a file
    ///
    /// `.yaml` and `.yml` files are read as YAML, everything else as JSON.
    pub fn from_file(path: impl AsRef<Path>) -> SupervisorResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml")
            });
        if is_yaml {
            Ok(serde_yaml::from_str(&raw)?)
        } else {
            Ok(serde_json::from_str(&raw)?)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_permissions(mut self, permissions: AgentPermissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_api_key(mut self, provider: impl Into<String>, key: impl Into<String>) -> Self {
        self.api_keys.insert(provider, key);
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = Some(command.into_iter().map(Into::into).collect());
        self
    }

    /// Check the descriptor can be launched
    pub fn validate(&self) -> SupervisorResult<()> {
        let id = self.agent_id.as_str();
        if id.is_empty() {
            return Err(SupervisorError::InvalidDescriptor(
                "agent_id must not be empty".into(),
            ));
        }
        if id.len() > MAX_AGENT_ID_LEN {
            return Err(SupervisorError::InvalidDescriptor(format!(
                "agent_id longer than {} characters",
                MAX_AGENT_ID_LEN
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(SupervisorError::InvalidDescriptor(format!(
                "agent_id '{}' may only contain letters, digits, '-' and '_'",
                id
            )));
        }
        if self.name.trim().is_empty() {
            return Err(SupervisorError::InvalidDescriptor("name must not be empty".into()));
        }
        if let Some(command) = &self.command {
            if command.first().map_or(true, |program| program.is_empty()) {
                return Err(SupervisorError::InvalidDescriptor(
                    "command must name a program".into(),
                ));
            }
        }
        Ok(())
    }

    /// Validated copy with the identifier lower-cased
    pub fn normalized(&self) -> SupervisorResult<Self> {
        self.validate()?;
        let mut descriptor = self.clone();
        descriptor.agent_id = descriptor.agent_id.to_ascii_lowercase();
        Ok(descriptor)
    }
}
