//! Configuration for toolconductor.
//!
//! Provides the [`ServerRegistry`] naming every tool server the process talks to, and
//! [`ConductorConfig`] bundling the registry with the orchestration settings.
//! Users construct these manually, or deserialize the registry with `serde` from whatever
//! source the host process prefers. No config-file parser is bundled.
//!
//! # Example
//!
//! ```rust
//! use toolconductor::config::{ConductorConfig, ServerEndpoint, ServerRegistry};
//!
//! let servers = ServerRegistry::builder()
//!     .server("hr", ServerEndpoint::new("http://localhost:8000/mcp"))
//!     .build()
//!     .unwrap();
//!
//! let config = ConductorConfig::new(servers).with_max_turns(5);
//! assert_eq!(config.max_turns, 5);
//! assert_eq!(config.servers.names().collect::<Vec<_>>(), vec!["hr"]);
//! ```

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::error::Error;
use std::fmt;

/// Default number of model rounds that may request tools before a forced completion.
pub const DEFAULT_MAX_TURNS: usize = 3;

/// Default system instruction seeding every conversation.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Use tools to get live data.";

/// Default request timeout for tool server round trips.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// MCP transport spoken to a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpTransport {
    /// Legacy SSE when the URL path ends in `/sse`, streamable HTTP otherwise.
    Auto,
    /// Single endpoint taking `POST`s answered with JSON or an event stream.
    StreamableHttp,
    /// Long-lived `GET` event stream plus `POST`s to the endpoint it announces.
    Sse,
}

impl Default for McpTransport {
    fn default() -> Self {
        McpTransport::Auto
    }
}

impl McpTransport {
    /// Settle [`McpTransport::Auto`] for `url`.
    pub fn resolve(self, url: &str) -> McpTransport {
        match self {
            McpTransport::Auto => {
                let path = url.split(|c| c == '?' || c == '#').next().unwrap_or(url);
                if path.trim_end_matches('/').ends_with("/sse") {
                    McpTransport::Sse
                } else {
                    McpTransport::StreamableHttp
                }
            }
            other => other,
        }
    }
}

/// Where and how to reach one tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEndpoint {
    /// Endpoint URL (e.g. `http://localhost:8000/mcp`). Local connectors may use any label.
    pub url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub transport: McpTransport,
}

impl ServerEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            transport: McpTransport::Auto,
        }
    }

    /// Override the default request timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Pin the MCP transport instead of guessing it from the URL.
    pub fn with_transport(mut self, transport: McpTransport) -> Self {
        self.transport = transport;
        self
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Two registry entries share a name.
    DuplicateServer(String),
    /// A server name is empty.
    EmptyServerName,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::DuplicateServer(name) => {
                write!(f, "Server '{}' is registered more than once", name)
            }
            ConfigError::EmptyServerName => write!(f, "Server name must not be empty"),
        }
    }
}

impl Error for ConfigError {}

/// One `{name, url, timeout_secs, transport}` entry of the serialized registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    pub name: String,
    #[serde(flatten)]
    pub endpoint: ServerEndpoint,
}

/// Value side of the map form: a bare URL or a full endpoint object.
#[derive(Deserialize)]
#[serde(untagged)]
enum EndpointSpec {
    Url(String),
    Endpoint(ServerEndpoint),
}

impl From<EndpointSpec> for ServerEndpoint {
    fn from(spec: EndpointSpec) -> Self {
        match spec {
            EndpointSpec::Url(url) => ServerEndpoint::new(url),
            EndpointSpec::Endpoint(endpoint) => endpoint,
        }
    }
}

/// Ordered, immutable mapping from server name to endpoint.
///
/// Registry order is the order sessions are opened in and the order catalogs are merged in,
/// which decides who wins when two servers advertise the same tool name.
///
/// Deserializes from a list of [`ServerEntry`] objects or from an object keyed by server
/// name, whose values are a URL string or an endpoint object. The object form keeps the key
/// order of the source document.
///
/// ```rust
/// use toolconductor::config::ServerRegistry;
///
/// let registry: ServerRegistry = serde_json::from_str(
///     r#"{"MCP_SERVER": "http://localhost:8000/sse", "docs": {"url": "http://localhost:9000/mcp"}}"#,
/// )
/// .unwrap();
/// assert_eq!(registry.names().collect::<Vec<_>>(), vec!["MCP_SERVER", "docs"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(into = "Vec<ServerEntry>")]
pub struct ServerRegistry {
    entries: Vec<(String, ServerEndpoint)>,
}

impl ServerRegistry {
    pub fn builder() -> ServerRegistryBuilder {
        ServerRegistryBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Endpoint registered under `name`.
    pub fn get(&self, name: &str) -> Option<&ServerEndpoint> {
        self.entries
            .iter()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, endpoint)| endpoint)
    }

    /// Server names in registry order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// `(name, endpoint)` pairs in registry order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ServerEndpoint)> {
        self.entries
            .iter()
            .map(|(name, endpoint)| (name.as_str(), endpoint))
    }
}

struct RegistryVisitor;

impl<'de> Visitor<'de> for RegistryVisitor {
    type Value = ServerRegistry;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a list of server entries or an object keyed by server name")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut builder = ServerRegistry::builder();
        while let Some(entry) = seq.next_element::<ServerEntry>()? {
            builder = builder.server(entry.name, entry.endpoint);
        }
        builder.build().map_err(de::Error::custom)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut builder = ServerRegistry::builder();
        while let Some((name, spec)) = map.next_entry::<String, EndpointSpec>()? {
            builder = builder.server(name, spec.into());
        }
        builder.build().map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for ServerRegistry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RegistryVisitor)
    }
}

impl From<ServerRegistry> for Vec<ServerEntry> {
    fn from(registry: ServerRegistry) -> Self {
        registry
            .entries
            .into_iter()
            .map(|(name, endpoint)| ServerEntry { name, endpoint })
            .collect()
    }
}

/// Builder validating names as the registry is assembled.
#[derive(Debug, Default)]
pub struct ServerRegistryBuilder {
    entries: Vec<(String, ServerEndpoint)>,
}

impl ServerRegistryBuilder {
    /// Append a server. Validation is deferred to [`ServerRegistryBuilder::build`].
    pub fn server(mut self, name: impl Into<String>, endpoint: ServerEndpoint) -> Self {
        self.entries.push((name.into(), endpoint));
        self
    }

    pub fn build(self) -> Result<ServerRegistry, ConfigError> {
        let mut seen: Vec<&str> = Vec::with_capacity(self.entries.len());
        for (name, _) in &self.entries {
            if name.trim().is_empty() {
                return Err(ConfigError::EmptyServerName);
            }
            if seen.contains(&name.as_str()) {
                return Err(ConfigError::DuplicateServer(name.clone()));
            }
            seen.push(name.as_str());
        }
        Ok(ServerRegistry {
            entries: self.entries,
        })
    }
}

/// Settings supplied by the hosting process.
#[derive(Debug, Clone)]
pub struct ConductorConfig {
    /// Rounds in which the model may request tools before the forced final completion.
    pub max_turns: usize,
    /// System instruction placed at the head of every conversation.
    pub system_prompt: String,
    /// Tool servers to connect to at startup.
    pub servers: ServerRegistry,
}

impl ConductorConfig {
    pub fn new(servers: ServerRegistry) -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            servers,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }
}

impl Default for ConductorConfig {
    /// No servers, three turns and the stock system prompt.
    ///
    /// ```rust
    /// use toolconductor::config::ConductorConfig;
    ///
    /// let config = ConductorConfig::default();
    /// assert_eq!(config.max_turns, 3);
    /// assert!(config.servers.is_empty());
    /// ```
    fn default() -> Self {
        Self::new(ServerRegistry::default())
    }
}
