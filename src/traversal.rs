//! Network traversal candidate selection
//!
//! `TraversalConfig` holds the static, prioritised server list and turns it
//! into an immutable `TraversalCandidateSet` for each connection attempt.
//! Building a set never touches the network.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::TraversalSettings;
use crate::errors::{PeerCamError, Result};

/// Server protocol derived from the URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerProtocol {
    Stun,
    Stuns,
    Turn,
    Turns,
}

impl ServerProtocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            ServerProtocol::Stun => "stun",
            ServerProtocol::Stuns => "stuns",
            ServerProtocol::Turn => "turn",
            ServerProtocol::Turns => "turns",
        }
    }

    pub fn is_relay(&self) -> bool {
        !matches!(self, ServerProtocol::Stun | ServerProtocol::Stuns)
    }
}

/// Transport a relay is reached over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayTransport {
    Udp,
    Tcp,
}

/// Relay credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub credential: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            credential: credential.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("credential", &"<redacted>")
            .finish()
    }
}

/// One traversal server descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalServer {
    /// `host:port`
    pub address: String,
    pub protocol: ServerProtocol,
    pub transport: Option<RelayTransport>,
    pub credentials: Option<Credentials>,
}

impl TraversalServer {
    pub fn stun(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            protocol: ServerProtocol::Stun,
            transport: None,
            credentials: None,
        }
    }

    pub fn turn(
        address: impl Into<String>,
        transport: Option<RelayTransport>,
        credentials: Credentials,
    ) -> Self {
        Self {
            address: address.into(),
            protocol: ServerProtocol::Turn,
            transport,
            credentials: Some(credentials),
        }
    }

    /// Parse a `stun:`, `stuns:`, `turn:` or `turns:` URL
    pub fn parse(url: &str, credentials: Option<Credentials>) -> Result<Self> {
        let (scheme, rest) = url
            .split_once(':')
            .ok_or_else(|| PeerCamError::InvalidConfig(format!("missing scheme in '{}'", url)))?;

        let protocol = match scheme.to_ascii_lowercase().as_str() {
            "stun" => ServerProtocol::Stun,
            "stuns" => ServerProtocol::Stuns,
            "turn" => ServerProtocol::Turn,
            "turns" => ServerProtocol::Turns,
            other => {
                return Err(PeerCamError::InvalidConfig(format!(
                    "unsupported traversal scheme '{}' in '{}'",
                    other, url
                )))
            }
        };

        let (address, query) = match rest.split_once('?') {
            Some((address, query)) => (address, Some(query)),
            None => (rest, None),
        };
        let address = address.trim_start_matches("//");

        if address.is_empty() || address.contains(char::is_whitespace) {
            return Err(PeerCamError::InvalidConfig(format!(
                "invalid server address in '{}'",
                url
            )));
        }

        let mut transport = None;
        if let Some(query) = query {
            for pair in query.split('&') {
                match pair.split_once('=') {
                    Some(("transport", "udp")) => transport = Some(RelayTransport::Udp),
                    Some(("transport", "tcp")) => transport = Some(RelayTransport::Tcp),
                    Some(("transport", other)) => {
                        return Err(PeerCamError::InvalidConfig(format!(
                            "unknown relay transport '{}' in '{}'",
                            other, url
                        )))
                    }
                    _ => log::debug!("Ignoring query parameter '{}' in {}", pair, url),
                }
            }
        }

        if protocol.is_relay() && credentials.is_none() {
            return Err(PeerCamError::InvalidConfig(format!(
                "relay server '{}' requires credentials",
                url
            )));
        }

        Ok(Self {
            address: address.to_string(),
            protocol,
            transport,
            credentials: if protocol.is_relay() { credentials } else { None },
        })
    }

    /// Canonical URL form, e.g. `turn:host:443?transport=tcp`
    pub fn url(&self) -> String {
        match self.transport {
            Some(RelayTransport::Tcp) => {
                format!("{}:{}?transport=tcp", self.protocol.scheme(), self.address)
            }
            Some(RelayTransport::Udp) => {
                format!("{}:{}?transport=udp", self.protocol.scheme(), self.address)
            }
            None => format!("{}:{}", self.protocol.scheme(), self.address),
        }
    }

    pub fn is_relay(&self) -> bool {
        self.protocol.is_relay()
    }
}

impl FromStr for TraversalServer {
    type Err = PeerCamError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s, None)
    }
}

/// Which candidates the connection may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportPolicy {
    Any,
    RelayOnly,
}

impl fmt::Display for TransportPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportPolicy::Any => write!(f, "any"),
            TransportPolicy::RelayOnly => write!(f, "relay-only"),
        }
    }
}

/// How the policy is chosen per attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    /// Odd attempts relay-only, even attempts any transport
    #[default]
    Alternate,
    AlwaysRelay,
    AlwaysAny,
}

/// Media bundling hint for transports that honour it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundlePolicy {
    Balanced,
    MaxCompat,
    #[default]
    MaxBundle,
}

/// Immutable traversal configuration for one connection attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraversalCandidateSet {
    servers: Vec<TraversalServer>,
    policy: TransportPolicy,
    attempt: u32,
    candidate_pool_size: u8,
    bundle_policy: BundlePolicy,
}

impl TraversalCandidateSet {
    pub fn servers(&self) -> &[TraversalServer] {
        &self.servers
    }

    pub fn policy(&self) -> TransportPolicy {
        self.policy
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn candidate_pool_size(&self) -> u8 {
        self.candidate_pool_size
    }

    pub fn bundle_policy(&self) -> BundlePolicy {
        self.bundle_policy
    }

    pub fn relay_servers(&self) -> impl Iterator<Item = &TraversalServer> {
        self.servers.iter().filter(|s| s.is_relay())
    }

    pub fn urls(&self) -> Vec<String> {
        self.servers.iter().map(TraversalServer::url).collect()
    }
}

/// Static, prioritised traversal server list
#[derive(Debug, Clone)]
pub struct TraversalConfig {
    discovery: Vec<TraversalServer>,
    relays: Vec<TraversalServer>,
    mode: PolicyMode,
    candidate_pool_size: u8,
    bundle_policy: BundlePolicy,
}

impl TraversalConfig {
    /// Discovery servers are always listed before relays; relays keep the
    /// given order, most reliable first.
    pub fn new(discovery: Vec<TraversalServer>, relays: Vec<TraversalServer>) -> Self {
        Self {
            discovery,
            relays,
            mode: PolicyMode::Alternate,
            candidate_pool_size: 10,
            bundle_policy: BundlePolicy::MaxBundle,
        }
    }

    pub fn from_config(settings: &TraversalSettings) -> Result<Self> {
        let discovery = settings
            .discovery_servers
            .iter()
            .map(|url| url.parse::<TraversalServer>())
            .collect::<Result<Vec<_>>>()?;

        let mut relays = Vec::new();
        for relay in &settings.relay_servers {
            let credentials = Credentials::new(&relay.username, &relay.credential);
            for url in &relay.urls {
                relays.push(TraversalServer::parse(url, Some(credentials.clone()))?);
            }
        }

        if discovery.iter().any(TraversalServer::is_relay) {
            return Err(PeerCamError::InvalidConfig(
                "relay URLs belong in relay_servers".to_string(),
            ));
        }
        if relays.is_empty() && settings.policy_mode == PolicyMode::AlwaysRelay {
            return Err(PeerCamError::InvalidConfig(
                "always_relay requires at least one relay server".to_string(),
            ));
        }

        Ok(Self {
            discovery,
            relays,
            mode: settings.policy_mode,
            candidate_pool_size: settings.candidate_pool_size,
            bundle_policy: settings.bundle_policy,
        })
    }

    pub fn with_mode(mut self, mode: PolicyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> PolicyMode {
        self.mode
    }

    pub fn policy_for(&self, attempt: u32) -> TransportPolicy {
        match self.mode {
            PolicyMode::Alternate if attempt % 2 == 1 => TransportPolicy::RelayOnly,
            PolicyMode::Alternate => TransportPolicy::Any,
            PolicyMode::AlwaysRelay => TransportPolicy::RelayOnly,
            PolicyMode::AlwaysAny => TransportPolicy::Any,
        }
    }

    /// Build the candidate set for `attempt` (0 is the initial connection)
    pub fn build(&self, attempt: u32) -> TraversalCandidateSet {
        let mut policy = self.policy_for(attempt);
        if policy == TransportPolicy::RelayOnly && self.relays.is_empty() {
            log::warn!(
                "Attempt {} wants relay-only but no relays are configured; using any transport",
                attempt
            );
            policy = TransportPolicy::Any;
        }

        let servers = self
            .discovery
            .iter()
            .chain(self.relays.iter())
            .cloned()
            .collect();

        log::debug!("Traversal set for attempt {}: policy {}", attempt, policy);

        TraversalCandidateSet {
            servers,
            policy,
            attempt,
            candidate_pool_size: self.candidate_pool_size,
            bundle_policy: self.bundle_policy,
        }
    }
}

impl Default for TraversalConfig {
    fn default() -> Self {
        // Defaults are valid by construction.
        match Self::from_config(&TraversalSettings::default()) {
            Ok(config) => config,
            Err(e) => {
                log::error!("Default traversal settings rejected: {}", e);
                Self::new(vec![TraversalServer::stun("stun.l.google.com:19302")], vec![])
            }
        }
    }
}
