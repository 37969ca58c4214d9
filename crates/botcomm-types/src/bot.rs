use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness state of a registered bot.
///
/// - Active: receives broadcasts and direct messages
/// - Inactive: missed the liveness timeout; skipped by the router until it
///   heartbeats or re-registers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    #[default]
    Active,
    Inactive,
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotStatus::Active => write!(f, "active"),
            BotStatus::Inactive => write!(f, "inactive"),
        }
    }
}

impl FromStr for BotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(BotStatus::Active),
            "inactive" => Ok(BotStatus::Inactive),
            other => Err(format!("invalid bot status: '{other}'")),
        }
    }
}

/// Capability tags a bot can declare at registration.
///
/// The set is closed; adding a tag is a protocol version change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Search,
    Monitoring,
    Nlp,
    Discovery,
    Security,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Search,
        Capability::Monitoring,
        Capability::Nlp,
        Capability::Discovery,
        Capability::Security,
    ];

    /// Derive a capability set from a bot's exposed feature flags.
    pub fn probe(flags: &CapabilityFlags) -> BTreeSet<Capability> {
        let mut caps = BTreeSet::new();
        if flags.search {
            caps.insert(Capability::Search);
        }
        if flags.monitoring {
            caps.insert(Capability::Monitoring);
        }
        if flags.nlp {
            caps.insert(Capability::Nlp);
        }
        if flags.discovery {
            caps.insert(Capability::Discovery);
        }
        if flags.security {
            caps.insert(Capability::Security);
        }
        caps
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Search => write!(f, "search"),
            Capability::Monitoring => write!(f, "monitoring"),
            Capability::Nlp => write!(f, "nlp"),
            Capability::Discovery => write!(f, "discovery"),
            Capability::Security => write!(f, "security"),
        }
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "search" => Ok(Capability::Search),
            "monitoring" => Ok(Capability::Monitoring),
            "nlp" => Ok(Capability::Nlp),
            "discovery" => Ok(Capability::Discovery),
            "security" => Ok(Capability::Security),
            other => Err(format!("invalid capability: '{other}'")),
        }
    }
}

/// Feature flags a participant exposes, used by [`Capability::probe`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityFlags {
    pub search: bool,
    pub monitoring: bool,
    pub nlp: bool,
    pub discovery: bool,
    pub security: bool,
}

/// Registry record for one participant.
///
/// Created on registration, updated in place by heartbeats and deliveries,
/// never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotRegistration {
    /// Routing key.
    pub id: String,
    pub capabilities: BTreeSet<Capability>,
    pub status: BotStatus,
    /// Last liveness signal. Registration counts as one.
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    /// Successful deliveries to this bot.
    pub message_count: u64,
    /// Failed deliveries to this bot.
    pub error_count: u64,
}

impl BotRegistration {
    pub fn new(id: impl Into<String>, capabilities: BTreeSet<Capability>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            capabilities,
            status: BotStatus::Active,
            last_heartbeat: now,
            registered_at: now,
            message_count: 0,
            error_count: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == BotStatus::Active
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_status_display_and_parse() {
        assert_eq!(BotStatus::Inactive.to_string(), "inactive");
        assert_eq!("ACTIVE".parse::<BotStatus>().unwrap(), BotStatus::Active);
        assert!("sleeping".parse::<BotStatus>().is_err());
        assert_eq!(BotStatus::default(), BotStatus::Active);
    }

    #[test]
    fn test_probe_collects_enabled_flags() {
        let flags = CapabilityFlags {
            search: true,
            security: true,
            ..Default::default()
        };
        let caps = Capability::probe(&flags);
        assert_eq!(
            caps.into_iter().collect::<Vec<_>>(),
            vec![Capability::Search, Capability::Security]
        );
    }

    #[test]
    fn test_probe_no_flags_is_empty() {
        assert!(Capability::probe(&CapabilityFlags::default()).is_empty());
    }

    #[test]
    fn test_capability_flags_deserialize_partial() {
        let flags: CapabilityFlags = serde_json::from_str(r#"{"nlp": true}"#).unwrap();
        assert!(flags.nlp);
        assert!(!flags.search);
    }

    #[test]
    fn test_new_registration_is_active_with_zero_counters() {
        let now = Utc::now();
        let reg = BotRegistration::new("search-bot", BTreeSet::from([Capability::Search]), now);
        assert!(reg.is_active());
        assert!(reg.has_capability(Capability::Search));
        assert!(!reg.has_capability(Capability::Nlp));
        assert_eq!(reg.message_count, 0);
        assert_eq!(reg.error_count, 0);
        assert_eq!(reg.last_heartbeat, now);
    }

    #[test]
    fn test_registration_serializes_camel_case() {
        let reg = BotRegistration::new("a", BTreeSet::from([Capability::Nlp]), Utc::now());
        let json = serde_json::to_string(&reg).unwrap();
        assert!(json.contains("\"lastHeartbeat\""));
        assert!(json.contains("\"messageCount\":0"));
        assert!(json.contains("\"capabilities\":[\"nlp\"]"));
        assert!(json.contains("\"status\":\"active\""));
    }
}
