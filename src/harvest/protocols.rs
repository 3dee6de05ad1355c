//! Protocol catalog: the closed set of config schemes the engine recognizes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default lower bound on configs kept per protocol
pub const DEFAULT_MIN_CONFIGS: u64 = 7000;

/// Default upper bound on configs kept per protocol
pub const DEFAULT_MAX_CONFIGS: u64 = 7000;

/// Canonical config scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "vless://")]
    Vless,
    #[serde(rename = "trojan://")]
    Trojan,
    #[serde(rename = "tuic://")]
    Tuic,
    #[serde(rename = "hy2://")]
    Hysteria2,
}

impl Protocol {
    pub const ALL: [Protocol; 4] = [
        Protocol::Vless,
        Protocol::Trojan,
        Protocol::Tuic,
        Protocol::Hysteria2,
    ];

    /// Canonical prefix, including the `://` separator
    pub fn prefix(&self) -> &'static str {
        match self {
            Protocol::Vless => "vless://",
            Protocol::Trojan => "trojan://",
            Protocol::Tuic => "tuic://",
            Protocol::Hysteria2 => "hy2://",
        }
    }

    /// Alternative prefixes that are rewritten to [`Protocol::prefix`]
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Protocol::Hysteria2 => &["hysteria2://"],
            _ => &[],
        }
    }

    /// Scheme name without the separator, e.g. `vless`
    pub fn scheme(&self) -> &'static str {
        let prefix = self.prefix();
        &prefix[..prefix.len() - 3]
    }

    /// Resolve the protocol a config string starts with (canonical form only)
    pub fn from_config(config: &str) -> Option<Protocol> {
        Self::ALL.into_iter().find(|p| config.starts_with(p.prefix()))
    }

    fn default_priority(&self) -> u8 {
        match self {
            Protocol::Vless | Protocol::Trojan => 1,
            Protocol::Tuic | Protocol::Hysteria2 => 2,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scheme())
    }
}

/// Per-protocol settings and quantity bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolSpec {
    pub protocol: Protocol,
    /// Tie-break weight, lower sorts first
    pub priority: u8,
    pub enabled: bool,
    pub min_configs: u64,
    pub max_configs: u64,
    /// Whether the adaptive step may raise `max_configs`
    pub flexible_max: bool,
}

impl ProtocolSpec {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            priority: protocol.default_priority(),
            enabled: true,
            min_configs: DEFAULT_MIN_CONFIGS,
            max_configs: DEFAULT_MAX_CONFIGS,
            flexible_max: true,
        }
    }

    pub fn with_limits(mut self, min_configs: u64, max_configs: u64) -> Self {
        self.min_configs = min_configs;
        self.max_configs = max_configs;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A literal the scanner looks for, and the protocol it stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixMatch {
    pub protocol: Protocol,
    /// Byte length of the matched literal
    pub len: usize,
    /// Matched an alias rather than the canonical prefix
    pub is_alias: bool,
}

/// Registry of supported protocols.
///
/// Shared read-only by every fetch cycle; only the adaptive-limit step
/// mutates it, between cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolCatalog {
    specs: Vec<ProtocolSpec>,
}

impl Default for ProtocolCatalog {
    fn default() -> Self {
        Self::new(Protocol::ALL.into_iter().map(ProtocolSpec::new).collect())
    }
}

impl ProtocolCatalog {
    pub fn new(specs: Vec<ProtocolSpec>) -> Self {
        Self { specs }
    }

    pub fn specs(&self) -> &[ProtocolSpec] {
        &self.specs
    }

    pub fn spec(&self, protocol: Protocol) -> Option<&ProtocolSpec> {
        self.specs.iter().find(|s| s.protocol == protocol)
    }

    pub fn spec_mut(&mut self, protocol: Protocol) -> Option<&mut ProtocolSpec> {
        self.specs.iter_mut().find(|s| s.protocol == protocol)
    }

    pub fn is_enabled(&self, protocol: Protocol) -> bool {
        self.spec(protocol).is_some_and(|s| s.enabled)
    }

    /// Enabled protocols, used as the diversity denominator
    pub fn total_protocols(&self) -> usize {
        self.specs.iter().filter(|s| s.enabled).count()
    }

    /// Return the prefix that starts at byte offset `pos` of `text`, if any
    pub fn prefix_at(&self, text: &str, pos: usize) -> Option<PrefixMatch> {
        let rest = text.as_bytes().get(pos..)?;
        for spec in self.specs.iter().filter(|s| s.enabled) {
            let canonical = spec.protocol.prefix();
            if rest.starts_with(canonical.as_bytes()) {
                return Some(PrefixMatch {
                    protocol: spec.protocol,
                    len: canonical.len(),
                    is_alias: false,
                });
            }
            for alias in spec.protocol.aliases() {
                if rest.starts_with(alias.as_bytes()) {
                    return Some(PrefixMatch {
                        protocol: spec.protocol,
                        len: alias.len(),
                        is_alias: true,
                    });
                }
            }
        }
        None
    }

    /// Whether any recognized prefix (canonical or alias) occurs in `text`
    pub fn contains_prefix(&self, text: &str) -> bool {
        self.specs.iter().filter(|s| s.enabled).any(|s| {
            text.contains(s.protocol.prefix())
                || s.protocol.aliases().iter().any(|a| text.contains(a))
        })
    }
}
