//! Publisher domain registry.
//!
//! Static, ordered list of publisher hostnames loaded once at startup.
//! A small subset is marked as "language-inverted": their native language
//! is English, so a request without a `language` parameter gets an `/en`
//! path prefix instead of being left on the Portuguese default.

use serde::Deserialize;

/// Registry entry for a single publisher hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub hostname: String,
    pub inverted_language: bool,
}

/// Ordered, immutable registry of publisher domains.
///
/// The order matters: the dispatch fallback path walks the registry in
/// declaration order, and the `/random` spill indexes into it modulo its
/// length.
#[derive(Debug, Clone)]
pub struct DomainRegistry {
    domains: Vec<Domain>,
}

/// Config-file shape for the registry (`[domains]` section).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DomainsConfig {
    pub registry: Vec<String>,
    pub inverted: Vec<String>,
}

impl Default for DomainsConfig {
    fn default() -> Self {
        Self {
            registry: default_registry(),
            inverted: default_inverted(),
        }
    }
}

fn default_registry() -> Vec<String> {
    [
        "useuapp.com",
        "appmobile4u.com",
        "melhoresapps.net",
        "guiadoapp.com.br",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_inverted() -> Vec<String> {
    ["useuapp.com", "appmobile4u.com"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl DomainRegistry {
    pub fn new(config: &DomainsConfig) -> Self {
        let domains = config
            .registry
            .iter()
            .map(|hostname| Domain {
                hostname: hostname.clone(),
                inverted_language: config.inverted.iter().any(|d| d == hostname),
            })
            .collect();
        Self { domains }
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Domain> {
        self.domains.get(index)
    }

    pub fn hostnames(&self) -> Vec<String> {
        self.domains.iter().map(|d| d.hostname.clone()).collect()
    }

    pub fn is_inverted(&self, hostname: &str) -> bool {
        self.domains
            .iter()
            .any(|d| d.hostname == hostname && d.inverted_language)
    }
}
