//! Outbound proxy rotation.
//!
//! Proxy files hold one `protocol@host:port` entry per line; blank lines and
//! lines starting with `#` are skipped.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fmt;
use std::path::Path;

/// A single proxy endpoint used for both HTTP and HTTPS traffic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyEndpoint {
    pub protocol: String,
    pub address: String,
}

impl ProxyEndpoint {
    /// Parse a `protocol@host:port` line.
    pub fn parse(line: &str) -> Option<Self> {
        let (protocol, address) = line.trim().split_once('@')?;
        let protocol = protocol.trim().to_ascii_lowercase();
        let address = address.trim();
        if protocol.is_empty() || address.is_empty() {
            return None;
        }
        Some(Self {
            protocol,
            address: address.to_string(),
        })
    }

    pub fn url(&self) -> String {
        format!("{}://{}", self.protocol, self.address)
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Supplies the proxy for the next outbound request.
pub trait ProxyProvider: Send {
    fn next_proxy(&mut self) -> Option<ProxyEndpoint>;
}

/// Never proxies.
#[derive(Debug, Default)]
pub struct DirectConnection;

impl ProxyProvider for DirectConnection {
    fn next_proxy(&mut self) -> Option<ProxyEndpoint> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMode {
    RoundRobin,
    Random,
}

impl ProxyMode {
    pub fn from_config(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("RANDOM") {
            Self::Random
        } else {
            Self::RoundRobin
        }
    }
}

/// A fixed list of proxies handed out round-robin or at random.
pub struct ProxyPool {
    proxies: Vec<ProxyEndpoint>,
    mode: ProxyMode,
    cursor: usize,
    rng: StdRng,
}

impl ProxyPool {
    pub fn new(proxies: Vec<ProxyEndpoint>, mode: ProxyMode, rng: StdRng) -> Self {
        Self {
            proxies,
            mode,
            cursor: 0,
            rng,
        }
    }

    /// Parse a proxy list, skipping comments and malformed lines.
    pub fn parse(text: &str, mode: ProxyMode, rng: StdRng) -> Self {
        let mut proxies = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match ProxyEndpoint::parse(line) {
                Some(p) => proxies.push(p),
                None => tracing::warn!("ignoring malformed proxy entry on line {}: {line}", lineno + 1),
            }
        }
        Self::new(proxies, mode, rng)
    }

    pub fn from_file(path: &Path, mode: ProxyMode) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read proxy file: {}", path.display()))?;
        let pool = Self::parse(&text, mode, StdRng::from_entropy());
        tracing::info!("loaded {} proxies from {}", pool.len(), path.display());
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

impl ProxyProvider for ProxyPool {
    fn next_proxy(&mut self) -> Option<ProxyEndpoint> {
        if self.proxies.is_empty() {
            return None;
        }
        match self.mode {
            ProxyMode::Random => self.proxies.choose(&mut self.rng).cloned(),
            ProxyMode::RoundRobin => {
                let proxy = self.proxies[self.cursor].clone();
                self.cursor = (self.cursor + 1) % self.proxies.len();
                Some(proxy)
            }
        }
    }
}
