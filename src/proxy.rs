use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::errors::{AppError, FetchError};

/// Consecutive failures before an entry is rested.
const COOLING_THRESHOLD: u32 = 3;
/// Consecutive failures before an entry is banned.
const BAN_THRESHOLD: u32 = 10;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyHealth {
    Healthy,
    CoolingDown,
    Banned,
}

/// One egress proxy and its health accounting.
#[derive(Debug, Clone)]
pub struct ProxyEntry {
    pub address: String,
    pub health: ProxyHealth,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<Instant>,
}

/// Handle returned by [`ProxyPool::acquire`]; feed it back via
/// `report_success` / `report_failure`.
#[derive(Debug, Clone)]
pub struct ProxyLease {
    index: usize,
    pub address: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ProxyStats {
    pub total: usize,
    pub healthy: usize,
    pub cooling_down: usize,
    pub banned: usize,
}

/// Shared proxy pool.
///
/// Transitions: healthy → cooling_down (3 consecutive failures) → banned
/// (10) → healthy again once the cooldown window has passed since the
/// last failure. When every entry is unusable, `acquire` returns `None`
/// and callers fall back to direct egress instead of blocking.
pub struct ProxyPool {
    entries: Mutex<Vec<ProxyEntry>>,
    cooldown: Duration,
}

impl ProxyPool {
    pub fn new(addresses: &[String], cooldown: Duration) -> Self {
        let entries = addresses
            .iter()
            .map(|addr| ProxyEntry {
                address: format_proxy_address(addr),
                health: ProxyHealth::Healthy,
                consecutive_failures: 0,
                last_failure_at: None,
            })
            .collect();
        Self {
            entries: Mutex::new(entries),
            cooldown,
        }
    }

    /// A pool that never hands out a proxy (USE_PROXY=false).
    pub fn disabled() -> Self {
        Self::new(&[], Duration::from_secs(300))
    }

    /// Picks uniformly among healthy entries. With no healthy entry,
    /// entries whose last failure is older than the cooldown window are
    /// reset to healthy first; if nothing remains usable the caller goes
    /// direct.
    pub fn acquire(&self) -> Option<ProxyLease> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.is_empty() {
            return None;
        }

        let mut healthy: Vec<usize> = healthy_indices(&entries);
        if healthy.is_empty() {
            let now = Instant::now();
            for entry in entries.iter_mut() {
                let rested = entry
                    .last_failure_at
                    .map(|at| now.duration_since(at) >= self.cooldown)
                    .unwrap_or(true);
                if rested {
                    entry.health = ProxyHealth::Healthy;
                    entry.consecutive_failures = 0;
                }
            }
            healthy = healthy_indices(&entries);
        }

        if healthy.is_empty() {
            return None;
        }
        let pick = healthy[rand::rng().random_range(0..healthy.len())];
        Some(ProxyLease {
            index: pick,
            address: entries[pick].address.clone(),
        })
    }

    pub fn report_success(&self, lease: &ProxyLease) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(lease.index) {
            entry.consecutive_failures = 0;
            entry.health = ProxyHealth::Healthy;
        }
    }

    pub fn report_failure(&self, lease: &ProxyLease) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(lease.index) {
            entry.consecutive_failures += 1;
            entry.last_failure_at = Some(Instant::now());
            if entry.consecutive_failures >= BAN_THRESHOLD {
                entry.health = ProxyHealth::Banned;
            } else if entry.consecutive_failures >= COOLING_THRESHOLD {
                entry.health = ProxyHealth::CoolingDown;
            }
        }
    }

    pub fn stats(&self) -> ProxyStats {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut stats = ProxyStats {
            total: entries.len(),
            ..Default::default()
        };
        for entry in entries.iter() {
            match entry.health {
                ProxyHealth::Healthy => stats.healthy += 1,
                ProxyHealth::CoolingDown => stats.cooling_down += 1,
                ProxyHealth::Banned => stats.banned += 1,
            }
        }
        stats
    }
}

fn healthy_indices(entries: &[ProxyEntry]) -> Vec<usize> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.health == ProxyHealth::Healthy)
        .map(|(i, _)| i)
        .collect()
}

fn format_proxy_address(addr: &str) -> String {
    let trimmed = addr.trim();
    if trimmed.starts_with("http://")
        || trimmed.starts_with("https://")
        || trimmed.starts_with("socks5://")
    {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

/// reqwest binds proxies at client-build time, so egress selection means
/// handing adapters a client built for the chosen proxy. Clients are
/// cached per proxy address; cloning a `reqwest::Client` is cheap.
pub struct ClientPool {
    direct: reqwest::Client,
    per_proxy: Mutex<HashMap<String, reqwest::Client>>,
    timeout: Duration,
}

impl ClientPool {
    pub fn new(timeout: Duration) -> Result<Self, AppError> {
        let direct = build_client(timeout, None)
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            direct,
            per_proxy: Mutex::new(HashMap::new()),
            timeout,
        })
    }

    /// Client for the leased proxy, or the direct-egress client.
    pub fn client_for(&self, lease: Option<&ProxyLease>) -> Result<reqwest::Client, FetchError> {
        let Some(lease) = lease else {
            return Ok(self.direct.clone());
        };
        let mut cached = self.per_proxy.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = cached.get(&lease.address) {
            return Ok(client.clone());
        }
        let client = build_client(self.timeout, Some(&lease.address))
            .map_err(|e| FetchError::Network(format!("proxy client build: {}", e)))?;
        cached.insert(lease.address.clone(), client.clone());
        Ok(client)
    }
}

fn build_client(timeout: Duration, proxy: Option<&str>) -> reqwest::Result<reqwest::Client> {
    let ua = USER_AGENTS[rand::rng().random_range(0..USER_AGENTS.len())];
    let mut builder = reqwest::Client::builder().timeout(timeout).user_agent(ua);
    if let Some(addr) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(addr)?);
    }
    builder.build()
}
