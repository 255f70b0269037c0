use std::collections::HashMap;
use std::time::Duration;

use crate::models::SourceKind;

/// Runtime configuration, loaded once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    /// Optional: when absent the run is in-memory only (no identity index
    /// persistence, no score history).
    pub database_url: Option<String>,
    /// Rows per enrichment batch.
    pub batch_size: usize,
    /// Upper bound on concurrently enriched leads.
    pub max_workers: usize,
    pub use_proxy: bool,
    /// Ordered egress proxy addresses, `host:port` or full URLs.
    pub proxy_list: Vec<String>,
    pub retry_attempts: u32,
    /// Base backoff delay between retry attempts.
    pub retry_delay: Duration,
    pub cache_ttl: Duration,
    /// Steady-state request budget per source, overridable per source.
    pub max_requests_per_minute: u32,
    pub source_rpm_overrides: HashMap<String, u32>,
    pub fssp_base_url: String,
    pub fedresurs_base_url: String,
    pub rosreestr_base_url: String,
    pub court_base_url: String,
    pub nalog_base_url: String,
    /// Per-call timeout inside a source adapter.
    pub source_timeout: Duration,
    /// Wall-clock deadline for one lead's whole enrichment fan-out.
    pub lead_deadline: Duration,
    pub high_debt_threshold: f64,
    pub min_debt_amount: f64,
    /// Weight file for the optional model stage; absent = rule-only scoring.
    pub ml_model_path: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = match std::env::var("DATABASE_URL") {
            Ok(url) if url.trim().is_empty() => None,
            Ok(url) => {
                if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                    anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                }
                Some(url)
            }
            Err(_) => None,
        };

        let use_proxy = env_flag("USE_PROXY", false)?;
        let proxy_list: Vec<String> = std::env::var("PROXY_LIST")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if use_proxy && proxy_list.is_empty() {
            anyhow::bail!("USE_PROXY=true but PROXY_LIST is empty");
        }

        let mut source_rpm_overrides = HashMap::new();
        for source in ["FSSP", "FEDRESURS", "ROSREESTR", "COURT", "NALOG"] {
            if let Ok(raw) = std::env::var(format!("{}_MAX_RPM", source)) {
                let rpm: u32 = raw.parse().map_err(|_| {
                    anyhow::anyhow!("{}_MAX_RPM must be a positive integer", source)
                })?;
                source_rpm_overrides.insert(source.to_lowercase(), rpm);
            }
        }

        let config = Self {
            database_url,
            batch_size: env_parse("BATCH_SIZE", 10_000)?,
            max_workers: env_parse("MAX_WORKERS", 40)?,
            use_proxy,
            proxy_list,
            retry_attempts: env_parse("RETRY_ATTEMPTS", 3)?,
            retry_delay: Duration::from_secs_f64(env_parse("RETRY_DELAY", 1.0)?),
            cache_ttl: Duration::from_secs(env_parse::<u64>("CACHE_TTL_HOURS", 24)? * 3600),
            max_requests_per_minute: env_parse("MAX_REQUESTS_PER_MINUTE", 60)?,
            source_rpm_overrides,
            fssp_base_url: env_url("FSSP_BASE_URL", "https://api-ip.fssprus.ru/api/v1.0")?,
            fedresurs_base_url: env_url("FEDRESURS_BASE_URL", "https://fedresurs.ru")?,
            rosreestr_base_url: env_url("ROSREESTR_BASE_URL", "https://rosreestr.gov.ru/api")?,
            court_base_url: env_url("COURT_BASE_URL", "https://kad.arbitr.ru")?,
            nalog_base_url: env_url("NALOG_BASE_URL", "https://service.nalog.ru")?,
            source_timeout: Duration::from_secs(env_parse("SOURCE_TIMEOUT_SECS", 30)?),
            lead_deadline: Duration::from_secs(env_parse("LEAD_DEADLINE_SECS", 60)?),
            high_debt_threshold: env_parse("HIGH_DEBT_THRESHOLD", 250_000.0)?,
            min_debt_amount: env_parse("MIN_DEBT_AMOUNT", 100_000.0)?,
            ml_model_path: std::env::var("ML_MODEL_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        };

        if config.batch_size == 0 {
            anyhow::bail!("BATCH_SIZE must be at least 1");
        }
        if config.max_workers == 0 {
            anyhow::bail!("MAX_WORKERS must be at least 1");
        }
        if config.retry_attempts == 0 {
            anyhow::bail!("RETRY_ATTEMPTS must be at least 1");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        match &config.database_url {
            Some(url) => tracing::debug!("Database URL: {}...", &url[..20.min(url.len())]),
            None => tracing::warn!("⚠️ DATABASE_URL not set, running without persistence"),
        }
        tracing::debug!(
            "Batch size: {}, workers: {}, retries: {}",
            config.batch_size,
            config.max_workers,
            config.retry_attempts
        );
        if config.use_proxy {
            tracing::info!("Proxy pool configured with {} entries", config.proxy_list.len());
        }
        if let Some(ref path) = config.ml_model_path {
            tracing::info!("ML model stage enabled: {}", path);
        }

        Ok(config)
    }

    /// Requests-per-minute budget for one source, honoring per-source
    /// overrides.
    pub fn rpm_for(&self, source: &str) -> u32 {
        self.source_rpm_overrides
            .get(source)
            .copied()
            .unwrap_or(self.max_requests_per_minute)
    }

    /// Base URL for one registry.
    pub fn base_url_for(&self, source: SourceKind) -> &str {
        match source {
            SourceKind::Fssp => &self.fssp_base_url,
            SourceKind::Fedresurs => &self.fedresurs_base_url,
            SourceKind::Rosreestr => &self.rosreestr_base_url,
            SourceKind::Court => &self.court_base_url,
            SourceKind::Nalog => &self.nalog_base_url,
        }
    }
}

impl Default for Config {
    /// Built-in defaults, identical to what `from_env` falls back to
    /// when a variable is unset. Used by tests that need to point base
    /// URLs at a local mock server.
    fn default() -> Self {
        Self {
            database_url: None,
            batch_size: 10_000,
            max_workers: 40,
            use_proxy: false,
            proxy_list: Vec::new(),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            cache_ttl: Duration::from_secs(24 * 3600),
            max_requests_per_minute: 60,
            source_rpm_overrides: HashMap::new(),
            fssp_base_url: "https://api-ip.fssprus.ru/api/v1.0".to_string(),
            fedresurs_base_url: "https://fedresurs.ru".to_string(),
            rosreestr_base_url: "https://rosreestr.gov.ru/api".to_string(),
            court_base_url: "https://kad.arbitr.ru".to_string(),
            nalog_base_url: "https://service.nalog.ru".to_string(),
            source_timeout: Duration::from_secs(30),
            lead_deadline: Duration::from_secs(60),
            high_debt_threshold: 250_000.0,
            min_debt_amount: 100_000.0,
            ml_model_path: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

fn env_flag(name: &str, default: bool) -> anyhow::Result<bool> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            other => Err(anyhow::anyhow!("{} must be a boolean, got {:?}", name, other)),
        },
        Err(_) => Ok(default),
    }
}

fn env_url(name: &str, default: &str) -> anyhow::Result<String> {
    let url = std::env::var(name).unwrap_or_else(|_| default.to_string());
    if url.trim().is_empty() {
        anyhow::bail!("{} cannot be empty", name);
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(url)
}
