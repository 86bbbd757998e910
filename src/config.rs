use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub base_url: String,
    pub default_model: String,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub eviction_delay_ms: u64,
    pub progress_every: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234/v1".to_string(),
            default_model: "local-model".to_string(),
            max_tokens: 2048,
            timeout_ms: 120_000,
            max_timeout_ms: 600_000,
            eviction_delay_ms: 30_000,
            progress_every: 50,
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env_string("LMRELAY_BASE_URL").unwrap_or(defaults.base_url),
            default_model: env_string("LMRELAY_DEFAULT_MODEL").unwrap_or(defaults.default_model),
            max_tokens: env_parse("LMRELAY_MAX_TOKENS")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.max_tokens),
            timeout_ms: env_parse("LMRELAY_TIMEOUT_MS")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.timeout_ms),
            max_timeout_ms: env_parse("LMRELAY_MAX_TIMEOUT_MS")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.max_timeout_ms),
            eviction_delay_ms: env_parse("LMRELAY_EVICTION_DELAY_MS")
                .unwrap_or(defaults.eviction_delay_ms),
            progress_every: env_parse("LMRELAY_PROGRESS_EVERY")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.progress_every),
        }
    }

    pub fn eviction_delay(&self) -> Duration {
        Duration::from_millis(self.eviction_delay_ms)
    }

    /// Token budget for a call: the requested value bounded by the configured
    /// ceiling, or the ceiling itself when nothing was requested.
    pub fn bounded_max_tokens(&self, requested: Option<u32>) -> u32 {
        requested
            .filter(|v| *v > 0)
            .map(|v| v.min(self.max_tokens))
            .unwrap_or(self.max_tokens)
    }

    pub fn bounded_timeout_ms(&self, requested: Option<u64>) -> u64 {
        let ceiling = self.max_timeout_ms.max(1);
        requested
            .filter(|v| *v > 0)
            .unwrap_or(self.timeout_ms)
            .min(ceiling)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}
