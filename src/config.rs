use crate::model::{ChannelKey, Ms};

/// Exponential backoff for delivery retries: `base * 2^(n-1)` capped at
/// `max_delay_ms`, up to `max_attempts` attempts total.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base_ms: Ms,
    pub max_delay_ms: Ms,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            max_delay_ms: 300_000,
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for(&self, attempt_count: u32) -> Ms {
        let shift = attempt_count.saturating_sub(1).min(20);
        self.base_ms
            .saturating_mul(1_i64 << shift)
            .min(self.max_delay_ms)
    }

    pub fn next_attempt_at(&self, now: Ms, attempt_count: u32) -> Ms {
        now + self.delay_for(attempt_count)
    }
}

/// Engine configuration. Passed explicitly to `Engine::new` — the core keeps
/// no global/ambient configuration state.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Channels that get a delivery row per reservation status change.
    pub channels: Vec<ChannelKey>,
    pub backoff: BackoffPolicy,
    /// Per-attempt send timeout; exceeding it counts as a failed attempt.
    pub attempt_timeout_ms: Ms,
    pub outbox_poll_ms: Ms,
    pub outbox_batch: usize,
    /// How long after its window ends an active reservation may linger
    /// before the sweep expires it.
    pub expiry_grace_ms: Ms,
    pub sweep_interval_ms: Ms,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            channels: vec![ChannelKey::Log],
            backoff: BackoffPolicy::default(),
            attempt_timeout_ms: 10_000,
            outbox_poll_ms: 500,
            outbox_batch: 32,
            expiry_grace_ms: 3_600_000,
            sweep_interval_ms: 60_000,
        }
    }
}

/// Binary-level configuration, loaded from `RESERVA_*` environment variables.
#[derive(Debug)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: String,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub core: CoreConfig,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut core = CoreConfig::default();
        if let Ok(raw) = std::env::var("RESERVA_CHANNELS") {
            let channels: Vec<ChannelKey> = raw
                .split(',')
                .filter_map(|s| ChannelKey::parse(s.trim()))
                .collect();
            if !channels.is_empty() {
                core.channels = channels;
            }
        }
        if let Some(n) = env_parse::<u32>("RESERVA_MAX_ATTEMPTS") {
            core.backoff.max_attempts = n;
        }
        if let Some(ms) = env_parse::<Ms>("RESERVA_BACKOFF_BASE_MS") {
            core.backoff.base_ms = ms;
        }
        if let Some(ms) = env_parse::<Ms>("RESERVA_EXPIRY_GRACE_MS") {
            core.expiry_grace_ms = ms;
        }

        Self {
            bind: std::env::var("RESERVA_BIND").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_parse("RESERVA_PORT").unwrap_or(8080),
            data_dir: std::env::var("RESERVA_DATA_DIR").unwrap_or_else(|_| "./data".into()),
            metrics_port: env_parse("RESERVA_METRICS_PORT"),
            compact_threshold: env_parse("RESERVA_COMPACT_THRESHOLD").unwrap_or(1_000),
            core,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_cap() {
        let policy = BackoffPolicy {
            base_ms: 1_000,
            max_delay_ms: 8_000,
            max_attempts: 10,
        };
        assert_eq!(policy.delay_for(1), 1_000);
        assert_eq!(policy.delay_for(2), 2_000);
        assert_eq!(policy.delay_for(3), 4_000);
        assert_eq!(policy.delay_for(4), 8_000);
        assert_eq!(policy.delay_for(5), 8_000); // capped
        assert_eq!(policy.next_attempt_at(100, 2), 2_100);
    }

    #[test]
    fn backoff_huge_attempt_count_saturates() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(u32::MAX), policy.max_delay_ms);
    }
}
