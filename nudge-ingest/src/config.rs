use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use readable::FetchConfig;
use readable::extract::ExtractConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WorkerConfig {
    pub poll_seconds: u64,
    pub batch_size: i64,
    pub http_connect_timeout: u64,
    pub http_read_timeout: u64,
    pub max_bytes: usize,
    pub user_agent: String,
    pub min_chars: usize,
    pub max_chars: usize,
    pub stale_processing_minutes: i64,
    pub max_attempts: i32,
    pub db_pool_size: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_seconds: 3,
            batch_size: 5,
            http_connect_timeout: 5,
            http_read_timeout: 20,
            max_bytes: 2_000_000,
            user_agent: "NudgeBot/0.1".to_string(),
            min_chars: 600,
            max_chars: 200_000,
            stale_processing_minutes: 15,
            max_attempts: 2,
            db_pool_size: 2,
        }
    }
}

impl WorkerConfig {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file("NUDGE.toml"))
            .merge(Env::prefixed("WORKER_"))
    }

    pub fn config() -> figment::Result<Self> {
        Self::figment().extract()
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            connect_timeout_seconds: self.http_connect_timeout,
            read_timeout_seconds: self.http_read_timeout,
            max_bytes: self.max_bytes,
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn extract_config(&self) -> ExtractConfig {
        ExtractConfig {
            min_chars: self.min_chars,
            max_chars: self.max_chars,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_seconds, 3);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.http_connect_timeout, 5);
        assert_eq!(config.http_read_timeout, 20);
        assert_eq!(config.max_bytes, 2_000_000);
        assert_eq!(config.user_agent, "NudgeBot/0.1");
        assert_eq!(config.stale_processing_minutes, 15);
        assert_eq!(config.max_attempts, 2);
    }

    #[test]
    fn environment_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("WORKER_BATCH_SIZE", "11");
            jail.set_env("WORKER_USER_AGENT", "TestBot/9");

            let config = WorkerConfig::config()?;
            assert_eq!(config.batch_size, 11);
            assert_eq!(config.user_agent, "TestBot/9");
            // Untouched values keep their defaults.
            assert_eq!(config.poll_seconds, 3);
            Ok(())
        });
    }
}
