use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use nudge_db::models::ModelKey;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    pub environment: String,
    /// Fallback identity when no `X-User-Id` header is sent. Dev convenience
    /// only; real deployments put an authenticating proxy in front.
    pub dev_user_id: Uuid,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "dev".to_string(),
            dev_user_id: Uuid::from_u128(1),
        }
    }
}

impl AppConfig {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file("NUDGE.toml"))
            .merge(Env::prefixed("NUDGE_"))
    }

    pub fn config() -> figment::Result<Self> {
        Self::figment().extract()
    }
}

/// Flat tier registry configuration, one block of fields per tier. A tier
/// whose provider stays at `placeholder` (or carries no API key) resolves to
/// the deterministic local generator.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LlmConfig {
    pub default_model_key: String,

    pub strong_provider: String,
    pub strong_model: String,
    pub strong_base_url: Option<String>,
    pub strong_api_key: Option<String>,

    pub mid_provider: String,
    pub mid_model: String,
    pub mid_base_url: Option<String>,
    pub mid_api_key: Option<String>,

    pub budget_provider: String,
    pub budget_model: String,
    pub budget_base_url: Option<String>,
    pub budget_api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_model_key: "mid".to_string(),
            strong_provider: "placeholder".to_string(),
            strong_model: "placeholder".to_string(),
            strong_base_url: None,
            strong_api_key: None,
            mid_provider: "placeholder".to_string(),
            mid_model: "placeholder".to_string(),
            mid_base_url: None,
            mid_api_key: None,
            budget_provider: "placeholder".to_string(),
            budget_model: "placeholder".to_string(),
            budget_base_url: None,
            budget_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TierConfig<'a> {
    pub provider: &'a str,
    pub model: &'a str,
    pub base_url: Option<&'a str>,
    pub api_key: Option<&'a str>,
}

impl LlmConfig {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default())).merge(Env::prefixed("LLM_"))
    }

    pub fn config() -> figment::Result<Self> {
        Self::figment().extract()
    }

    pub fn tier(&self, key: ModelKey) -> TierConfig<'_> {
        match key {
            ModelKey::Strong => TierConfig {
                provider: &self.strong_provider,
                model: &self.strong_model,
                base_url: self.strong_base_url.as_deref(),
                api_key: self.strong_api_key.as_deref(),
            },
            ModelKey::Mid => TierConfig {
                provider: &self.mid_provider,
                model: &self.mid_model,
                base_url: self.mid_base_url.as_deref(),
                api_key: self.mid_api_key.as_deref(),
            },
            ModelKey::Budget => TierConfig {
                provider: &self.budget_provider,
                model: &self.budget_model,
                base_url: self.budget_base_url.as_deref(),
                api_key: self.budget_api_key.as_deref(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.environment, "dev");
        assert_eq!(
            config.dev_user_id.to_string(),
            "00000000-0000-0000-0000-000000000001"
        );
    }

    #[test]
    fn llm_environment_overrides() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("LLM_DEFAULT_MODEL_KEY", "strong");
            jail.set_env("LLM_STRONG_PROVIDER", "openai");
            jail.set_env("LLM_STRONG_MODEL", "gpt-4o-mini");
            jail.set_env("LLM_STRONG_API_KEY", "sk-test");

            let config = LlmConfig::config()?;
            assert_eq!(config.default_model_key, "strong");

            let tier = config.tier(ModelKey::Strong);
            assert_eq!(tier.provider, "openai");
            assert_eq!(tier.model, "gpt-4o-mini");
            assert_eq!(tier.api_key, Some("sk-test"));

            // Untouched tiers keep the placeholder defaults.
            assert_eq!(config.tier(ModelKey::Budget).provider, "placeholder");
            Ok(())
        });
    }
}
