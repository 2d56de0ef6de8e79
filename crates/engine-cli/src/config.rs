//! Configuration file management for the engine CLI.
//!
//! Provides a TOML-based config file at `~/.config/engine/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use engine_core::budget::BudgetConfig;
use engine_core::cost::UnknownPricingMode;
use engine_core::retry::RetryPolicy;
use engine_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub budget: BudgetSection,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct DatabaseSection {
    pub url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ProviderSection {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub default_model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct BudgetSection {
    pub max_run_budget: Option<f64>,
    pub max_session_budget: Option<f64>,
    pub unknown_pricing_mode: Option<String>,
    pub fail_on_unseeded_pricing: Option<bool>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the engine config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/engine` or `~/.config/engine`.
/// We intentionally ignore the platform-specific `dirs::config_dir()`
/// (which returns `~/Library/Application Support` on macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("engine");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("engine")
}

/// Return the path to the engine config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct EngineConfig {
    pub db_config: DbConfig,
    pub provider_base_url: String,
    pub provider_api_key: Option<String>,
    pub default_model: String,
    pub budget_config: BudgetConfig,
    pub unknown_pricing_mode: UnknownPricingMode,
    pub fail_on_unseeded_pricing: bool,
    pub retry_policy: RetryPolicy,
    pub concurrency_limit: usize,
}

fn parse_unknown_pricing_mode(value: &str) -> Result<UnknownPricingMode> {
    match value {
        "warn" => Ok(UnknownPricingMode::Warn),
        "block" => Ok(UnknownPricingMode::Block),
        other => anyhow::bail!("COST_UNKNOWN_PRICING_MODE must be 'warn' or 'block', got {other:?}"),
    }
}

fn parse_bool_env(value: &str) -> Result<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => anyhow::bail!("expected 'true' or 'false', got {other:?}"),
    }
}

impl EngineConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `ENGINE_DATABASE_URL` env > `config_file.database.url` > `DbConfig::DEFAULT_URL`
    /// - Provider base URL / key / default model: env vars > config file > defaults
    /// - Budget caps: `MAX_RUN_BUDGET` / `MAX_SESSION_BUDGET` env > config file > unset (unlimited)
    /// - Pricing mode: `COST_UNKNOWN_PRICING_MODE` env > config file > `warn`
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var("ENGINE_DATABASE_URL") {
            url
        } else if let Some(url) = file_config.as_ref().and_then(|c| c.database.url.clone()) {
            url
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };
        let db_config = DbConfig::new(db_url);

        let provider_base_url = std::env::var("PROVIDER_BASE_URL")
            .ok()
            .or_else(|| file_config.as_ref().and_then(|c| c.provider.base_url.clone()))
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        let provider_api_key = std::env::var("PROVIDER_API_KEY")
            .ok()
            .or_else(|| file_config.as_ref().and_then(|c| c.provider.api_key.clone()));

        let default_model = std::env::var("DEFAULT_MODEL")
            .ok()
            .or_else(|| file_config.as_ref().and_then(|c| c.provider.default_model.clone()))
            .unwrap_or_else(|| "gpt-4o-mini".to_string());

        let max_run_budget = match std::env::var("MAX_RUN_BUDGET") {
            Ok(v) => Some(v.parse::<f64>().context("MAX_RUN_BUDGET must be a number")?),
            Err(_) => file_config.as_ref().and_then(|c| c.budget.max_run_budget),
        };
        let max_session_budget = match std::env::var("MAX_SESSION_BUDGET") {
            Ok(v) => Some(v.parse::<f64>().context("MAX_SESSION_BUDGET must be a number")?),
            Err(_) => file_config.as_ref().and_then(|c| c.budget.max_session_budget),
        };

        let unknown_pricing_mode = match std::env::var("COST_UNKNOWN_PRICING_MODE") {
            Ok(v) => parse_unknown_pricing_mode(&v)?,
            Err(_) => match file_config.as_ref().and_then(|c| c.budget.unknown_pricing_mode.clone()) {
                Some(v) => parse_unknown_pricing_mode(&v)?,
                None => UnknownPricingMode::Warn,
            },
        };

        let fail_on_unseeded_pricing = match std::env::var("COST_FAIL_ON_UNSEEDED_PRICING") {
            Ok(v) => parse_bool_env(&v)?,
            Err(_) => file_config
                .as_ref()
                .and_then(|c| c.budget.fail_on_unseeded_pricing)
                .unwrap_or(false),
        };

        Ok(Self {
            db_config,
            provider_base_url,
            provider_api_key,
            default_model,
            budget_config: BudgetConfig {
                max_cost_per_run: max_run_budget,
                max_cost_per_session: max_session_budget,
            },
            unknown_pricing_mode,
            fail_on_unseeded_pricing,
            retry_policy: RetryPolicy::default(),
            concurrency_limit: 1,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
