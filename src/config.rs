//! # Configuration Management
//!
//! Loads application configuration from layered sources:
//! - Built-in defaults
//! - `config.toml` (optional)
//! - Environment variables with the `APP_` prefix
//! - `HOST` / `PORT` overrides used by deployment platforms
//!
//! Configuration is validated once at startup; a server that boots with an
//! invalid character or asset layout fails fast instead of limping along.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub character: CharacterConfig,
    pub assets: AssetsConfig,
    pub performance: PerformanceConfig,
}

/// HTTP/WebSocket listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Identity of the active character plus its avatar model descriptor.
/// This is what `set-model-and-conf` announces to every client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterConfig {
    /// Stable identifier, also the history-store partition key
    pub conf_uid: String,

    /// Display name shown by front-ends
    pub conf_name: String,

    pub avatar_model: AvatarModel,
}

/// Descriptor of the avatar model a front-end should load. Opaque to the
/// session core beyond being serialized into `set-model-and-conf`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarModel {
    pub name: String,
    pub url: String,
}

/// Filesystem locations for scanned assets and stored histories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsConfig {
    /// Directory of alternative character configurations (switch-config)
    pub config_alts_dir: String,

    /// Directory of background images (fetch-backgrounds)
    pub backgrounds_dir: String,

    /// Root directory of the file-backed history store
    pub history_dir: String,
}

/// Operational limits and diagnostics thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Cap on concurrent observer connections; also drives the health
    /// endpoint's load reporting
    pub max_observers: usize,

    /// Session queue depth above which a watermark warning is logged
    pub queue_warn_depth: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 12393,
            },
            character: CharacterConfig {
                conf_uid: "default-character".to_string(),
                conf_name: "Default Character".to_string(),
                avatar_model: AvatarModel {
                    name: "shizuku".to_string(),
                    url: "/avatar-models/shizuku/shizuku.model.json".to_string(),
                },
            },
            assets: AssetsConfig {
                config_alts_dir: "config_alts".to_string(),
                backgrounds_dir: "backgrounds".to_string(),
                history_dir: "chat_history".to_string(),
            },
            performance: PerformanceConfig {
                max_observers: 32,
                queue_warn_depth: 64,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration in priority order: defaults, then `config.toml`,
    /// then `APP_*` environment variables, then `HOST`/`PORT`.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly inject bare HOST/PORT variables.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.character.conf_uid.is_empty() {
            return Err(anyhow::anyhow!("character.conf_uid cannot be empty"));
        }

        if self.assets.history_dir.is_empty() {
            return Err(anyhow::anyhow!("assets.history_dir cannot be empty"));
        }

        if self.performance.queue_warn_depth == 0 {
            return Err(anyhow::anyhow!("queue_warn_depth must be greater than 0"));
        }

        Ok(())
    }
}
