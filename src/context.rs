//! # Service Context
//!
//! The fixed set of collaborators a session dispatcher operates against:
//! the active character configuration, the history store, the agent
//! engine, and the conversational pipeline. Injected into every session,
//! never owned by one.

use crate::broadcast::Broadcaster;
use crate::config::{AppConfig, AssetsConfig, CharacterConfig};
use crate::events::ServerEvent;
use crate::history::HistoryStore;
use crate::pipeline::echo::{EchoPipeline, MemoryAgent};
use crate::pipeline::{AgentEngine, ConversationPipeline};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Shared collaborator bundle for all sessions.
pub struct ServiceContext {
    /// Active character; replaced in place by switch-config
    character: RwLock<CharacterConfig>,

    pub assets: AssetsConfig,
    pub history: Arc<dyn HistoryStore>,
    pub agent: Arc<dyn AgentEngine>,
    pub pipeline: Arc<dyn ConversationPipeline>,
}

/// Shape of a config-alternate file: a TOML document with a `[character]`
/// table matching [`CharacterConfig`].
#[derive(Deserialize)]
struct ConfigAlt {
    character: CharacterConfig,
}

impl ServiceContext {
    pub fn new(
        config: &AppConfig,
        history: Arc<dyn HistoryStore>,
        agent: Arc<dyn AgentEngine>,
        pipeline: Arc<dyn ConversationPipeline>,
    ) -> Self {
        Self {
            character: RwLock::new(config.character.clone()),
            assets: config.assets.clone(),
            history,
            agent,
            pipeline,
        }
    }

    /// Build the context with the built-in loopback engines.
    pub fn with_loopback_engines(config: &AppConfig, history: Arc<dyn HistoryStore>) -> Self {
        let agent = Arc::new(MemoryAgent::new());
        let pipeline = Arc::new(EchoPipeline::new(history.clone(), agent.clone()));
        Self::new(config, history, agent, pipeline)
    }

    pub fn conf_uid(&self) -> String {
        self.character.read().unwrap().conf_uid.clone()
    }

    pub fn character_snapshot(&self) -> CharacterConfig {
        self.character.read().unwrap().clone()
    }

    /// The `set-model-and-conf` announcement for the active character.
    pub fn model_and_conf_event(&self) -> ServerEvent {
        let character = self.character.read().unwrap();
        ServerEvent::SetModelAndConf {
            model_info: serde_json::json!({
                "name": character.avatar_model.name,
                "url": character.avatar_model.url,
            }),
            conf_name: character.conf_name.clone(),
            conf_uid: character.conf_uid.clone(),
        }
    }

    /// Switch to a named configuration alternate: load the file from the
    /// alternates directory, swap the active character, and re-announce
    /// `set-model-and-conf` through the session's fan-out.
    pub fn handle_config_switch(&self, broadcaster: &Broadcaster, file_name: &str) -> Result<()> {
        let path = Path::new(&self.assets.config_alts_dir).join(file_name);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config alternate {}", path.display()))?;
        let alt: ConfigAlt = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config alternate {}", path.display()))?;

        let conf_uid = alt.character.conf_uid.clone();
        *self.character.write().unwrap() = alt.character;
        info!(file = file_name, conf_uid = %conf_uid, "Switched character configuration");

        broadcaster.deliver(&self.model_and_conf_event());
        broadcaster.deliver(&ServerEvent::full_text(format!(
            "Configuration switched to {}",
            file_name
        )));
        Ok(())
    }
}
