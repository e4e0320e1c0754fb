//! Application state shared across routes

use std::sync::Arc;

use serde_json::Value;

use crate::config::{GameConfig, ServerConfig};
use crate::game::{ItemCatalog, RoomError, RoomHandle, RoomRegistry};
use crate::store::FundsStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Default tunables for new rooms, already clamped
    pub game_config: Arc<GameConfig>,
    pub catalog: Arc<ItemCatalog>,
    pub registry: Arc<RoomRegistry>,
    pub store: FundsStore,
}

impl AppState {
    pub fn new(config: ServerConfig, game_config: GameConfig) -> Self {
        let catalog = ItemCatalog::builtin().with_overrides(&game_config.items.value_overrides);
        let store = FundsStore::from_config(&config);

        Self {
            config: Arc::new(config),
            game_config: Arc::new(game_config),
            catalog: Arc::new(catalog),
            registry: Arc::new(RoomRegistry::new()),
            store,
        }
    }

    /// Create a room from the default config plus an optional partial overlay
    pub fn create_room(&self, name: &str, overlay: Option<&Value>) -> Result<RoomHandle, RoomError> {
        let config = match overlay {
            Some(overlay) => self
                .game_config
                .with_overlay(overlay)
                .map_err(|e| RoomError::InvalidConfig(e.to_string()))?,
            None => self.game_config.as_ref().clone(),
        };
        self.registry
            .create(name, config, self.catalog.clone(), self.store.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::SocketAddr;

    fn state() -> AppState {
        let config = ServerConfig {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_level: "info".to_string(),
            game_config_path: None,
            client_origin: None,
            supabase: None,
        };
        AppState::new(config, GameConfig::default().clamped())
    }

    #[tokio::test]
    async fn overlay_is_clamped_per_room() {
        let state = state();
        let room = state
            .create_room("gamma", Some(&json!({ "server": { "max_players": 99 } })))
            .unwrap();
        assert_eq!(room.summary().max_players, 16);
        assert_eq!(state.store.backend(), "memory");
    }

    #[tokio::test]
    async fn malformed_overlay_is_rejected() {
        let state = state();
        let err = state
            .create_room("delta", Some(&json!({ "server": { "max_players": "lots" } })))
            .err();
        assert!(matches!(err, Some(RoomError::InvalidConfig(_))));
        assert_eq!(state.registry.active_rooms(), 0);
    }
}
