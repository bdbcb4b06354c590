use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::grid::TileLayer;
use crate::tilemap::TileKey;

/// Marks the player sprite
#[derive(Component)]
pub struct PlayerSprite;

/// Sprite standing in for one placed tile
#[derive(Component, Clone, Copy)]
pub struct TileSprite {
    pub key: TileKey,
}

impl TileSprite {
    pub fn layer(&self) -> TileLayer {
        self.key.layer
    }
}

/// Marks the text node of the debug HUD
#[derive(Component)]
pub struct HudText;

/// True when running without a window.
#[derive(Resource, Clone, Copy, Default)]
pub struct HeadlessMode(pub bool);

pub const DEFAULT_SPRITE_TYPES: &[&str] = &[
    "grass", "dirt", "sand", "water", "stone", "wall", "tree", "flower", "door", "roof",
];

/// Startup configuration read from `game.json`. Every field is optional there.
#[derive(Resource, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub window_title: String,
    pub window_width: f32,
    pub window_height: f32,
    pub background_color: [f32; 3],
    pub grid_width: u32,
    pub grid_height: u32,
    pub tile_size: f32,
    /// Pixel offset of the grid's top-left corner inside the window.
    pub grid_offset: [f32; 2],
    pub map_name: String,
    pub maps_dir: String,
    pub scripts_dir: String,
    pub atlas_source: String,
    pub sprite_types: Vec<String>,
    pub player_spawn: [i32; 2],
    pub move_repeat_ms: f64,
    pub double_click_ms: f64,
    pub touch_scripts_fire_on_enter: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            window_title: "Gridwright".to_string(),
            window_width: 800.0,
            window_height: 600.0,
            background_color: [0.08, 0.09, 0.11],
            grid_width: 20,
            grid_height: 15,
            tile_size: 32.0,
            grid_offset: [256.0, 0.0],
            map_name: "map".to_string(),
            maps_dir: "maps".to_string(),
            scripts_dir: "scripts".to_string(),
            atlas_source: "atlas.json".to_string(),
            sprite_types: DEFAULT_SPRITE_TYPES.iter().map(|s| s.to_string()).collect(),
            player_spawn: [5, 3],
            move_repeat_ms: 150.0,
            double_click_ms: 300.0,
            touch_scripts_fire_on_enter: false,
        }
    }
}

impl GameConfig {
    pub fn grid_offset(&self) -> Vec2 {
        Vec2::new(self.grid_offset[0], self.grid_offset[1])
    }

    pub fn from_json(contents: &str) -> Result<Self, String> {
        let config: GameConfig =
            serde_json::from_str(contents).map_err(|e| format!("invalid game config: {e}"))?;
        config.validated()
    }

    fn validated(mut self) -> Result<Self, String> {
        if self.grid_width == 0 || self.grid_height == 0 {
            return Err(format!(
                "grid must be at least 1x1, got {}x{}",
                self.grid_width, self.grid_height
            ));
        }
        if !(self.tile_size > 0.0) {
            return Err(format!("tile_size must be positive, got {}", self.tile_size));
        }
        self.sprite_types.retain(|s| !s.trim().is_empty());
        if self.sprite_types.is_empty() {
            self.sprite_types = Self::default().sprite_types;
        }
        self.move_repeat_ms = self.move_repeat_ms.max(0.0);
        self.double_click_ms = self.double_click_ms.max(0.0);
        Ok(self)
    }

    /// Applies `GRIDWRIGHT_MAPS_DIR` and `GRIDWRIGHT_SCRIPTS_DIR`.
    pub fn apply_env_overrides(&mut self) {
        if let Some(dir) = env_string("GRIDWRIGHT_MAPS_DIR") {
            self.maps_dir = dir;
        }
        if let Some(dir) = env_string("GRIDWRIGHT_SCRIPTS_DIR") {
            self.scripts_dir = dir;
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}
