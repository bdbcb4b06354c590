mod components;
mod debug;
mod events;
mod grid;
mod input;
mod persistence;
mod player;
mod render;
mod script_editor;
mod scripting;
mod session;
mod state_machine;
mod storage;
mod tilemap;
mod world;

use bevy::prelude::*;
use components::{GameConfig, HeadlessMode};

fn load_startup_config() -> GameConfig {
    let path = std::env::var("GRIDWRIGHT_GAME_CONFIG")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "game.json".to_string());
    let mut config = match std::fs::read_to_string(&path) {
        Ok(contents) => match GameConfig::from_json(&contents) {
            Ok(cfg) => {
                println!("[Gridwright] Loaded startup config from {}", path);
                cfg
            }
            Err(e) => {
                eprintln!("[Gridwright] Failed to parse {}: {}", path, e);
                GameConfig::default()
            }
        },
        Err(_) => GameConfig::default(),
    };
    config.apply_env_overrides();
    config
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let headless = args.iter().any(|a| a == "--headless");

    let config = load_startup_config();
    let mut app = App::new();

    app.insert_resource(HeadlessMode(headless));

    if headless {
        app.add_plugins(MinimalPlugins);
        println!("[Gridwright] Starting in HEADLESS mode");
    } else {
        app.add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: config.window_title.clone(),
                resolution: (config.window_width, config.window_height).into(),
                present_mode: bevy::window::PresentMode::AutoVsync,
                ..default()
            }),
            ..default()
        }));
        let bg = config.background_color;
        app.insert_resource(ClearColor(Color::srgb(bg[0], bg[1], bg[2])));
        println!("[Gridwright] Starting in WINDOWED mode");
    }
    println!(
        "[Gridwright] Map '{}' from {}, scripts in {}",
        config.map_name, config.maps_dir, config.scripts_dir
    );

    app.insert_resource(config)
        .add_plugins(input::InputPlugin)
        .add_plugins(session::SessionPlugin)
        .add_plugins(render::RenderPlugin)
        .add_plugins(debug::DebugPlugin);

    app.run();
}
