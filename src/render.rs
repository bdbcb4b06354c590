use std::collections::HashMap;

use bevy::gizmos::config::GizmoConfigStore;
use bevy::prelude::*;

use crate::components::{GameConfig, HeadlessMode, PlayerSprite, TileSprite};
use crate::grid::{Cell, GridDims, TileLayer};
use crate::scripting::ScriptMethod;
use crate::session::{EditorSession, SessionTick};
use crate::state_machine::{layer_alpha, script_overlay_visible};
use crate::tilemap::{Tile, TileChange, TileKey};

const PLAYER_Z: f32 = 1.5;

pub struct RenderPlugin;

impl Plugin for RenderPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Startup, (spawn_camera, spawn_player_sprite))
            .add_systems(
                Update,
                (sync_tile_sprites, sync_player_sprite, apply_layer_alpha)
                    .chain()
                    .after(SessionTick),
            )
            .add_systems(
                Update,
                draw_script_overlay
                    .after(SessionTick)
                    .run_if(resource_exists::<GizmoConfigStore>),
            );
    }
}

/// Tiles under the player, player, then the top layer.
pub fn layer_z(layer: TileLayer) -> f32 {
    match layer.index() {
        0 => 0.0,
        1 => 1.0,
        _ => 2.0,
    }
}

/// Screen pixels (origin top-left, y down) to world units. The camera sits so
/// that world x equals screen x and world y is screen y negated.
pub fn screen_to_world(pixel: Vec2) -> Vec2 {
    Vec2::new(pixel.x, -pixel.y)
}

pub fn cell_center(dims: &GridDims, offset: Vec2, cell: Cell) -> Vec2 {
    let origin = dims.cell_origin(cell, offset);
    screen_to_world(origin + Vec2::splat(dims.tile_size() * 0.5))
}

/// Stable colour per sprite type; non-walkable tiles are drawn darker.
pub fn tile_color(tile: &Tile) -> Color {
    let hash = tile
        .sprite_type
        .bytes()
        .fold(0x811c_9dc5_u32, |acc, b| (acc ^ b as u32).wrapping_mul(0x0100_0193));
    let hue = (hash % 360) as f32;
    let lightness = if tile.walkable { 0.55 } else { 0.32 };
    Color::hsl(hue, 0.5, lightness)
}

fn spawn_camera(mut commands: Commands, headless: Res<HeadlessMode>, config: Res<GameConfig>) {
    if headless.0 {
        return;
    }
    commands.spawn((
        Camera2d,
        Transform::from_xyz(config.window_width * 0.5, -config.window_height * 0.5, 100.0),
    ));
}

fn spawn_player_sprite(mut commands: Commands, headless: Res<HeadlessMode>, config: Res<GameConfig>) {
    if headless.0 {
        return;
    }
    commands.spawn((
        PlayerSprite,
        Sprite::from_color(Color::srgb(0.95, 0.85, 0.25), Vec2::splat(config.tile_size * 0.7)),
        Transform::from_xyz(0.0, 0.0, PLAYER_Z),
    ));
}

/// Mirrors registry changes into sprite entities. Changes are drained even
/// when headless so they do not pile up.
fn sync_tile_sprites(
    mut commands: Commands,
    mut session: NonSendMut<EditorSession>,
    headless: Res<HeadlessMode>,
    config: Res<GameConfig>,
    mut sprites: Local<HashMap<TileKey, Entity>>,
) {
    let changes = session.world_mut().drain_tile_changes();
    if headless.0 {
        return;
    }
    let dims = *session.world().dims();
    let offset = config.grid_offset();
    for change in changes {
        match change {
            TileChange::Added(key, tile) => {
                if let Some(old) = sprites.remove(&key) {
                    commands.entity(old).despawn();
                }
                let center = cell_center(&dims, offset, key.cell);
                let entity = commands
                    .spawn((
                        TileSprite { key },
                        Sprite::from_color(tile_color(&tile), Vec2::splat(dims.tile_size())),
                        Transform::from_xyz(center.x, center.y, layer_z(key.layer)),
                    ))
                    .id();
                sprites.insert(key, entity);
            }
            TileChange::Removed(key) => {
                if let Some(old) = sprites.remove(&key) {
                    commands.entity(old).despawn();
                }
            }
            TileChange::Cleared => {
                for (_, entity) in sprites.drain() {
                    commands.entity(entity).despawn();
                }
            }
        }
    }
}

fn sync_player_sprite(
    session: NonSend<EditorSession>,
    config: Res<GameConfig>,
    mut query: Query<&mut Transform, With<PlayerSprite>>,
) {
    let Ok(mut transform) = query.get_single_mut() else {
        return;
    };
    let center = cell_center(
        session.world().dims(),
        config.grid_offset(),
        session.player().position(),
    );
    transform.translation.x = center.x;
    transform.translation.y = center.y;
}

fn apply_layer_alpha(session: NonSend<EditorSession>, mut query: Query<(&TileSprite, &mut Sprite)>) {
    let mode = session.mode();
    for (tile, mut sprite) in query.iter_mut() {
        let alpha = layer_alpha(mode, tile.layer());
        if sprite.color.alpha() != alpha {
            sprite.color = sprite.color.with_alpha(alpha);
        }
    }
}

/// Grid lines and script markers in edit mode, plus the facing marker.
fn draw_script_overlay(session: NonSend<EditorSession>, config: Res<GameConfig>, mut gizmos: Gizmos) {
    let dims = session.world().dims();
    let offset = config.grid_offset();
    let ts = dims.tile_size();
    let player = session.player();
    let from = cell_center(dims, offset, player.position());
    let (dx, dy) = player.direction().delta();
    let tip = from + Vec2::new(dx as f32, -(dy as f32)) * ts * 0.45;
    gizmos.line_2d(from, tip, Color::srgb(1.0, 0.55, 0.2));

    if !script_overlay_visible(session.mode()) {
        return;
    }
    let top_left = screen_to_world(offset);
    let size = dims.pixel_size();
    let line = Color::srgba(1.0, 1.0, 1.0, 0.6);
    for x in 0..=dims.width() {
        let px = top_left.x + x as f32 * ts;
        gizmos.line_2d(Vec2::new(px, top_left.y), Vec2::new(px, top_left.y - size.y), line);
    }
    for y in 0..=dims.height() {
        let py = top_left.y - y as f32 * ts;
        gizmos.line_2d(Vec2::new(top_left.x, py), Vec2::new(top_left.x + size.x, py), line);
    }

    for (cell, script) in session.world().scripts().iter() {
        let color = match (script.method, script.compile_error().is_some()) {
            (_, true) => Color::srgba(1.0, 0.1, 0.1, 0.9),
            (ScriptMethod::Action, false) => Color::srgba(1.0, 0.3, 0.3, 0.7),
            (ScriptMethod::Touch, false) => Color::srgba(0.3, 0.6, 1.0, 0.7),
        };
        gizmos.rect_2d(cell_center(dims, offset, cell), Vec2::splat(ts * 0.8), color);
    }
}
