use bevy::prelude::*;

use crate::components::{HeadlessMode, HudText};
use crate::session::{EditorSession, SessionTick};
use crate::state_machine::{InteractionMode, Selection};

const HUD_SCRIPT_ERRORS: usize = 5;
const HUD_ACTIVITY: usize = 3;
const HUD_SCRIPT_LOG: usize = 3;

pub struct DebugPlugin;

impl Plugin for DebugPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Startup, setup_hud_text)
            .add_systems(Update, update_hud_text.after(SessionTick));
    }
}

fn setup_hud_text(mut commands: Commands, headless: Res<HeadlessMode>) {
    if headless.0 {
        return;
    }
    commands.spawn((
        Text::new(""),
        TextFont {
            font_size: 13.0,
            ..default()
        },
        TextColor(Color::srgba(0.95, 1.0, 0.98, 0.95)),
        Node {
            position_type: PositionType::Absolute,
            left: Val::Px(8.0),
            top: Val::Px(8.0),
            max_width: Val::Px(240.0),
            ..default()
        },
        HudText,
    ));
}

fn update_hud_text(session: NonSend<EditorSession>, mut query: Query<&mut Text, With<HudText>>) {
    let Ok(mut text) = query.get_single_mut() else {
        return;
    };
    let output = hud_text(&session);
    if text.0 != output {
        text.0 = output;
    }
}

/// The left-panel status block.
pub fn hud_text(session: &EditorSession) -> String {
    let editor = session.editor();
    let layer = match editor.selection() {
        Selection::Layer(layer) => layer.to_string(),
        Selection::Scripts => "scripts".to_string(),
    };
    let player = session.player();
    let mut output = format!(
        "Mode: {}\nLayer: {}\nTile: {}\nWalkable: {}\nPlayer: {} {}",
        session.mode().as_str(),
        layer,
        editor.sprite_type(),
        editor.walkable(),
        player.position(),
        player.direction(),
    );
    if session.mode() == InteractionMode::EditScripts {
        output.push_str(&format!("\nScripts: {}", session.world().scripts().len()));
    }
    if let Some(edit) = session.open_edit() {
        output.push_str(&format!("\nEditing script at {}", edit.cell));
    }
    if session.world().is_locked() {
        output.push_str("\nLoading map...");
    }
    if session.pending_storage() > 0 {
        output.push_str(&format!("\nStorage: {} pending", session.pending_storage()));
    }
    if let Some(err) = session.last_storage_error() {
        output.push_str(&format!("\nStorage error: {err}"));
    }
    let activity: Vec<String> = session
        .events()
        .latest(HUD_ACTIVITY)
        .map(|e| e.to_string())
        .collect();
    if !activity.is_empty() {
        output.push_str("\nRecent:");
        for line in activity {
            output.push_str(&format!("\n  {line}"));
        }
    }
    {
        let host = session.host().borrow();
        let mut lines = host.recent_log(HUD_SCRIPT_LOG).peekable();
        if lines.peek().is_some() {
            output.push_str("\nScript log:");
            for line in lines {
                output.push_str(&format!("\n  {line}"));
            }
        }
    }
    let errors = session.script_errors().latest(HUD_SCRIPT_ERRORS);
    if !errors.is_empty() {
        output.push_str("\nScript Errors:");
        for err in errors {
            output.push_str(&format!("\n[{}]: {}", err.cell, err.message));
        }
    }
    output
}
