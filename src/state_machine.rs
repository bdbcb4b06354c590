use std::fmt;

use bevy::math::Vec2;

use crate::grid::{Cell, GridDims, TileLayer};
use crate::input::{Key, PointerButton, PointerKind, VirtualInput};
use crate::player::Direction;

/// What pointer and paint keys act on. Exactly one mode is active per session.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InteractionMode {
    Play,
    Paint(TileLayer),
    EditScripts,
}

impl InteractionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            InteractionMode::Play => "play",
            InteractionMode::Paint(_) => "paint",
            InteractionMode::EditScripts => "edit",
        }
    }
}

impl fmt::Display for InteractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InteractionMode::Paint(layer) => write!(f, "paint (layer {layer})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Plane picked by the digit keys, remembered across trips to play mode.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Selection {
    Layer(TileLayer),
    Scripts,
}

impl Selection {
    fn mode(self) -> InteractionMode {
        match self {
            Selection::Layer(layer) => InteractionMode::Paint(layer),
            Selection::Scripts => InteractionMode::EditScripts,
        }
    }
}

/// Work the session performs on the world or the player for one frame of input.
#[derive(Clone, PartialEq, Debug)]
pub enum SessionCommand {
    Save,
    Reload,
    Step { dx: i32, dy: i32 },
    ReleaseMovement,
    Face(Direction),
    Trigger,
    Paint {
        cell: Cell,
        layer: TileLayer,
        sprite_type: String,
        walkable: bool,
    },
    Erase { cell: Cell, layer: TileLayer },
    EditScript(Cell),
}

const MOVE_KEYS: [(Key, i32, i32); 4] = [
    (Key::Down, 0, 1),
    (Key::Up, 0, -1),
    (Key::Left, -1, 0),
    (Key::Right, 1, 0),
];

const FACE_KEYS: [(Key, Direction); 4] = [
    (Key::W, Direction::Up),
    (Key::S, Direction::Down),
    (Key::A, Direction::Left),
    (Key::D, Direction::Right),
];

/// Mode plus the paint substate: sprite palette cursor and walkable flag.
#[derive(Clone, Debug)]
pub struct EditorState {
    mode: InteractionMode,
    selection: Selection,
    sprite_types: Vec<String>,
    sprite_index: usize,
    walkable: bool,
}

impl EditorState {
    pub fn new(sprite_types: Vec<String>) -> Self {
        let sprite_types = if sprite_types.is_empty() {
            vec!["tile".to_string()]
        } else {
            sprite_types
        };
        Self {
            mode: InteractionMode::Play,
            selection: Selection::Layer(TileLayer::GROUND),
            sprite_types,
            sprite_index: 0,
            walkable: true,
        }
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn sprite_type(&self) -> &str {
        &self.sprite_types[self.sprite_index]
    }

    pub fn walkable(&self) -> bool {
        self.walkable
    }

    /// Play <-> the last selected plane.
    pub fn toggle_mode(&mut self) {
        self.mode = match self.mode {
            InteractionMode::Play => self.selection.mode(),
            InteractionMode::Paint(_) | InteractionMode::EditScripts => InteractionMode::Play,
        };
    }

    /// Ignored in play mode.
    pub fn select(&mut self, selection: Selection) {
        if self.mode == InteractionMode::Play {
            return;
        }
        self.selection = selection;
        self.mode = selection.mode();
    }

    pub fn cycle_sprite(&mut self, forward: bool) {
        let len = self.sprite_types.len();
        self.sprite_index = if forward {
            (self.sprite_index + 1) % len
        } else {
            (self.sprite_index + len - 1) % len
        };
    }

    pub fn toggle_walkable(&mut self) {
        self.walkable = !self.walkable;
    }

    /// Routes one frame of input. Mode keys are edge-triggered; movement is
    /// level-triggered and throttled by the player controller.
    pub fn handle_input(
        &mut self,
        input: &VirtualInput,
        dims: &GridDims,
        offset: Vec2,
    ) -> Vec<SessionCommand> {
        let mut commands = Vec::new();
        let alt = input.is_key_pressed(Key::Alt);

        if alt && input.is_key_down(Key::E) {
            self.toggle_mode();
        }

        if self.mode != InteractionMode::Play {
            if input.is_key_down(Key::Z) {
                self.cycle_sprite(false);
            }
            if input.is_key_down(Key::X) {
                self.cycle_sprite(true);
            }
            if input.is_key_down(Key::P) {
                self.toggle_walkable();
            }
            for (key, layer) in [
                (Key::Digit1, TileLayer::GROUND),
                (Key::Digit2, TileLayer::MIDDLE),
                (Key::Digit3, TileLayer::TOP),
            ] {
                if input.is_key_down(key) {
                    self.select(Selection::Layer(layer));
                }
            }
            if input.is_key_down(Key::Digit4) {
                self.select(Selection::Scripts);
            }
        }

        let mut moving = false;
        for (key, dx, dy) in MOVE_KEYS {
            if input.is_key_pressed(key) {
                moving = true;
                commands.push(SessionCommand::Step { dx, dy });
            }
        }
        if !moving {
            commands.push(SessionCommand::ReleaseMovement);
        }

        if !alt {
            for (key, direction) in FACE_KEYS {
                if input.is_key_down(key) {
                    commands.push(SessionCommand::Face(direction));
                }
            }
        }

        if input.is_key_down(Key::Space) {
            commands.push(SessionCommand::Trigger);
        }
        if alt && input.is_key_down(Key::R) {
            commands.push(SessionCommand::Reload);
        }
        if alt && input.is_key_down(Key::S) {
            commands.push(SessionCommand::Save);
        }

        for event in &input.pointer {
            let cell = dims.cell_from_pixel(event.position, offset);
            if !dims.in_bounds(cell.x, cell.y) {
                continue;
            }
            match (self.mode, event.kind, event.button) {
                (InteractionMode::Paint(layer), PointerKind::Press | PointerKind::Drag, PointerButton::Primary) => {
                    commands.push(SessionCommand::Erase { cell, layer });
                }
                (InteractionMode::Paint(layer), PointerKind::Press | PointerKind::Drag, PointerButton::Secondary) => {
                    commands.push(SessionCommand::Paint {
                        cell,
                        layer,
                        sprite_type: self.sprite_type().to_string(),
                        walkable: self.walkable,
                    });
                }
                (InteractionMode::EditScripts, PointerKind::DoubleClick, _) => {
                    commands.push(SessionCommand::EditScript(cell));
                }
                _ => {}
            }
        }

        commands
    }
}

/// Non-active paint layers are dimmed so the active one stands out.
pub fn layer_alpha(mode: InteractionMode, layer: TileLayer) -> f32 {
    match mode {
        InteractionMode::Paint(active) if active != layer => 0.3,
        _ => 1.0,
    }
}

pub fn script_overlay_visible(mode: InteractionMode) -> bool {
    mode == InteractionMode::EditScripts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::PointerEvent;

    fn dims() -> GridDims {
        GridDims::new(20, 15, 32.0)
    }

    fn offset() -> Vec2 {
        Vec2::new(256.0, 0.0)
    }

    fn keys(pressed: &[Key]) -> VirtualInput {
        let mut input = VirtualInput::default();
        for key in pressed {
            input.press(*key);
        }
        input
    }

    fn state() -> EditorState {
        EditorState::new(vec!["grass".into(), "wall".into(), "water".into()])
    }

    #[test]
    fn alt_e_toggles_between_play_and_last_selection() {
        let mut editor = state();
        editor.handle_input(&keys(&[Key::Alt, Key::E]), &dims(), offset());
        assert_eq!(editor.mode(), InteractionMode::Paint(TileLayer::GROUND));

        editor.handle_input(&keys(&[Key::Digit4]), &dims(), offset());
        assert_eq!(editor.mode(), InteractionMode::EditScripts);

        editor.handle_input(&keys(&[Key::Alt, Key::E]), &dims(), offset());
        assert_eq!(editor.mode(), InteractionMode::Play);
        editor.handle_input(&keys(&[Key::Alt, Key::E]), &dims(), offset());
        assert_eq!(editor.mode(), InteractionMode::EditScripts);
    }

    #[test]
    fn e_without_alt_does_nothing() {
        let mut editor = state();
        editor.handle_input(&keys(&[Key::E]), &dims(), offset());
        assert_eq!(editor.mode(), InteractionMode::Play);
    }

    #[test]
    fn digits_are_ignored_in_play_mode() {
        let mut editor = state();
        editor.handle_input(&keys(&[Key::Digit3]), &dims(), offset());
        assert_eq!(editor.mode(), InteractionMode::Play);
        assert_eq!(editor.selection(), Selection::Layer(TileLayer::GROUND));

        editor.toggle_mode();
        editor.handle_input(&keys(&[Key::Digit3]), &dims(), offset());
        assert_eq!(editor.mode(), InteractionMode::Paint(TileLayer::TOP));
    }

    #[test]
    fn sprite_cursor_wraps_both_ways() {
        let mut editor = state();
        editor.toggle_mode();
        editor.handle_input(&keys(&[Key::Z]), &dims(), offset());
        assert_eq!(editor.sprite_type(), "water");
        editor.handle_input(&keys(&[Key::X]), &dims(), offset());
        assert_eq!(editor.sprite_type(), "grass");
        editor.handle_input(&keys(&[Key::P]), &dims(), offset());
        assert!(!editor.walkable());
    }

    #[test]
    fn held_arrows_step_and_release_when_idle() {
        let mut editor = state();
        let mut input = VirtualInput::default();
        input.hold(Key::Up);
        let commands = editor.handle_input(&input, &dims(), offset());
        assert_eq!(commands, vec![SessionCommand::Step { dx: 0, dy: -1 }]);

        let commands = editor.handle_input(&VirtualInput::default(), &dims(), offset());
        assert_eq!(commands, vec![SessionCommand::ReleaseMovement]);
    }

    #[test]
    fn alt_s_saves_instead_of_facing_down() {
        let mut editor = state();
        let commands = editor.handle_input(&keys(&[Key::Alt, Key::S]), &dims(), offset());
        assert!(commands.contains(&SessionCommand::Save));
        assert!(!commands.contains(&SessionCommand::Face(Direction::Down)));

        let commands = editor.handle_input(&keys(&[Key::S]), &dims(), offset());
        assert!(commands.contains(&SessionCommand::Face(Direction::Down)));
        assert!(!commands.contains(&SessionCommand::Save));
    }

    #[test]
    fn paint_mode_pointer_paints_and_erases_active_layer() {
        let mut editor = state();
        editor.toggle_mode();
        editor.select(Selection::Layer(TileLayer::MIDDLE));
        editor.toggle_walkable();

        let mut input = VirtualInput::default();
        input.pointer.push(PointerEvent {
            position: Vec2::new(256.0 + 3.0 * 32.0 + 5.0, 4.0 * 32.0 + 1.0),
            button: PointerButton::Secondary,
            kind: PointerKind::Press,
        });
        input.pointer.push(PointerEvent {
            position: Vec2::new(256.0 + 10.0, 10.0),
            button: PointerButton::Primary,
            kind: PointerKind::Drag,
        });
        input.pointer.push(PointerEvent {
            position: Vec2::new(10.0, 10.0),
            button: PointerButton::Secondary,
            kind: PointerKind::Press,
        });

        let commands = editor.handle_input(&input, &dims(), offset());
        assert!(commands.contains(&SessionCommand::Paint {
            cell: Cell::new(3, 4),
            layer: TileLayer::MIDDLE,
            sprite_type: "grass".into(),
            walkable: false,
        }));
        assert!(commands.contains(&SessionCommand::Erase {
            cell: Cell::new(0, 0),
            layer: TileLayer::MIDDLE,
        }));
        let pointer_commands = commands
            .iter()
            .filter(|c| matches!(c, SessionCommand::Paint { .. } | SessionCommand::Erase { .. }))
            .count();
        assert_eq!(pointer_commands, 2);
    }

    #[test]
    fn double_click_opens_scripts_only_in_edit_mode() {
        let mut input = VirtualInput::default();
        input.pointer.push(PointerEvent {
            position: Vec2::new(256.0 + 64.0, 64.0),
            button: PointerButton::Primary,
            kind: PointerKind::DoubleClick,
        });

        let mut editor = state();
        let commands = editor.handle_input(&input, &dims(), offset());
        assert!(!commands.iter().any(|c| matches!(c, SessionCommand::EditScript(_))));

        editor.toggle_mode();
        editor.select(Selection::Scripts);
        let commands = editor.handle_input(&input, &dims(), offset());
        assert!(commands.contains(&SessionCommand::EditScript(Cell::new(2, 2))));
    }

    #[test]
    fn only_inactive_paint_layers_are_dimmed() {
        let paint = InteractionMode::Paint(TileLayer::MIDDLE);
        assert_eq!(layer_alpha(paint, TileLayer::MIDDLE), 1.0);
        assert_eq!(layer_alpha(paint, TileLayer::TOP), 0.3);
        assert_eq!(layer_alpha(InteractionMode::Play, TileLayer::TOP), 1.0);
        assert!(script_overlay_visible(InteractionMode::EditScripts));
        assert!(!script_overlay_visible(paint));
    }
}
