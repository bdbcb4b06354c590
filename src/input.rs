use bevy::prelude::*;
use bevy::window::PrimaryWindow;
use std::collections::HashSet;

use crate::components::GameConfig;

/// Keys the editor reacts to, independent of the windowing backend.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Key {
    Alt,
    E,
    R,
    S,
    W,
    A,
    D,
    Z,
    X,
    P,
    Digit1,
    Digit2,
    Digit3,
    Digit4,
    Up,
    Down,
    Left,
    Right,
    Space,
    Escape,
    Delete,
}

const KEY_BINDINGS: &[(KeyCode, Key)] = &[
    (KeyCode::AltLeft, Key::Alt),
    (KeyCode::AltRight, Key::Alt),
    (KeyCode::KeyE, Key::E),
    (KeyCode::KeyR, Key::R),
    (KeyCode::KeyS, Key::S),
    (KeyCode::KeyW, Key::W),
    (KeyCode::KeyA, Key::A),
    (KeyCode::KeyD, Key::D),
    (KeyCode::KeyZ, Key::Z),
    (KeyCode::KeyX, Key::X),
    (KeyCode::KeyP, Key::P),
    (KeyCode::Digit1, Key::Digit1),
    (KeyCode::Digit2, Key::Digit2),
    (KeyCode::Digit3, Key::Digit3),
    (KeyCode::Digit4, Key::Digit4),
    (KeyCode::ArrowUp, Key::Up),
    (KeyCode::ArrowDown, Key::Down),
    (KeyCode::ArrowLeft, Key::Left),
    (KeyCode::ArrowRight, Key::Right),
    (KeyCode::Space, Key::Space),
    (KeyCode::Escape, Key::Escape),
    (KeyCode::Delete, Key::Delete),
];

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PointerButton {
    Primary,
    Secondary,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PointerKind {
    Press,
    Drag,
    DoubleClick,
}

/// Pointer activity in window pixels, origin top-left.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct PointerEvent {
    pub position: Vec2,
    pub button: PointerButton,
    pub kind: PointerKind,
}

/// Per-frame input snapshot. Filled from the keyboard and mouse in windowed
/// mode; tests and headless drivers write to it directly.
#[derive(Resource, Default, Clone)]
pub struct VirtualInput {
    pub held: HashSet<Key>,
    pub just_pressed: HashSet<Key>,
    pub pointer: Vec<PointerEvent>,
}

impl VirtualInput {
    /// Edge-triggered: true only on the frame the key went down.
    pub fn is_key_down(&self, key: Key) -> bool {
        self.just_pressed.contains(&key)
    }

    /// Level-triggered: true while held.
    pub fn is_key_pressed(&self, key: Key) -> bool {
        self.held.contains(&key)
    }

    pub fn press(&mut self, key: Key) {
        self.held.insert(key);
        self.just_pressed.insert(key);
    }

    pub fn hold(&mut self, key: Key) {
        self.held.insert(key);
    }

    pub fn release(&mut self, key: Key) {
        self.held.remove(&key);
        self.just_pressed.remove(&key);
    }

    pub fn clear_frame(&mut self) {
        self.just_pressed.clear();
        self.pointer.clear();
    }
}

/// Click history used to spot double clicks.
#[derive(Default)]
pub struct PointerTracker {
    last_click: Option<(f64, Vec2)>,
    last_position: Option<Vec2>,
}

impl PointerTracker {
    /// Records a press; true when it completes a double click.
    pub fn register_press(&mut self, position: Vec2, now_ms: f64, window_ms: f64) -> bool {
        let double = self.last_click.is_some_and(|(at, pos)| {
            now_ms - at <= window_ms && pos.distance(position) <= 4.0
        });
        self.last_click = if double { None } else { Some((now_ms, position)) };
        double
    }

    /// True when the cursor moved since the previous frame.
    pub fn moved_to(&mut self, position: Vec2) -> bool {
        let moved = self.last_position.is_some_and(|last| last != position);
        self.last_position = Some(position);
        moved
    }
}

pub struct InputPlugin;

impl Plugin for InputPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(VirtualInput::default())
            .add_systems(
                PreUpdate,
                (
                    keyboard_to_virtual.run_if(resource_exists::<ButtonInput<KeyCode>>),
                    pointer_to_virtual.run_if(resource_exists::<ButtonInput<MouseButton>>),
                )
                    .chain(),
            )
            .add_systems(Last, clear_virtual_input);
    }
}

fn keyboard_to_virtual(keyboard: Res<ButtonInput<KeyCode>>, mut vinput: ResMut<VirtualInput>) {
    vinput.held.clear();
    vinput.just_pressed.clear();
    for (code, key) in KEY_BINDINGS {
        if keyboard.pressed(*code) {
            vinput.held.insert(*key);
        }
        if keyboard.just_pressed(*code) {
            vinput.just_pressed.insert(*key);
        }
    }
}

fn pointer_to_virtual(
    mouse: Res<ButtonInput<MouseButton>>,
    windows: Query<&Window, With<PrimaryWindow>>,
    time: Res<Time>,
    config: Res<GameConfig>,
    mut tracker: Local<PointerTracker>,
    mut vinput: ResMut<VirtualInput>,
) {
    vinput.pointer.clear();
    let Ok(window) = windows.get_single() else {
        return;
    };
    let Some(position) = window.cursor_position() else {
        return;
    };
    let now_ms = time.elapsed_secs_f64() * 1000.0;
    let moved = tracker.moved_to(position);

    for (mouse_button, button) in [
        (MouseButton::Left, PointerButton::Primary),
        (MouseButton::Right, PointerButton::Secondary),
    ] {
        if mouse.just_pressed(mouse_button) {
            vinput.pointer.push(PointerEvent {
                position,
                button,
                kind: PointerKind::Press,
            });
            if button == PointerButton::Primary
                && tracker.register_press(position, now_ms, config.double_click_ms)
            {
                vinput.pointer.push(PointerEvent {
                    position,
                    button,
                    kind: PointerKind::DoubleClick,
                });
            }
        } else if mouse.pressed(mouse_button) && moved {
            vinput.pointer.push(PointerEvent {
                position,
                button,
                kind: PointerKind::Drag,
            });
        }
    }
}

fn clear_virtual_input(mut vinput: ResMut<VirtualInput>) {
    vinput.clear_frame();
}
