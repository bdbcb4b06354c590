use std::collections::VecDeque;
use std::fmt;

use bevy::log::warn;

use crate::grid::Cell;
use crate::scripting::ScriptMethod;

const MAX_EVENTS: usize = 500;

#[derive(Clone, Debug, PartialEq)]
pub enum EditorEvent {
    ModeChanged { from: String, to: String },
    MapLoaded { name: String, tiles: usize, scripts: usize, compile_errors: usize },
    MapSaved { name: String, path: String },
    ScriptSaved { cell: Cell, method: ScriptMethod, error: Option<String> },
    ScriptRemoved { cell: Cell },
    ScriptError { cell: Cell, message: String },
}

impl EditorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EditorEvent::ModeChanged { .. } => "mode_changed",
            EditorEvent::MapLoaded { .. } => "map_loaded",
            EditorEvent::MapSaved { .. } => "map_saved",
            EditorEvent::ScriptSaved { .. } => "script_saved",
            EditorEvent::ScriptRemoved { .. } => "script_removed",
            EditorEvent::ScriptError { .. } => "script_error",
        }
    }
}

impl fmt::Display for EditorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditorEvent::ModeChanged { to, .. } => write!(f, "mode -> {to}"),
            EditorEvent::MapLoaded {
                name,
                tiles,
                scripts,
                compile_errors,
            } => {
                write!(f, "loaded '{name}' ({tiles} tiles, {scripts} scripts)")?;
                if *compile_errors > 0 {
                    write!(f, ", {compile_errors} broken")?;
                }
                Ok(())
            }
            EditorEvent::MapSaved { name, .. } => write!(f, "saved '{name}'"),
            EditorEvent::ScriptSaved { cell, method, error } => match error {
                None => write!(f, "{method} script saved at {cell}"),
                Some(_) => write!(f, "{method} script at {cell} saved, does not compile"),
            },
            EditorEvent::ScriptRemoved { cell } => write!(f, "script removed at {cell}"),
            EditorEvent::ScriptError { cell, .. } => write!(f, "script error at {cell}"),
        }
    }
}

/// What happened this session, newest last. Shown in the HUD activity list.
#[derive(Default)]
pub struct EditorEventBus {
    recent: VecDeque<(u64, EditorEvent)>,
    frame: u64,
    dropped_events: u64,
    last_overflow_log_frame: u64,
}

impl EditorEventBus {
    pub fn emit(&mut self, event: EditorEvent) {
        self.recent.push_back((self.frame, event));
        if self.recent.len() <= MAX_EVENTS {
            return;
        }
        self.recent.pop_front();
        self.dropped_events = self.dropped_events.saturating_add(1);
        if self.frame.saturating_sub(self.last_overflow_log_frame) >= 60 {
            self.last_overflow_log_frame = self.frame;
            warn!(
                "[Gridwright events] Activity list full, {} old entries dropped",
                self.dropped_events
            );
        }
    }

    pub fn advance_frame(&mut self) {
        self.frame = self.frame.saturating_add(1);
    }

    /// Up to `n` events, oldest first.
    pub fn latest(&self, n: usize) -> impl Iterator<Item = &EditorEvent> {
        let skip = self.recent.len().saturating_sub(n);
        self.recent.iter().skip(skip).map(|(_, e)| e)
    }

    pub fn last_named(&self, name: &str) -> Option<&EditorEvent> {
        self.recent
            .iter()
            .rev()
            .map(|(_, e)| e)
            .find(|e| e.name() == name)
    }

    pub fn count(&self, name: &str) -> usize {
        self.recent.iter().filter(|(_, e)| e.name() == name).count()
    }
}
