use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use bevy::log::info;
use rhai::Dynamic;

const MAX_SCRIPT_LOG_LINES: usize = 200;

/// A world edit requested by a script. Queued while the script runs and applied
/// by the session once it has returned.
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptCommand {
    SetTile {
        x: i64,
        y: i64,
        layer: i64,
        sprite_type: String,
        walkable: bool,
    },
    RemoveTile {
        x: i64,
        y: i64,
        layer: i64,
    },
    Teleport {
        x: i64,
        y: i64,
    },
    Face(String),
}

/// State shared between the rhai host functions and the session.
#[derive(Default)]
pub struct ScriptHostState {
    pub vars: HashMap<String, Dynamic>,
    pub commands: Vec<ScriptCommand>,
    pub log: VecDeque<String>,
}

pub type ScriptHost = Rc<RefCell<ScriptHostState>>;

pub fn new_script_host() -> ScriptHost {
    Rc::new(RefCell::new(ScriptHostState::default()))
}

impl ScriptHostState {
    pub fn push_log(&mut self, line: &str) {
        info!("[Gridwright scripts] {line}");
        self.log.push_back(line.to_string());
        while self.log.len() > MAX_SCRIPT_LOG_LINES {
            self.log.pop_front();
        }
    }

    /// Up to `n` lines, oldest first.
    pub fn recent_log(&self, n: usize) -> impl Iterator<Item = &str> {
        let skip = self.log.len().saturating_sub(n);
        self.log.iter().skip(skip).map(String::as_str)
    }

    pub fn take_commands(&mut self) -> Vec<ScriptCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn var(&self, name: &str) -> Option<&Dynamic> {
        self.vars.get(name)
    }
}
