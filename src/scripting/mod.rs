pub mod api;
pub mod vm;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;

use bevy::log::warn;
use serde::{Deserialize, Serialize};

use crate::grid::{Cell, GridDims, GridError};

pub const DEFAULT_RHAI_MAX_OPERATIONS: u64 = 500_000;
pub const DEFAULT_RHAI_MAX_CALL_LEVELS: usize = 64;

pub use vm::{RhaiCompiler, ScriptErrors};

/// When a cell script is meant to run.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptMethod {
    /// Player steps onto the cell.
    #[default]
    Touch,
    /// Player presses the action key while facing the cell.
    Action,
}

impl ScriptMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ScriptMethod::Touch => "touch",
            ScriptMethod::Action => "action",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "touch" => Some(ScriptMethod::Touch),
            "action" => Some(ScriptMethod::Action),
            _ => None,
        }
    }
}

impl fmt::Display for ScriptMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CompileError {
    pub message: String,
    pub line: Option<usize>,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {line}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for CompileError {}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ScriptRuntimeError {
    pub cell: Cell,
    pub message: String,
}

impl fmt::Display for ScriptRuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "script at {} failed: {}", self.cell, self.message)
    }
}

impl std::error::Error for ScriptRuntimeError {}

/// A compiled, argument-less unit of script logic.
pub trait Invocable {
    fn invoke(&self) -> Result<(), String>;
}

impl<F> Invocable for F
where
    F: Fn() -> Result<(), String>,
{
    fn invoke(&self) -> Result<(), String> {
        self()
    }
}

/// Turns script text into something runnable.
pub trait Compiler {
    fn compile(&self, source: &str) -> Result<Box<dyn Invocable>, CompileError>;
}

/// Receives errors raised while a script runs.
pub trait ScriptLog {
    fn report(&mut self, error: ScriptRuntimeError);
}

pub struct Script {
    pub method: ScriptMethod,
    pub body: String,
    compiled: Option<Box<dyn Invocable>>,
    compile_error: Option<CompileError>,
}

impl Script {
    pub fn new(method: ScriptMethod, body: impl Into<String>) -> Self {
        Self {
            method,
            body: body.into(),
            compiled: None,
            compile_error: None,
        }
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    pub fn compile_error(&self) -> Option<&CompileError> {
        self.compile_error.as_ref()
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("method", &self.method)
            .field("body", &self.body)
            .field("compiled", &self.compiled.is_some())
            .field("compile_error", &self.compile_error)
            .finish()
    }
}

/// One optional script per cell, independent of the tile layers.
pub struct ScriptTable {
    dims: GridDims,
    scripts: HashMap<Cell, Script>,
}

impl ScriptTable {
    pub fn new(dims: GridDims) -> Self {
        Self {
            dims,
            scripts: HashMap::new(),
        }
    }

    /// Stores a fresh, uncompiled script, replacing whatever was there.
    pub fn create_script(
        &mut self,
        x: i32,
        y: i32,
        method: ScriptMethod,
        body: impl Into<String>,
    ) -> Result<&mut Script, GridError> {
        let cell = self.dims.check(x, y)?;
        let script = Script::new(method, body);
        let slot = match self.scripts.entry(cell) {
            Entry::Occupied(mut entry) => {
                entry.insert(script);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(script),
        };
        Ok(slot)
    }

    pub fn get_script(&self, x: i32, y: i32) -> Option<&Script> {
        self.scripts.get(&Cell::new(x, y))
    }

    pub fn get_script_mut(&mut self, x: i32, y: i32) -> Option<&mut Script> {
        self.scripts.get_mut(&Cell::new(x, y))
    }

    pub fn remove_script(&mut self, x: i32, y: i32) -> Option<Script> {
        self.scripts.remove(&Cell::new(x, y))
    }

    /// Recompiles the body at (x, y). `Ok(true)` means an invocable is now present.
    /// An empty body leaves no invocable and is not an error.
    pub fn compile(&mut self, x: i32, y: i32, compiler: &dyn Compiler) -> Result<bool, CompileError> {
        let Some(script) = self.scripts.get_mut(&Cell::new(x, y)) else {
            return Ok(false);
        };
        compile_script(script, compiler)
    }

    /// Runs the compiled action at (x, y) if there is one. Failures go to `log`.
    pub fn run(&self, x: i32, y: i32, log: &mut dyn ScriptLog) -> bool {
        let cell = Cell::new(x, y);
        let Some(action) = self.scripts.get(&cell).and_then(|s| s.compiled.as_ref()) else {
            return false;
        };
        if let Err(message) = action.invoke() {
            log.report(ScriptRuntimeError { cell, message });
        }
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (Cell, &Script)> + '_ {
        self.scripts.iter().map(|(cell, script)| (*cell, script))
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    pub fn clear(&mut self) {
        self.scripts.clear();
    }

    /// Swaps in a whole new table and compiles every entry. Compile failures are
    /// recorded on the scripts and returned; they never abort the swap.
    pub(crate) fn replace_all(
        &mut self,
        scripts: Vec<(Cell, Script)>,
        compiler: &dyn Compiler,
    ) -> Vec<(Cell, CompileError)> {
        self.scripts.clear();
        let mut failures = Vec::new();
        for (cell, mut script) in scripts {
            if let Err(err) = compile_script(&mut script, compiler) {
                warn!("[Gridwright scripts] Script at {cell} failed to compile: {err}");
                failures.push((cell, err));
            }
            self.scripts.insert(cell, script);
        }
        failures
    }
}

fn compile_script(script: &mut Script, compiler: &dyn Compiler) -> Result<bool, CompileError> {
    script.compiled = None;
    script.compile_error = None;
    if script.body.trim().is_empty() {
        return Ok(false);
    }
    match compiler.compile(&script.body) {
        Ok(action) => {
            script.compiled = Some(action);
            Ok(true)
        }
        Err(err) => {
            script.compile_error = Some(err.clone());
            Err(err)
        }
    }
}
