use std::rc::Rc;
use std::sync::OnceLock;

use bevy::log::warn;
use rhai::{Dynamic, Engine, ImmutableString, INT};

use crate::grid::Cell;
use crate::scripting::api::{ScriptCommand, ScriptHost};
use crate::scripting::{CompileError, Compiler, Invocable, ScriptLog, ScriptRuntimeError};

const MAX_SCRIPT_ERRORS: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptErrorEntry {
    pub cell: Cell,
    pub message: String,
    pub tick: u64,
}

/// Recent runtime failures, newest last.
#[derive(Default)]
pub struct ScriptErrors {
    pub entries: Vec<ScriptErrorEntry>,
    pub tick: u64,
}

impl ScriptErrors {
    pub fn push(&mut self, entry: ScriptErrorEntry) {
        self.entries.push(entry);
        if self.entries.len() > MAX_SCRIPT_ERRORS {
            let excess = self.entries.len() - MAX_SCRIPT_ERRORS;
            self.entries.drain(0..excess);
        }
    }

    pub fn latest(&self, count: usize) -> &[ScriptErrorEntry] {
        let start = self.entries.len().saturating_sub(count);
        &self.entries[start..]
    }
}

impl ScriptLog for ScriptErrors {
    fn report(&mut self, error: ScriptRuntimeError) {
        warn!("[Gridwright scripts] {error}");
        let tick = self.tick;
        self.push(ScriptErrorEntry {
            cell: error.cell,
            message: error.message,
            tick,
        });
    }
}

#[derive(Clone, Copy)]
struct ScriptLimits {
    max_operations: u64,
    max_call_levels: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: env_u64(
                "GRIDWRIGHT_RHAI_MAX_OPERATIONS",
                crate::scripting::DEFAULT_RHAI_MAX_OPERATIONS,
            )
            .max(10_000),
            max_call_levels: env_u64(
                "GRIDWRIGHT_RHAI_MAX_CALL_LEVELS",
                crate::scripting::DEFAULT_RHAI_MAX_CALL_LEVELS as u64,
            )
            .max(8) as usize,
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn script_limits() -> &'static ScriptLimits {
    static LIMITS: OnceLock<ScriptLimits> = OnceLock::new();
    LIMITS.get_or_init(ScriptLimits::default)
}

/// Builds the engine map scripts run in, with the host API bound to `host`.
pub fn make_rhai_engine(host: &ScriptHost) -> Engine {
    let limits = script_limits();
    let mut engine = Engine::new();
    engine.set_max_operations(limits.max_operations);
    engine.set_max_call_levels(limits.max_call_levels);

    let h = host.clone();
    engine.on_print(move |text| h.borrow_mut().push_log(text));

    let h = host.clone();
    engine.register_fn("log", move |text: ImmutableString| {
        h.borrow_mut().push_log(text.as_str());
    });

    let h = host.clone();
    engine.register_fn("set_var", move |name: ImmutableString, value: Dynamic| {
        h.borrow_mut().vars.insert(name.to_string(), value);
    });

    let h = host.clone();
    engine.register_fn("get_var", move |name: ImmutableString| -> Dynamic {
        h.borrow()
            .var(name.as_str())
            .cloned()
            .unwrap_or(Dynamic::UNIT)
    });

    let h = host.clone();
    engine.register_fn(
        "set_tile",
        move |x: INT, y: INT, layer: INT, sprite_type: ImmutableString, walkable: bool| {
            h.borrow_mut().commands.push(ScriptCommand::SetTile {
                x,
                y,
                layer,
                sprite_type: sprite_type.to_string(),
                walkable,
            });
        },
    );

    let h = host.clone();
    engine.register_fn("remove_tile", move |x: INT, y: INT, layer: INT| {
        h.borrow_mut()
            .commands
            .push(ScriptCommand::RemoveTile { x, y, layer });
    });

    let h = host.clone();
    engine.register_fn("teleport", move |x: INT, y: INT| {
        h.borrow_mut().commands.push(ScriptCommand::Teleport { x, y });
    });

    let h = host.clone();
    engine.register_fn("face", move |direction: ImmutableString| {
        h.borrow_mut()
            .commands
            .push(ScriptCommand::Face(direction.to_string()));
    });

    engine
}

/// The rhai-backed script execution capability.
pub struct RhaiCompiler {
    engine: Rc<Engine>,
}

impl RhaiCompiler {
    pub fn new(host: &ScriptHost) -> Self {
        Self::with_engine(make_rhai_engine(host))
    }

    pub fn with_engine(engine: Engine) -> Self {
        Self {
            engine: Rc::new(engine),
        }
    }
}

impl Compiler for RhaiCompiler {
    fn compile(&self, source: &str) -> Result<Box<dyn Invocable>, CompileError> {
        let ast = self.engine.compile(source).map_err(|err| CompileError {
            message: err.0.to_string(),
            line: err.1.line(),
        })?;
        let engine = self.engine.clone();
        Ok(Box::new(move || {
            engine.run_ast(&ast).map_err(|err| err.to_string())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridDims;
    use crate::scripting::api::new_script_host;
    use crate::scripting::{ScriptMethod, ScriptTable};
    use std::cell::Cell as Counter;

    #[test]
    fn syntax_errors_carry_a_line() {
        let host = new_script_host();
        let compiler = RhaiCompiler::new(&host);
        let err = compiler
            .compile("let a = 1;\nlet = ;")
            .err()
            .expect("invalid source");
        assert_eq!(err.line, Some(2));
        assert!(!err.message.is_empty());
    }

    #[test]
    fn host_functions_reach_shared_state() {
        let host = new_script_host();
        let compiler = RhaiCompiler::new(&host);
        let action = compiler
            .compile(
                r#"
let n = get_var("visits");
if type_of(n) == "()" { n = 0; }
set_var("visits", n + 1);
log("visited " + (n + 1));
print("done");
set_tile(1, 2, 0, "door", false);
remove_tile(1, 2, 1);
teleport(4, 4);
face("left");
"#,
            )
            .expect("compiles");
        action.invoke().expect("first run");
        action.invoke().expect("second run");

        let state = host.borrow();
        assert_eq!(
            state.var("visits").and_then(|v| v.as_int().ok()),
            Some(2)
        );
        assert_eq!(
            state.log.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["visited 1", "done", "visited 2", "done"]
        );
        assert_eq!(state.commands.len(), 8);
        assert_eq!(
            state.commands[0],
            ScriptCommand::SetTile {
                x: 1,
                y: 2,
                layer: 0,
                sprite_type: "door".to_string(),
                walkable: false
            }
        );
        assert_eq!(state.commands[3], ScriptCommand::Face("left".to_string()));
    }

    #[test]
    fn runaway_script_is_stopped_with_an_error() {
        let host = new_script_host();
        let compiler = RhaiCompiler::new(&host);
        let action = compiler.compile("loop { }").expect("compiles");
        assert!(action.invoke().is_err());
    }

    #[test]
    fn action_side_effect_once_per_run_and_never_when_compile_fails() {
        let host = new_script_host();
        let flips = Rc::new(Counter::new(0u32));
        let mut engine = make_rhai_engine(&host);
        let counter = flips.clone();
        engine.register_fn("set", move |_value: bool| counter.set(counter.get() + 1));
        let compiler = RhaiCompiler::with_engine(engine);

        let mut table = ScriptTable::new(GridDims::new(20, 15, 32.0));
        let mut errors = ScriptErrors::default();
        table
            .create_script(2, 2, ScriptMethod::Action, "set(true)")
            .expect("in bounds");
        assert_eq!(table.compile(2, 2, &compiler), Ok(true));
        assert!(table.run(2, 2, &mut errors));
        assert_eq!(flips.get(), 1);
        table.run(2, 2, &mut errors);
        assert_eq!(flips.get(), 2);

        table
            .create_script(3, 3, ScriptMethod::Action, "set(true")
            .expect("in bounds");
        assert!(table.compile(3, 3, &compiler).is_err());
        assert!(!table.run(3, 3, &mut errors));
        assert_eq!(flips.get(), 2);
        assert!(errors.entries.is_empty());
    }

    #[test]
    fn unknown_function_is_a_runtime_error_logged_per_cell() {
        let host = new_script_host();
        let compiler = RhaiCompiler::new(&host);
        let mut table = ScriptTable::new(GridDims::new(4, 4, 16.0));
        let mut errors = ScriptErrors::default();
        table
            .create_script(1, 1, ScriptMethod::Action, "explode()")
            .expect("in bounds");
        table.compile(1, 1, &compiler).expect("parses");
        table.run(1, 1, &mut errors);
        assert_eq!(errors.entries.len(), 1);
        assert_eq!(errors.entries[0].cell, Cell::new(1, 1));
    }

    #[test]
    fn error_ring_is_bounded() {
        let mut errors = ScriptErrors::default();
        for i in 0..(MAX_SCRIPT_ERRORS + 5) {
            errors.report(ScriptRuntimeError {
                cell: Cell::new(i as i32, 0),
                message: "x".into(),
            });
        }
        assert_eq!(errors.entries.len(), MAX_SCRIPT_ERRORS);
        assert_eq!(errors.latest(1)[0].cell, Cell::new(MAX_SCRIPT_ERRORS as i32 + 4, 0));
    }
}
