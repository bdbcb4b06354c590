use bevy::prelude::*;

use crate::components::GameConfig;
use crate::events::{EditorEvent, EditorEventBus};
use crate::grid::{Cell, TileLayer};
use crate::input::VirtualInput;
use crate::persistence::{MapDocument, MapStore, StorageError};
use crate::player::{Direction, MoveOutcome, PlayerController};
use crate::script_editor::{EditorClose, EditorCloseState, FileScriptEditor, ScriptEditor};
use crate::scripting::api::{new_script_host, ScriptCommand, ScriptHost};
use crate::scripting::{
    Compiler, RhaiCompiler, ScriptErrors, ScriptLog, ScriptMethod, ScriptRuntimeError,
};
use crate::state_machine::{EditorState, InteractionMode, SessionCommand};
use crate::storage::{StorageCompletion, StorageWorker};
use crate::tilemap::TileOptions;
use crate::world::{LoadReport, World};

/// Runs once per frame, before anything reads the session.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionTick;

pub struct SessionPlugin;

impl Plugin for SessionPlugin {
    fn build(&self, app: &mut App) {
        let config = app
            .world()
            .get_resource::<GameConfig>()
            .cloned()
            .unwrap_or_default();
        let mut session = EditorSession::new(config);
        session.start();
        // The script engine holds `Rc` state, so the session stays on the main thread.
        app.insert_non_send_resource(session)
            .add_systems(Update, drive_session.in_set(SessionTick));
    }
}

fn drive_session(
    mut session: NonSendMut<EditorSession>,
    input: Res<VirtualInput>,
    time: Res<Time>,
) {
    session.tick(&input, time.elapsed_secs_f64() * 1000.0);
}

/// The cell whose script is in the external editor.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct OpenEdit {
    pub cell: Cell,
    pub new_script: bool,
}

/// Routes script failures to the HUD ring and the event bus.
struct SessionLog<'a> {
    errors: &'a mut ScriptErrors,
    events: &'a mut EditorEventBus,
}

impl ScriptLog for SessionLog<'_> {
    fn report(&mut self, error: ScriptRuntimeError) {
        self.events.emit(EditorEvent::ScriptError {
            cell: error.cell,
            message: error.message.clone(),
        });
        self.errors.report(error);
    }
}

/// Everything one editing session owns: the world, the player, the mode
/// state and the collaborators that talk to disk and to the script engine.
pub struct EditorSession {
    config: GameConfig,
    world: World,
    player: PlayerController,
    editor: EditorState,
    host: ScriptHost,
    compiler: Box<dyn Compiler>,
    script_errors: ScriptErrors,
    events: EditorEventBus,
    storage: StorageWorker,
    script_editor: Box<dyn ScriptEditor>,
    open_edit: Option<OpenEdit>,
    last_storage_error: Option<StorageError>,
    saving: bool,
    save_queued: bool,
}

impl EditorSession {
    pub fn new(config: GameConfig) -> Self {
        let host = new_script_host();
        let compiler = Box::new(RhaiCompiler::new(&host));
        let editor = Box::new(FileScriptEditor::new(config.scripts_dir.clone()));
        Self::with_parts(config, host, compiler, editor)
    }

    pub fn with_parts(
        config: GameConfig,
        host: ScriptHost,
        compiler: Box<dyn Compiler>,
        script_editor: Box<dyn ScriptEditor>,
    ) -> Self {
        let world = World::new(config.grid_width, config.grid_height, config.tile_size);
        let spawn = Cell::new(config.player_spawn[0], config.player_spawn[1]);
        let player = PlayerController::new(spawn, config.move_repeat_ms);
        let editor = EditorState::new(config.sprite_types.clone());
        let storage = StorageWorker::new(MapStore::new(config.maps_dir.clone()));
        Self {
            config,
            world,
            player,
            editor,
            host,
            compiler,
            script_errors: ScriptErrors::default(),
            events: EditorEventBus::default(),
            storage,
            script_editor,
            open_edit: None,
            last_storage_error: None,
            saving: false,
            save_queued: false,
        }
    }

    /// Kicks off loading the configured map.
    pub fn start(&mut self) {
        let name = self.config.map_name.clone();
        if let Err(e) = self.begin_load(&name) {
            warn!("[Gridwright] Initial load of '{name}' not started: {e}");
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn player(&self) -> &PlayerController {
        &self.player
    }

    pub fn editor(&self) -> &EditorState {
        &self.editor
    }

    pub fn mode(&self) -> InteractionMode {
        self.editor.mode()
    }

    pub fn host(&self) -> &ScriptHost {
        &self.host
    }

    pub fn script_errors(&self) -> &ScriptErrors {
        &self.script_errors
    }

    pub fn events(&self) -> &EditorEventBus {
        &self.events
    }

    pub fn pending_storage(&self) -> usize {
        self.storage.in_flight()
    }

    pub fn last_storage_error(&self) -> Option<&StorageError> {
        self.last_storage_error.as_ref()
    }

    pub fn open_edit(&self) -> Option<OpenEdit> {
        self.open_edit
    }

    /// One frame: storage completions, then the editor, then input.
    pub fn tick(&mut self, input: &VirtualInput, now_ms: f64) {
        self.events.advance_frame();
        self.script_errors.tick = self.script_errors.tick.saturating_add(1);

        for completion in self.storage.poll() {
            self.handle_completion(completion);
        }

        if self.script_editor.is_open() {
            if let Some(close) = self.script_editor.poll_close(input) {
                self.finish_edit(close);
            }
            return;
        }

        let before = self.editor.mode();
        let commands = self
            .editor
            .handle_input(input, self.world.dims(), self.config.grid_offset());
        let after = self.editor.mode();
        if after != before {
            info!("[Gridwright] Mode: {after}");
            self.events.emit(EditorEvent::ModeChanged {
                from: before.to_string(),
                to: after.to_string(),
            });
        }

        for command in commands {
            self.apply(command, now_ms);
        }
    }

    fn apply(&mut self, command: SessionCommand, now_ms: f64) {
        match command {
            SessionCommand::Save => {
                if let Err(e) = self.save() {
                    warn!("[Gridwright storage] Save ignored: {e}");
                }
            }
            SessionCommand::Reload => {
                let name = self.config.map_name.clone();
                if let Err(e) = self.begin_load(&name) {
                    warn!("[Gridwright storage] Reload ignored: {e}");
                }
            }
            SessionCommand::Step { dx, dy } => {
                let outcome = self.player.request_step(dx, dy, &self.world, now_ms);
                if let MoveOutcome::Moved(cell) = outcome {
                    if self.config.touch_scripts_fire_on_enter {
                        self.run_script_at(cell, ScriptMethod::Touch);
                    }
                }
            }
            SessionCommand::ReleaseMovement => self.player.release(),
            SessionCommand::Face(direction) => self.player.set_direction(direction),
            SessionCommand::Trigger => {
                if self.editor.mode() != InteractionMode::Play {
                    return;
                }
                if let Some(cell) = self.player.facing_cell(self.world.dims()) {
                    self.run_script_at(cell, ScriptMethod::Action);
                }
            }
            SessionCommand::Paint {
                cell,
                layer,
                sprite_type,
                walkable,
            } => {
                let options = TileOptions {
                    walkable,
                    source: self.config.atlas_source.clone(),
                };
                if let Err(e) = self.world.create_tile(cell.x, cell.y, layer, sprite_type, options) {
                    warn!("[Gridwright] Paint at {cell} refused: {e}");
                }
            }
            SessionCommand::Erase { cell, layer } => {
                if let Err(e) = self.world.remove_tile(cell.x, cell.y, layer) {
                    warn!("[Gridwright] Erase at {cell} refused: {e}");
                }
            }
            SessionCommand::EditScript(cell) => self.open_script_editor(cell),
        }
    }

    /// Starts an asynchronous load. The world stays locked until it completes.
    pub fn begin_load(&mut self, name: &str) -> Result<(), StorageError> {
        if self.world.is_locked() {
            return Err(StorageError::Busy);
        }
        self.world.lock();
        self.storage.begin_load(name);
        Ok(())
    }

    /// Saves a snapshot of the world and the player envelope. Refused while a
    /// load is in flight. A save asked for during another save runs when that
    /// one completes, with a fresh snapshot.
    pub fn save(&mut self) -> Result<(), StorageError> {
        if self.world.is_locked() {
            return Err(StorageError::Busy);
        }
        if self.saving {
            self.save_queued = true;
            return Ok(());
        }
        let document: MapDocument = self.world.to_document(Some(self.player.envelope()));
        let name = self.config.map_name.clone();
        self.storage.begin_save(&name, document);
        self.saving = true;
        Ok(())
    }

    fn handle_completion(&mut self, completion: StorageCompletion) {
        match completion {
            StorageCompletion::Loaded { name, result } => self.finish_load(&name, result),
            StorageCompletion::Saved { name, result } => {
                self.saving = false;
                match result {
                    Ok(path) => {
                        info!("[Gridwright storage] Map was successfully saved to {}", path.display());
                        self.last_storage_error = None;
                        self.events.emit(EditorEvent::MapSaved {
                            name,
                            path: path.display().to_string(),
                        });
                    }
                    Err(e) => {
                        error!("[Gridwright storage] Failed to save '{name}': {e}");
                        self.last_storage_error = Some(e);
                    }
                }
                if std::mem::take(&mut self.save_queued) {
                    if let Err(e) = self.save() {
                        warn!("[Gridwright storage] Queued save dropped: {e}");
                    }
                }
            }
        }
    }

    fn finish_load(&mut self, name: &str, result: Result<Option<MapDocument>, StorageError>) {
        self.world.unlock();
        let outcome = match result {
            Ok(Some(document)) => self.world.apply_document(document, self.compiler.as_ref()),
            Ok(None) => {
                info!("[Gridwright storage] No map named '{name}', starting empty");
                self.world.reset();
                Ok(LoadReport::default())
            }
            Err(e) => Err(e),
        };
        let report = match outcome {
            Ok(report) => report,
            Err(e) => {
                error!("[Gridwright storage] Failed to load '{name}': {e}");
                self.last_storage_error = Some(e);
                return;
            }
        };

        if let Some(envelope) = report.player {
            if self.world.dims().in_bounds(envelope.x, envelope.y) {
                self.player.apply_envelope(&envelope);
            } else {
                warn!(
                    "[Gridwright storage] Saved player position ({}, {}) is off the grid, keeping current",
                    envelope.x, envelope.y
                );
            }
        }
        let mut log = SessionLog {
            errors: &mut self.script_errors,
            events: &mut self.events,
        };
        for (cell, err) in &report.compile_errors {
            log.report(ScriptRuntimeError {
                cell: *cell,
                message: format!("compile error: {err}"),
            });
            self.script_editor.report_compile_error(*cell, err);
        }
        info!(
            "[Gridwright storage] Loaded '{name}': {} tiles, {} scripts",
            report.tiles, report.scripts
        );
        self.last_storage_error = None;
        self.events.emit(EditorEvent::MapLoaded {
            name: name.to_string(),
            tiles: report.tiles,
            scripts: report.scripts,
            compile_errors: report.compile_errors.len(),
        });
    }

    /// Runs the script at `cell` if it has the given method, then applies the
    /// world edits it queued.
    fn run_script_at(&mut self, cell: Cell, method: ScriptMethod) {
        match self.world.get_script(cell.x, cell.y) {
            Some(script) if script.method == method => {}
            _ => return,
        }
        let mut log = SessionLog {
            errors: &mut self.script_errors,
            events: &mut self.events,
        };
        self.world.run_script(cell.x, cell.y, &mut log);
        self.apply_script_commands(cell);
    }

    fn apply_script_commands(&mut self, origin: Cell) {
        let commands = self.host.borrow_mut().take_commands();
        for command in commands {
            if let Err(message) = self.apply_script_command(command) {
                let mut log = SessionLog {
                    errors: &mut self.script_errors,
                    events: &mut self.events,
                };
                log.report(ScriptRuntimeError {
                    cell: origin,
                    message,
                });
            }
        }
    }

    fn apply_script_command(&mut self, command: ScriptCommand) -> Result<(), String> {
        match command {
            ScriptCommand::SetTile {
                x,
                y,
                layer,
                sprite_type,
                walkable,
            } => {
                let (x, y) = script_cell(x, y)?;
                let layer = script_layer(layer)?;
                let options = TileOptions {
                    walkable,
                    source: self.config.atlas_source.clone(),
                };
                self.world
                    .create_tile(x, y, layer, sprite_type, options)
                    .map(|_| ())
                    .map_err(|e| format!("set_tile: {e}"))
            }
            ScriptCommand::RemoveTile { x, y, layer } => {
                let (x, y) = script_cell(x, y)?;
                let layer = script_layer(layer)?;
                self.world
                    .remove_tile(x, y, layer)
                    .map(|_| ())
                    .map_err(|e| format!("remove_tile: {e}"))
            }
            ScriptCommand::Teleport { x, y } => {
                let (x, y) = script_cell(x, y)?;
                if !self.world.dims().in_bounds(x, y) {
                    return Err(format!("teleport: cell ({x}, {y}) is outside the grid"));
                }
                self.player.set_position(x, y);
                Ok(())
            }
            ScriptCommand::Face(name) => {
                let direction = Direction::parse(&name)
                    .ok_or_else(|| format!("face: unknown direction '{name}'"))?;
                self.player.set_direction(direction);
                Ok(())
            }
        }
    }

    fn open_script_editor(&mut self, cell: Cell) {
        if self.world.is_locked() {
            warn!("[Gridwright editor] Map is loading, not opening {cell}");
            return;
        }
        let new_script = self.world.get_script(cell.x, cell.y).is_none();
        if new_script {
            if let Err(e) = self.world.create_script(cell.x, cell.y, ScriptMethod::Touch, "") {
                warn!("[Gridwright editor] Cannot create script at {cell}: {e}");
                return;
            }
        }
        let (method, body) = match self.world.get_script(cell.x, cell.y) {
            Some(script) => (script.method, script.body.clone()),
            None => return,
        };
        match self.script_editor.open(cell, method, &body) {
            Ok(()) => self.open_edit = Some(OpenEdit { cell, new_script }),
            Err(e) => {
                warn!("[Gridwright editor] Failed to open editor for {cell}: {e}");
                if new_script {
                    if let Err(e) = self.world.remove_script(cell.x, cell.y) {
                        warn!("[Gridwright editor] Could not drop new script at {cell}: {e}");
                    }
                }
            }
        }
    }

    fn finish_edit(&mut self, close: EditorClose) {
        let Some(edit) = self.open_edit.take() else {
            return;
        };
        let cell = edit.cell;
        match close.state {
            EditorCloseState::Save => {
                match self.world.save_script(
                    cell.x,
                    cell.y,
                    close.method,
                    close.body,
                    self.compiler.as_ref(),
                ) {
                    Ok(compiled) => {
                        let error = compiled.err();
                        if let Some(err) = &error {
                            self.script_editor.report_compile_error(cell, err);
                            SessionLog {
                                errors: &mut self.script_errors,
                                events: &mut self.events,
                            }
                            .report(ScriptRuntimeError {
                                cell,
                                message: format!("compile error: {err}"),
                            });
                        }
                        self.events.emit(EditorEvent::ScriptSaved {
                            cell,
                            method: close.method,
                            error: error.map(|e| e.to_string()),
                        });
                    }
                    Err(e) => warn!("[Gridwright editor] Save of {cell} refused: {e}"),
                }
            }
            EditorCloseState::Cancel => {
                if edit.new_script && close.body.is_empty() {
                    self.remove_script(cell);
                }
            }
            EditorCloseState::Remove => self.remove_script(cell),
        }
    }

    fn remove_script(&mut self, cell: Cell) {
        match self.world.remove_script(cell.x, cell.y) {
            Ok(Some(_)) => self.events.emit(EditorEvent::ScriptRemoved { cell }),
            Ok(None) => {}
            Err(e) => warn!("[Gridwright editor] Removing {cell} refused: {e}"),
        }
    }

    #[cfg(test)]
    fn wait_for_storage(&mut self) {
        let completion = self
            .storage
            .wait(std::time::Duration::from_secs(5))
            .expect("storage completion");
        self.handle_completion(completion);
    }
}

fn script_cell(x: i64, y: i64) -> Result<(i32, i32), String> {
    match (i32::try_from(x), i32::try_from(y)) {
        (Ok(x), Ok(y)) => Ok((x, y)),
        _ => Err(format!("cell ({x}, {y}) is outside the grid")),
    }
}

fn script_layer(layer: i64) -> Result<TileLayer, String> {
    TileLayer::from_i64(layer).ok_or_else(|| format!("layer {layer} is not a tile layer"))
}
