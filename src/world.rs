use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use bevy::log::info;

use crate::grid::{Cell, GridDims, GridError, TileLayer};
use crate::persistence::{MapDocument, MapStore, PlayerEnvelope, SavedScript, SavedTile, StorageError};
use crate::scripting::{CompileError, Compiler, Script, ScriptLog, ScriptMethod, ScriptTable};
use crate::tilemap::{Tile, TileChange, TileKey, TileOptions, TileRegistry};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WorldError {
    OutOfBounds { x: i32, y: i32 },
    /// A map load is in flight; the world is read-only until it completes.
    Locked,
}

impl fmt::Display for WorldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorldError::OutOfBounds { x, y } => write!(f, "cell ({x}, {y}) is outside the grid"),
            WorldError::Locked => f.write_str("world is locked while a map loads"),
        }
    }
}

impl std::error::Error for WorldError {}

impl From<GridError> for WorldError {
    fn from(err: GridError) -> Self {
        match err {
            GridError::OutOfBounds { x, y } => WorldError::OutOfBounds { x, y },
        }
    }
}

/// Result of applying a map document.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub player: Option<PlayerEnvelope>,
    pub tiles: usize,
    pub scripts: usize,
    pub compile_errors: Vec<(Cell, CompileError)>,
}

/// Tiles and scripts on a fixed-size grid.
pub struct World {
    dims: GridDims,
    tiles: TileRegistry,
    scripts: ScriptTable,
    locked: bool,
}

impl World {
    pub fn new(width: u32, height: u32, tile_size: f32) -> Self {
        let dims = GridDims::new(width, height, tile_size);
        Self {
            dims,
            tiles: TileRegistry::new(dims),
            scripts: ScriptTable::new(dims),
            locked: false,
        }
    }

    pub fn dims(&self) -> &GridDims {
        &self.dims
    }

    pub fn tiles(&self) -> &TileRegistry {
        &self.tiles
    }

    pub fn scripts(&self) -> &ScriptTable {
        &self.scripts
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub(crate) fn lock(&mut self) {
        self.locked = true;
    }

    pub(crate) fn unlock(&mut self) {
        self.locked = false;
    }

    fn ensure_unlocked(&self) -> Result<(), WorldError> {
        if self.locked {
            Err(WorldError::Locked)
        } else {
            Ok(())
        }
    }

    pub fn create_tile(
        &mut self,
        x: i32,
        y: i32,
        layer: TileLayer,
        sprite_type: impl Into<String>,
        options: TileOptions,
    ) -> Result<&Tile, WorldError> {
        self.ensure_unlocked()?;
        Ok(self.tiles.create_tile(x, y, layer, sprite_type, options)?)
    }

    pub fn remove_tile(&mut self, x: i32, y: i32, layer: TileLayer) -> Result<Option<Tile>, WorldError> {
        self.ensure_unlocked()?;
        self.dims.check(x, y)?;
        Ok(self.tiles.remove_tile(x, y, layer))
    }

    pub fn get_tile(&self, x: i32, y: i32, layer: Option<TileLayer>) -> Option<&Tile> {
        self.tiles.get_tile(x, y, layer)
    }

    pub fn is_walkable(&self, x: i32, y: i32) -> bool {
        self.tiles.is_walkable(x, y)
    }

    pub fn create_script(
        &mut self,
        x: i32,
        y: i32,
        method: ScriptMethod,
        body: impl Into<String>,
    ) -> Result<&mut Script, WorldError> {
        self.ensure_unlocked()?;
        Ok(self.scripts.create_script(x, y, method, body)?)
    }

    /// Store and compile in one go, as the script editor does on save. The
    /// script is kept even when compilation fails; the error is returned.
    pub fn save_script(
        &mut self,
        x: i32,
        y: i32,
        method: ScriptMethod,
        body: impl Into<String>,
        compiler: &dyn Compiler,
    ) -> Result<Result<bool, CompileError>, WorldError> {
        self.create_script(x, y, method, body)?;
        self.compile_script(x, y, compiler)
    }

    pub fn compile_script(
        &mut self,
        x: i32,
        y: i32,
        compiler: &dyn Compiler,
    ) -> Result<Result<bool, CompileError>, WorldError> {
        self.ensure_unlocked()?;
        self.dims.check(x, y)?;
        Ok(self.scripts.compile(x, y, compiler))
    }

    pub fn get_script(&self, x: i32, y: i32) -> Option<&Script> {
        self.scripts.get_script(x, y)
    }

    pub fn remove_script(&mut self, x: i32, y: i32) -> Result<Option<Script>, WorldError> {
        self.ensure_unlocked()?;
        self.dims.check(x, y)?;
        Ok(self.scripts.remove_script(x, y))
    }

    pub fn run_script(&self, x: i32, y: i32, log: &mut dyn ScriptLog) -> bool {
        self.scripts.run(x, y, log)
    }

    pub fn drain_tile_changes(&mut self) -> Vec<TileChange> {
        self.tiles.drain_changes()
    }

    /// Snapshot of everything persistable. Compiled actions are not part of it.
    pub fn to_document(&self, player: Option<PlayerEnvelope>) -> MapDocument {
        let mut tiles: Vec<SavedTile> = self
            .tiles
            .iter()
            .map(|(key, tile)| SavedTile {
                x: key.cell.x,
                y: key.cell.y,
                layer: key.layer.index() as i64,
                sprite_type: tile.sprite_type.clone(),
                walkable: tile.walkable,
                source: tile.source.clone(),
            })
            .collect();
        tiles.sort_by_key(|t| (t.layer, t.y, t.x));
        let mut scripts: Vec<SavedScript> = self
            .scripts
            .iter()
            .map(|(cell, script)| SavedScript {
                x: cell.x,
                y: cell.y,
                method: script.method,
                body: script.body.clone(),
            })
            .collect();
        scripts.sort_by_key(|s| (s.y, s.x));
        MapDocument {
            player,
            tiles,
            scripts,
        }
    }

    /// Replaces all tiles and scripts with the document's. The document is
    /// validated first; on error nothing changes.
    pub fn apply_document(
        &mut self,
        document: MapDocument,
        compiler: &dyn Compiler,
    ) -> Result<LoadReport, StorageError> {
        let (tiles, scripts) = self.validate(document.tiles, document.scripts)?;
        let report_counts = (tiles.len(), scripts.len());
        self.tiles.replace_all(tiles);
        let compile_errors = self.scripts.replace_all(scripts, compiler);
        Ok(LoadReport {
            player: document.player,
            tiles: report_counts.0,
            scripts: report_counts.1,
            compile_errors,
        })
    }

    /// Empties the world, as when a named map does not exist yet.
    pub fn reset(&mut self) {
        self.tiles.clear();
        self.scripts.clear();
    }

    fn validate(
        &self,
        tiles: Vec<SavedTile>,
        scripts: Vec<SavedScript>,
    ) -> Result<(Vec<(TileKey, Tile)>, Vec<(Cell, Script)>), StorageError> {
        let mut seen_tiles = HashSet::new();
        let mut out_tiles = Vec::with_capacity(tiles.len());
        for saved in tiles {
            let cell = self.dims.check(saved.x, saved.y).map_err(malformed)?;
            let layer = TileLayer::from_i64(saved.layer).ok_or_else(|| {
                StorageError::Malformed(format!("tile at {cell} has invalid layer {}", saved.layer))
            })?;
            let key = TileKey { cell, layer };
            if !seen_tiles.insert(key) {
                return Err(StorageError::Malformed(format!(
                    "duplicate tile at {cell} on layer {layer}"
                )));
            }
            out_tiles.push((
                key,
                Tile {
                    sprite_type: saved.sprite_type,
                    walkable: saved.walkable,
                    source: saved.source,
                },
            ));
        }

        let mut seen_scripts = HashSet::new();
        let mut out_scripts = Vec::with_capacity(scripts.len());
        for saved in scripts {
            let cell = self.dims.check(saved.x, saved.y).map_err(malformed)?;
            if !seen_scripts.insert(cell) {
                return Err(StorageError::Malformed(format!("duplicate script at {cell}")));
            }
            out_scripts.push((cell, Script::new(saved.method, saved.body)));
        }
        Ok((out_tiles, out_scripts))
    }

    /// Blocking load. A missing document empties the world and reports no player.
    pub fn load(
        &mut self,
        store: &MapStore,
        name: &str,
        compiler: &dyn Compiler,
    ) -> Result<LoadReport, StorageError> {
        if self.locked {
            return Err(StorageError::Busy);
        }
        match store.read(name)? {
            Some(document) => self.apply_document(document, compiler),
            None => {
                info!("[Gridwright storage] No map named '{name}', starting empty");
                self.reset();
                Ok(LoadReport::default())
            }
        }
    }

    /// Blocking save of the whole world plus the player envelope.
    pub fn save(
        &self,
        store: &MapStore,
        name: &str,
        player: Option<PlayerEnvelope>,
    ) -> Result<PathBuf, StorageError> {
        store.write(name, &self.to_document(player))
    }
}

fn malformed(err: GridError) -> StorageError {
    StorageError::Malformed(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::Direction;
    use crate::scripting::api::new_script_host;
    use crate::scripting::RhaiCompiler;

    fn wall() -> TileOptions {
        TileOptions {
            walkable: false,
            ..Default::default()
        }
    }

    #[test]
    fn grass_then_wall_scenario() {
        let mut world = World::new(20, 15, 32.0);
        world
            .create_tile(3, 4, TileLayer::GROUND, "grass", TileOptions::default())
            .expect("grass");
        let top = world.get_tile(3, 4, None).expect("grass");
        assert_eq!((top.sprite_type.as_str(), top.walkable), ("grass", true));

        world
            .create_tile(3, 4, TileLayer::MIDDLE, "wall", wall())
            .expect("wall");
        let top = world.get_tile(3, 4, None).expect("wall");
        assert_eq!((top.sprite_type.as_str(), top.walkable), ("wall", false));
        assert_eq!(world.dims().tile_size(), 32.0);
    }

    #[test]
    fn save_then_load_reconstructs_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MapStore::new(dir.path());
        let host = new_script_host();
        let compiler = RhaiCompiler::new(&host);

        let mut world = World::new(20, 15, 32.0);
        world
            .create_tile(0, 0, TileLayer::GROUND, "grass", TileOptions::default())
            .expect("grass");
        world
            .create_tile(19, 14, TileLayer::TOP, "roof", wall())
            .expect("roof");
        world
            .save_script(2, 2, ScriptMethod::Action, "log(\"hi\")", &compiler)
            .expect("in bounds")
            .expect("compiles");
        world
            .create_script(4, 4, ScriptMethod::Touch, "")
            .expect("in bounds");
        let envelope = PlayerEnvelope {
            x: 5,
            y: 3,
            direction: Direction::Right,
        };
        let saved = world.to_document(Some(envelope));
        world.save(&store, "map", Some(envelope)).expect("save");

        let mut loaded = World::new(20, 15, 32.0);
        loaded
            .create_tile(7, 7, TileLayer::GROUND, "stale", TileOptions::default())
            .expect("stale");
        let report = loaded.load(&store, "map", &compiler).expect("load");
        assert_eq!(report.player, Some(envelope));
        assert_eq!((report.tiles, report.scripts), (2, 2));
        assert!(report.compile_errors.is_empty());
        assert_eq!(loaded.to_document(Some(envelope)), saved);
        assert!(loaded.get_tile(7, 7, None).is_none());
        assert!(loaded.get_script(2, 2).expect("script").is_compiled());
        assert!(!loaded.get_script(4, 4).expect("script").is_compiled());
    }

    #[test]
    fn missing_map_empties_world_without_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MapStore::new(dir.path());
        let compiler = RhaiCompiler::new(&new_script_host());
        let mut world = World::new(4, 4, 16.0);
        world
            .create_tile(1, 1, TileLayer::GROUND, "grass", TileOptions::default())
            .expect("grass");
        let report = world.load(&store, "absent", &compiler).expect("not an error");
        assert!(report.player.is_none());
        assert!(world.tiles().is_empty());
        assert!(world.scripts().is_empty());
    }

    #[test]
    fn malformed_document_leaves_world_unchanged() {
        let compiler = RhaiCompiler::new(&new_script_host());
        let mut world = World::new(4, 4, 16.0);
        world
            .create_tile(1, 1, TileLayer::GROUND, "grass", TileOptions::default())
            .expect("grass");
        world.drain_tile_changes();

        let doc: MapDocument = serde_json::from_value(serde_json::json!({
            "tiles": [
                { "x": 0, "y": 0, "layer": 0, "type": "sand" },
                { "x": 9, "y": 0, "layer": 0, "type": "sand" }
            ]
        }))
        .expect("shape is fine");
        assert!(matches!(
            world.apply_document(doc, &compiler),
            Err(StorageError::Malformed(_))
        ));
        assert_eq!(world.tiles().len(), 1);
        assert!(world.get_tile(0, 0, None).is_none());
        assert!(world.drain_tile_changes().is_empty());

        let bad_layer: MapDocument = serde_json::from_value(serde_json::json!({
            "tiles": [{ "x": 0, "y": 0, "layer": 3, "type": "sand" }]
        }))
        .expect("shape is fine");
        assert!(world.apply_document(bad_layer, &compiler).is_err());
    }

    #[test]
    fn broken_script_in_document_loads_without_invocable() {
        let compiler = RhaiCompiler::new(&new_script_host());
        let mut world = World::new(4, 4, 16.0);
        let doc = MapDocument {
            player: None,
            tiles: vec![],
            scripts: vec![SavedScript {
                x: 1,
                y: 2,
                method: ScriptMethod::Action,
                body: "let = ;".into(),
            }],
        };
        let report = world.apply_document(doc, &compiler).expect("applies");
        assert_eq!(report.compile_errors.len(), 1);
        let script = world.get_script(1, 2).expect("kept");
        assert!(!script.is_compiled());
        assert_eq!(script.body, "let = ;");
    }

    #[test]
    fn locked_world_rejects_mutation() {
        let mut world = World::new(4, 4, 16.0);
        world.lock();
        assert_eq!(
            world
                .create_tile(0, 0, TileLayer::GROUND, "grass", TileOptions::default())
                .err(),
            Some(WorldError::Locked)
        );
        assert_eq!(world.remove_script(0, 0).err(), Some(WorldError::Locked));
        world.unlock();
        assert!(world.remove_tile(0, 0, TileLayer::GROUND).expect("unlocked").is_none());
    }

    #[test]
    fn out_of_bounds_maps_to_world_error() {
        let compiler = RhaiCompiler::new(&new_script_host());
        let mut world = World::new(4, 4, 16.0);
        let off_grid = Some(WorldError::OutOfBounds { x: 4, y: 0 });
        assert_eq!(world.create_script(4, 0, ScriptMethod::Touch, "").err(), off_grid);
        assert_eq!(world.remove_script(4, 0).err(), off_grid);
        assert_eq!(world.remove_tile(4, 0, TileLayer::TOP).err(), off_grid);
        assert_eq!(world.compile_script(4, 0, &compiler).err(), off_grid);
        assert_eq!(
            world.remove_tile(-1, 2, TileLayer::GROUND).err(),
            Some(WorldError::OutOfBounds { x: -1, y: 2 })
        );
    }

    #[test]
    fn locked_world_refuses_recompiling() {
        let compiler = RhaiCompiler::new(&new_script_host());
        let mut world = World::new(4, 4, 16.0);
        world
            .create_script(1, 1, ScriptMethod::Action, "log(\"hi\")")
            .expect("in bounds");
        world.lock();
        assert_eq!(world.compile_script(1, 1, &compiler).err(), Some(WorldError::Locked));
        assert!(!world.get_script(1, 1).expect("script").is_compiled());
        world.unlock();
        assert_eq!(world.compile_script(1, 1, &compiler), Ok(Ok(true)));
    }
}
