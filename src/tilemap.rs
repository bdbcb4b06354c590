use std::collections::HashMap;

use crate::grid::{Cell, GridDims, GridError, TileLayer};

/// A placed tile. The sprite type is a key into the named atlas.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Tile {
    pub sprite_type: String,
    pub walkable: bool,
    pub source: String,
}

#[derive(Clone, Debug)]
pub struct TileOptions {
    pub walkable: bool,
    pub source: String,
}

impl Default for TileOptions {
    fn default() -> Self {
        Self {
            walkable: true,
            source: "atlas.json".to_string(),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct TileKey {
    pub cell: Cell,
    pub layer: TileLayer,
}

impl TileKey {
    pub fn new(x: i32, y: i32, layer: TileLayer) -> Self {
        Self {
            cell: Cell::new(x, y),
            layer,
        }
    }
}

/// Pending change for whoever mirrors the registry (the renderer).
#[derive(Clone, PartialEq, Debug)]
pub enum TileChange {
    Added(TileKey, Tile),
    Removed(TileKey),
    Cleared,
}

/// Sparse tile storage across the three visual layers.
#[derive(Clone, Debug)]
pub struct TileRegistry {
    dims: GridDims,
    tiles: HashMap<TileKey, Tile>,
    changes: Vec<TileChange>,
}

impl TileRegistry {
    pub fn new(dims: GridDims) -> Self {
        Self {
            dims,
            tiles: HashMap::new(),
            changes: Vec::new(),
        }
    }

    /// Insert or overwrite the tile at (x, y, layer).
    pub fn create_tile(
        &mut self,
        x: i32,
        y: i32,
        layer: TileLayer,
        sprite_type: impl Into<String>,
        options: TileOptions,
    ) -> Result<&Tile, GridError> {
        let cell = self.dims.check(x, y)?;
        let key = TileKey { cell, layer };
        let tile = Tile {
            sprite_type: sprite_type.into(),
            walkable: options.walkable,
            source: options.source,
        };
        self.changes.push(TileChange::Added(key, tile.clone()));
        self.tiles.insert(key, tile);
        Ok(&self.tiles[&key])
    }

    pub fn remove_tile(&mut self, x: i32, y: i32, layer: TileLayer) -> Option<Tile> {
        let key = TileKey::new(x, y, layer);
        let removed = self.tiles.remove(&key)?;
        self.changes.push(TileChange::Removed(key));
        Some(removed)
    }

    /// With no layer, returns the tile on the highest populated layer.
    pub fn get_tile(&self, x: i32, y: i32, layer: Option<TileLayer>) -> Option<&Tile> {
        match layer {
            Some(layer) => self.tiles.get(&TileKey::new(x, y, layer)),
            None => self.topmost(x, y).map(|(_, tile)| tile),
        }
    }

    pub fn topmost(&self, x: i32, y: i32) -> Option<(TileLayer, &Tile)> {
        TileLayer::top_down()
            .into_iter()
            .find_map(|layer| self.tiles.get(&TileKey::new(x, y, layer)).map(|t| (layer, t)))
    }

    /// Empty cells are open floor; otherwise the topmost tile decides.
    pub fn is_walkable(&self, x: i32, y: i32) -> bool {
        self.dims.in_bounds(x, y) && self.topmost(x, y).map_or(true, |(_, t)| t.walkable)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TileKey, &Tile)> + '_ {
        self.tiles.iter().map(|(key, tile)| (*key, tile))
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn clear(&mut self) {
        self.tiles.clear();
        self.changes.clear();
        self.changes.push(TileChange::Cleared);
    }

    /// Swap in a whole new tile set. Keys must already be bounds-checked.
    pub(crate) fn replace_all(&mut self, tiles: Vec<(TileKey, Tile)>) {
        self.clear();
        for (key, tile) in tiles {
            self.changes.push(TileChange::Added(key, tile.clone()));
            self.tiles.insert(key, tile);
        }
    }

    pub fn drain_changes(&mut self) -> Vec<TileChange> {
        std::mem::take(&mut self.changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TileRegistry {
        TileRegistry::new(GridDims::new(20, 15, 32.0))
    }

    fn wall() -> TileOptions {
        TileOptions {
            walkable: false,
            ..Default::default()
        }
    }

    #[test]
    fn create_then_get_returns_matching_tile_on_every_layer() {
        let mut reg = registry();
        for layer in TileLayer::bottom_up() {
            reg.create_tile(19, 14, layer, "stone", wall()).expect("in bounds");
            let tile = reg.get_tile(19, 14, Some(layer)).expect("tile present");
            assert_eq!(tile.sprite_type, "stone");
            assert!(!tile.walkable);
            assert_eq!(tile.source, "atlas.json");
        }
    }

    #[test]
    fn create_out_of_bounds_leaves_registry_untouched() {
        let mut reg = registry();
        let err = reg
            .create_tile(20, 0, TileLayer::GROUND, "grass", TileOptions::default())
            .unwrap_err();
        assert_eq!(err, GridError::OutOfBounds { x: 20, y: 0 });
        assert!(reg.is_empty());
        assert!(reg.drain_changes().is_empty());
    }

    #[test]
    fn create_overwrites_existing_key() {
        let mut reg = registry();
        reg.create_tile(1, 1, TileLayer::GROUND, "grass", TileOptions::default())
            .expect("create");
        reg.create_tile(1, 1, TileLayer::GROUND, "water", wall())
            .expect("overwrite");
        assert_eq!(reg.len(), 1);
        assert_eq!(
            reg.get_tile(1, 1, Some(TileLayer::GROUND)).map(|t| t.sprite_type.as_str()),
            Some("water")
        );
    }

    #[test]
    fn remove_on_empty_cell_is_idempotent() {
        let mut reg = registry();
        assert_eq!(reg.remove_tile(4, 4, TileLayer::TOP), None);
        assert_eq!(reg.remove_tile(4, 4, TileLayer::TOP), None);
        assert!(reg.drain_changes().is_empty());
    }

    #[test]
    fn layered_lookup_prefers_highest_layer() {
        let mut reg = registry();
        reg.create_tile(3, 4, TileLayer::GROUND, "grass", TileOptions::default())
            .expect("grass");
        let top = reg.get_tile(3, 4, None).expect("grass visible");
        assert_eq!(top.sprite_type, "grass");
        assert!(top.walkable);

        reg.create_tile(3, 4, TileLayer::MIDDLE, "wall", wall()).expect("wall");
        let top = reg.get_tile(3, 4, None).expect("wall visible");
        assert_eq!(top.sprite_type, "wall");
        assert!(!top.walkable);
        assert!(!reg.is_walkable(3, 4));

        reg.remove_tile(3, 4, TileLayer::MIDDLE);
        assert!(reg.is_walkable(3, 4));
    }

    #[test]
    fn changes_are_queued_for_the_renderer() {
        let mut reg = registry();
        reg.create_tile(0, 0, TileLayer::GROUND, "grass", TileOptions::default())
            .expect("create");
        reg.remove_tile(0, 0, TileLayer::GROUND);
        let changes = reg.drain_changes();
        assert!(matches!(changes[0], TileChange::Added(key, _) if key == TileKey::new(0, 0, TileLayer::GROUND)));
        assert_eq!(changes[1], TileChange::Removed(TileKey::new(0, 0, TileLayer::GROUND)));
        assert!(reg.drain_changes().is_empty());
    }

    #[test]
    fn iteration_is_restartable() {
        let mut reg = registry();
        reg.create_tile(0, 0, TileLayer::GROUND, "a", TileOptions::default())
            .expect("a");
        reg.create_tile(1, 0, TileLayer::TOP, "b", TileOptions::default())
            .expect("b");
        assert_eq!(reg.iter().count(), 2);
        assert_eq!(reg.iter().count(), 2);
    }
}
