use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::player::Direction;
use crate::scripting::ScriptMethod;

/// Player position and facing stored next to a map.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub struct PlayerEnvelope {
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub direction: Direction,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct SavedTile {
    pub x: i32,
    pub y: i32,
    pub layer: i64,
    #[serde(rename = "type")]
    pub sprite_type: String,
    #[serde(default = "default_walkable")]
    pub walkable: bool,
    #[serde(default)]
    pub source: String,
}

fn default_walkable() -> bool {
    true
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct SavedScript {
    pub x: i32,
    pub y: i32,
    pub method: ScriptMethod,
    #[serde(default)]
    pub body: String,
}

/// On-disk map: `{ player?, tiles: [...], scripts: [...] }`.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug, Default)]
pub struct MapDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerEnvelope>,
    #[serde(default)]
    pub tiles: Vec<SavedTile>,
    #[serde(default)]
    pub scripts: Vec<SavedScript>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum StorageError {
    Io(String),
    /// The document parsed badly or refers to cells outside the grid.
    Malformed(String),
    /// A load is already in flight.
    Busy,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Io(msg) => write!(f, "I/O error: {msg}"),
            StorageError::Malformed(msg) => write!(f, "malformed map: {msg}"),
            StorageError::Busy => f.write_str("a map load is already in progress"),
        }
    }
}

impl std::error::Error for StorageError {}

static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Named map documents stored as `<dir>/<name>.json`.
#[derive(Clone, Debug)]
pub struct MapStore {
    dir: PathBuf,
}

impl MapStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[cfg(test)]
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_map_name(name)))
    }

    /// `Ok(None)` when no document exists under that name.
    pub fn read(&self, name: &str) -> Result<Option<MapDocument>, StorageError> {
        let path = self.path_for(name);
        let body = match std::fs::read_to_string(&path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::Io(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| StorageError::Malformed(format!("{}: {e}", path.display())))
    }

    pub fn write(&self, name: &str, document: &MapDocument) -> Result<PathBuf, StorageError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            StorageError::Io(format!("failed to create {}: {e}", self.dir.display()))
        })?;
        let path = self.path_for(name);
        let body = serde_json::to_string_pretty(document)
            .map_err(|e| StorageError::Malformed(format!("failed to serialize map: {e}")))?;
        // Each write gets its own temp file so concurrent writers never share one.
        let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("json.{}-{seq}.tmp", std::process::id()));
        std::fs::write(&tmp, body)
            .map_err(|e| StorageError::Io(format!("failed to write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            StorageError::Io(format!("failed to replace {}: {e}", path.display()))
        })?;
        Ok(path)
    }
}

/// Keeps map names to a single safe path component.
pub fn sanitize_map_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "map".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_uses_the_published_field_names() {
        let doc = MapDocument {
            player: Some(PlayerEnvelope {
                x: 5,
                y: 3,
                direction: Direction::Up,
            }),
            tiles: vec![SavedTile {
                x: 3,
                y: 4,
                layer: 1,
                sprite_type: "wall".into(),
                walkable: false,
                source: "atlas.json".into(),
            }],
            scripts: vec![SavedScript {
                x: 2,
                y: 2,
                method: ScriptMethod::Action,
                body: "log(\"hi\")".into(),
            }],
        };
        let value = serde_json::to_value(&doc).expect("serialize");
        assert_eq!(value["player"]["direction"], "up");
        assert_eq!(value["tiles"][0]["type"], "wall");
        assert_eq!(value["tiles"][0]["layer"], 1);
        assert_eq!(value["scripts"][0]["method"], "action");
    }

    #[test]
    fn sparse_document_fills_defaults() {
        let doc: MapDocument = serde_json::from_value(serde_json::json!({
            "tiles": [{ "x": 0, "y": 0, "layer": 0, "type": "grass" }]
        }))
        .expect("deserialize");
        assert!(doc.player.is_none());
        assert!(doc.scripts.is_empty());
        assert!(doc.tiles[0].walkable);
        assert_eq!(doc.tiles[0].source, "");
    }

    #[test]
    fn unknown_method_tag_is_rejected() {
        let parsed = serde_json::from_value::<MapDocument>(serde_json::json!({
            "scripts": [{ "x": 0, "y": 0, "method": "hover", "body": "" }]
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MapStore::new(dir.path());
        assert_eq!(store.read("nowhere"), Ok(None));
    }

    #[test]
    fn write_then_read_and_garbage_is_malformed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MapStore::new(dir.path().join("maps"));
        let doc = MapDocument::default();
        let path = store.write("level one", &doc).expect("write");
        assert!(path.ends_with("level_one.json"));
        assert_eq!(store.read("level one"), Ok(Some(doc)));

        std::fs::write(store.path_for("broken"), "{ tiles: ").expect("write garbage");
        assert!(matches!(store.read("broken"), Err(StorageError::Malformed(_))));
    }

    #[test]
    fn concurrent_writes_to_one_name_all_succeed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MapStore::new(dir.path());
        let docs: Vec<MapDocument> = (0..8)
            .map(|i| MapDocument {
                player: Some(PlayerEnvelope {
                    x: i,
                    y: i,
                    direction: Direction::Up,
                }),
                ..MapDocument::default()
            })
            .collect();

        for _ in 0..25 {
            std::thread::scope(|scope| {
                let handles: Vec<_> = docs
                    .iter()
                    .map(|doc| {
                        let store = &store;
                        scope.spawn(move || store.write("map", doc))
                    })
                    .collect();
                for handle in handles {
                    assert!(handle.join().expect("writer thread").is_ok());
                }
            });
            let read = store.read("map").expect("readable").expect("present");
            assert!(docs.contains(&read));
        }
        let leftovers = std::fs::read_dir(store.dir())
            .expect("dir")
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn map_names_cannot_escape_the_directory() {
        assert_eq!(sanitize_map_name("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_map_name("  "), "map");
    }
}
