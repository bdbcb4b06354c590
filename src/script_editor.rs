use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bevy::log::{info, warn};
use crossbeam_channel::{Receiver, Sender};
use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::grid::Cell;
use crate::input::{Key, VirtualInput};
use crate::scripting::{CompileError, ScriptMethod};

const METHOD_HEADER: &str = "// method:";
const ERROR_HEADER: &str = "// error:";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EditorCloseState {
    Save,
    Cancel,
    Remove,
}

/// How the editor was closed, with the method and body it held at that point.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct EditorClose {
    pub state: EditorCloseState,
    pub method: ScriptMethod,
    pub body: String,
}

/// Interactive editing of one cell script at a time.
pub trait ScriptEditor {
    fn open(&mut self, cell: Cell, method: ScriptMethod, body: &str) -> Result<(), String>;

    /// Polled once per tick while open. Returns the close outcome once.
    fn poll_close(&mut self, input: &VirtualInput) -> Option<EditorClose>;

    fn is_open(&self) -> bool;

    /// The body last saved for `cell` does not compile.
    fn report_compile_error(&mut self, cell: Cell, error: &CompileError);
}

struct OpenFile {
    path: PathBuf,
    method: ScriptMethod,
    body: String,
    written: String,
    rx: Receiver<PathBuf>,
    _watcher: Option<RecommendedWatcher>,
    /// Set by a change event; the file is read once a tick passes without one.
    settling: bool,
}

/// Edits a script through a scratch file in the scripts directory. Writing
/// the file saves it, `Escape` cancels and `Delete` removes the script.
/// Compile errors are shown as `// error:` lines the next time the cell opens.
pub struct FileScriptEditor {
    scripts_dir: PathBuf,
    open: Option<OpenFile>,
    errors: HashMap<Cell, String>,
}

impl FileScriptEditor {
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            open: None,
            errors: HashMap::new(),
        }
    }

    pub fn path_for(&self, cell: Cell) -> PathBuf {
        self.scripts_dir.join(format!("cell_{}_{}.rhai", cell.x, cell.y))
    }

    #[cfg(test)]
    pub fn open_path(&self) -> Option<&Path> {
        self.open.as_ref().map(|file| file.path.as_path())
    }

    /// Reads the scratch file and reports a save if it differs from what the
    /// editor wrote.
    pub(crate) fn check_file(&mut self) -> Option<EditorClose> {
        let file = self.open.as_ref()?;
        let content = match std::fs::read_to_string(&file.path) {
            Ok(content) => content,
            Err(e) => {
                warn!("[Gridwright editor] Failed to read {}: {e}", file.path.display());
                return None;
            }
        };
        if content == file.written {
            return None;
        }
        let (method, body) = parse_script_file(&content, file.method);
        self.close(EditorCloseState::Save, method, body)
    }

    /// Change events start a settle; the file is only read on the first poll
    /// with no new events, so a save written in pieces is seen whole.
    pub(crate) fn settle(&mut self, touched: bool) -> Option<EditorClose> {
        let file = self.open.as_mut()?;
        if touched {
            file.settling = true;
            return None;
        }
        if !file.settling {
            return None;
        }
        file.settling = false;
        self.check_file()
    }

    fn close(&mut self, state: EditorCloseState, method: ScriptMethod, body: String) -> Option<EditorClose> {
        let file = self.open.take()?;
        if let Err(e) = std::fs::remove_file(&file.path) {
            warn!("[Gridwright editor] Failed to remove {}: {e}", file.path.display());
        }
        info!("[Gridwright editor] Closed {} ({state:?})", file.path.display());
        Some(EditorClose {
            state,
            method,
            body,
        })
    }
}

impl ScriptEditor for FileScriptEditor {
    fn open(&mut self, cell: Cell, method: ScriptMethod, body: &str) -> Result<(), String> {
        if self.open.is_some() {
            return Err("an editor is already open".to_string());
        }
        std::fs::create_dir_all(&self.scripts_dir).map_err(|e| {
            format!("failed to create {}: {e}", self.scripts_dir.display())
        })?;
        let path = self.path_for(cell);
        let mut written = render_script_file(method, body);
        if let Some(error) = self.errors.remove(&cell) {
            written = insert_error_lines(&written, &error);
        }
        std::fs::write(&path, &written)
            .map_err(|e| format!("failed to write {}: {e}", path.display()))?;

        let (tx, rx) = crossbeam_channel::unbounded::<PathBuf>();
        let watcher = match watch_dir(&self.scripts_dir, tx) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("[Gridwright editor] Not watching {}: {e}", self.scripts_dir.display());
                None
            }
        };
        info!("[Gridwright editor] Editing {cell} in {}", path.display());
        self.open = Some(OpenFile {
            path,
            method,
            body: body.to_string(),
            written,
            rx,
            _watcher: watcher,
            settling: false,
        });
        Ok(())
    }

    fn poll_close(&mut self, input: &VirtualInput) -> Option<EditorClose> {
        let file = self.open.as_ref()?;
        if input.is_key_down(Key::Escape) {
            let (method, body) = (file.method, file.body.clone());
            return self.close(EditorCloseState::Cancel, method, body);
        }
        if input.is_key_down(Key::Delete) {
            let (method, body) = (file.method, file.body.clone());
            return self.close(EditorCloseState::Remove, method, body);
        }
        let file_name = file.path.file_name();
        let touched = file
            .rx
            .try_iter()
            .take(64)
            .any(|changed| changed.file_name() == file_name);
        self.settle(touched)
    }

    fn is_open(&self) -> bool {
        self.open.is_some()
    }

    fn report_compile_error(&mut self, cell: Cell, error: &CompileError) {
        warn!("[Gridwright editor] Script at {cell} does not compile: {error}");
        self.errors.insert(cell, error.to_string());
    }
}

fn watch_dir(dir: &Path, tx: Sender<PathBuf>) -> Result<RecommendedWatcher, notify::Error> {
    let mut watcher = notify::recommended_watcher(move |res: Result<NotifyEvent, notify::Error>| {
        let Ok(event) = res else { return };
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return;
        }
        for path in event.paths {
            let _ = tx.send(path);
        }
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

pub fn render_script_file(method: ScriptMethod, body: &str) -> String {
    format!("{METHOD_HEADER} {method}\n{body}")
}

fn insert_error_lines(rendered: &str, error: &str) -> String {
    let (header, body) = rendered.split_once('\n').unwrap_or((rendered, ""));
    let mut out = format!("{header}\n");
    for line in error.lines() {
        out.push_str(&format!("{ERROR_HEADER} {line}\n"));
    }
    out.push_str(body);
    out
}

/// Splits a scratch file into method and body. A missing or unknown header
/// keeps `fallback`. Leading `// error:` lines are dropped.
pub fn parse_script_file(content: &str, fallback: ScriptMethod) -> (ScriptMethod, String) {
    let Some(rest) = content.strip_prefix(METHOD_HEADER) else {
        return (fallback, content.to_string());
    };
    let (tag, mut body) = rest.split_once('\n').unwrap_or((rest, ""));
    while body.starts_with(ERROR_HEADER) {
        body = body.split_once('\n').map_or("", |(_, rest)| rest);
    }
    let method = ScriptMethod::parse(tag).unwrap_or(fallback);
    (method, body.to_string())
}
