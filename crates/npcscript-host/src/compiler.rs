use mlua::{ChunkMode, Function, Lua, LuaOptions, StdLib, Table, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::ambient::{integer_field, string_field};
use crate::bytecode::{Bytecode, ScriptMetadata};
use crate::config::ScriptingConfig;

/// Name of the function holding a script's entry behavior
pub const ENTRY_FUNCTION: &str = "script";

/// Reasons a script file could not be turned into metadata
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("syntax error in {path}: {message}")]
    Syntax { path: PathBuf, message: String },
    #[error("error evaluating {path}: {message}")]
    Evaluation { path: PathBuf, message: String },
    #[error("script in {path} captures top-level locals: {}", .names.join(", "))]
    CapturedLocals { path: PathBuf, names: Vec<String> },
    #[error("unexpected failure loading {path}: {message}")]
    Unexpected { path: PathBuf, message: String },
}

impl CompileError {
    /// Script file the error refers to
    pub fn path(&self) -> &Path {
        match self {
            CompileError::Io { path, .. }
            | CompileError::Syntax { path, .. }
            | CompileError::Evaluation { path, .. }
            | CompileError::CapturedLocals { path, .. }
            | CompileError::Unexpected { path, .. } => path,
        }
    }
}

/// Turns script files into [`ScriptMetadata`]
///
/// Every extraction runs in its own throwaway Lua state without any host
/// callbacks, so a script cannot observe another script's globals or reach
/// the server while it is being loaded.
#[derive(Debug, Clone, Default)]
pub struct ScriptCompiler {
    config: ScriptingConfig,
}

impl ScriptCompiler {
    pub fn new(config: ScriptingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScriptingConfig {
        &self.config
    }

    /// Read and extract a script file
    pub fn extract(&self, path: impl AsRef<Path>) -> Result<ScriptMetadata, CompileError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| CompileError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        self.extract_source(path, &source)
    }

    /// Extract a script whose source is already in memory
    ///
    /// `path` is only used for chunk naming, error messages and the
    /// resulting metadata.
    pub fn extract_source(
        &self,
        path: impl AsRef<Path>,
        source: &str,
    ) -> Result<ScriptMetadata, CompileError> {
        let path = path.as_ref();
        debug!(target: "scripting", "Extracting metadata from {}", path.display());

        let lua = self.compilation_state(path)?;

        let chunk = lua
            .load(source)
            .set_name(format!("@{}", path.display()))
            .set_mode(ChunkMode::Text)
            .into_function()
            .map_err(|e| classify_load_error(path, e))?;

        // Top-level declarations run under a protected call; the error
        // carries the message and traceback instead of unwinding.
        let returned = chunk
            .call::<Value>(())
            .map_err(|e| CompileError::Evaluation {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let globals = lua.globals();
        let descriptor = match returned {
            Value::Table(table) => table,
            _ => globals.clone(),
        };

        let code = match find_entry(&descriptor, &globals) {
            Some(entry) => self.dump_entry(path, &entry)?,
            None => {
                debug!(target: "scripting", "{} defines no entry function", path.display());
                None
            }
        };

        let metadata = ScriptMetadata {
            path: path.to_path_buf(),
            map: string_field(&lua, &descriptor, "map"),
            x: integer_field(&lua, &descriptor, "x"),
            y: integer_field(&lua, &descriptor, "y"),
            facing: integer_field(&lua, &descriptor, "facing"),
            name: string_field(&lua, &descriptor, "name"),
            sprite: integer_field(&lua, &descriptor, "sprite"),
            code,
        };

        info!(
            target: "scripting",
            "Extracted {} ({}) at {} {},{} from {}",
            metadata.name,
            metadata.sprite,
            metadata.map,
            metadata.x,
            metadata.y,
            path.display()
        );

        Ok(metadata)
    }

    fn compilation_state(&self, path: &Path) -> Result<Lua, CompileError> {
        let unexpected = |e: mlua::Error| CompileError::Unexpected {
            path: path.to_path_buf(),
            message: e.to_string(),
        };

        let lua = Lua::new_with(StdLib::ALL_SAFE, LuaOptions::default()).map_err(unexpected)?;
        self.config.apply(&lua).map_err(unexpected)?;
        Ok(lua)
    }

    fn dump_entry(&self, path: &Path, entry: &Function) -> Result<Option<Bytecode>, CompileError> {
        let bytes = entry.dump(self.config.strip_debug_info);

        if bytes.is_empty() {
            warn!(
                target: "scripting",
                "{} in {} could not be dumped, treating the script as having no code",
                ENTRY_FUNCTION,
                path.display()
            );
            return Ok(None);
        }

        let names = captured_locals(entry).map_err(|e| CompileError::Unexpected {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if !names.is_empty() {
            return Err(CompileError::CapturedLocals {
                path: path.to_path_buf(),
                names,
            });
        }

        debug!(target: "scripting", "Dumped {} bytes of bytecode from {}", bytes.len(), path.display());
        Ok(Some(Bytecode::new(bytes)))
    }
}

/// Extract a script with the default configuration
pub fn extract(path: impl AsRef<Path>) -> Result<ScriptMetadata, CompileError> {
    ScriptCompiler::default().extract(path)
}

fn find_entry(descriptor: &Table, globals: &Table) -> Option<Function> {
    let lookup = |table: &Table| match table.get::<Value>(ENTRY_FUNCTION) {
        Ok(Value::Function(function)) => Some(function),
        _ => None,
    };

    lookup(descriptor).or_else(|| lookup(globals))
}

/// Lists the upvalue names of the function passed in
const UPVALUE_NAMES: &str = r#"
local f = ...
local names = {}
local i = 1
while true do
    local name = debug.getupvalue(f, i)
    if name == nil then
        return names
    end
    names[#names + 1] = name
    i = i + 1
end
"#;

/// Upvalues of `entry` other than `_ENV`
///
/// Reloaded bytecode binds its first upvalue to the globals table and leaves
/// the rest nil, so anything captured from the chunk's top level is lost.
fn captured_locals(entry: &Function) -> mlua::Result<Vec<String>> {
    // SAFETY: the scratch state only loads a chunk dumped from a function this
    // compiler just produced, and is dropped before returning.
    let lua = unsafe { Lua::unsafe_new_with(StdLib::DEBUG, LuaOptions::default()) };
    let reloaded = lua
        .load(entry.dump(false))
        .set_name("=entry")
        .set_mode(ChunkMode::Binary)
        .into_function()?;

    let names: Vec<String> = lua
        .load(UPVALUE_NAMES)
        .set_name("=upvalues")
        .call(reloaded)?;

    Ok(names.into_iter().filter(|name| name != "_ENV").collect())
}

fn classify_load_error(path: &Path, error: mlua::Error) -> CompileError {
    match error {
        mlua::Error::SyntaxError { message, .. } => CompileError::Syntax {
            path: path.to_path_buf(),
            message,
        },
        other => CompileError::Unexpected {
            path: path.to_path_buf(),
            message: other.to_string(),
        },
    }
}
