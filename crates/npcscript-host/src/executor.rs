use mlua::{ChunkMode, Function, Lua, LuaOptions, MultiValue, StdLib, Thread, ThreadStatus};
use npcscript_events::{DialogSink, EntityId, SessionId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::ambient::{ContextId, bind_interaction};
use crate::bridge::register_callbacks;
use crate::bytecode::Bytecode;
use crate::config::ScriptingConfig;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("failed to prepare interaction state: {0}")]
    Setup(String),
    #[error("{0} already has an interaction in progress")]
    Busy(SessionId),
    #[error("bytecode for {0} could not be loaded")]
    Load(EntityId),
}

impl From<mlua::Error> for ExecutionError {
    fn from(e: mlua::Error) -> Self {
        ExecutionError::Setup(e.to_string())
    }
}

/// Replacements for the base loaders that refuse binary chunks. The state
/// itself must accept them for `run`, scripts never should.
const TEXT_ONLY_LOADERS: &str = r#"
local load, loadfile = load, loadfile

local function text_load(chunk, chunkname, _, ...)
    return load(chunk, chunkname, "t", ...)
end

local function text_loadfile(filename, _, ...)
    return loadfile(filename, "t", ...)
end

local function text_dofile(filename)
    local f = assert(text_loadfile(filename))
    return f()
end

return text_load, text_loadfile, text_dofile
"#;

fn restrict_loaders(lua: &Lua) -> mlua::Result<()> {
    let (load, loadfile, dofile): (Function, Function, Function) = lua
        .load(TEXT_ONLY_LOADERS)
        .set_name("=loaders")
        .eval()?;

    let globals = lua.globals();
    globals.set("load", load)?;
    globals.set("loadfile", loadfile)?;
    globals.set("dofile", dofile)?;
    Ok(())
}

/// Lifecycle of a resumable task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Loaded but never resumed
    Created,
    /// Currently executing
    Running,
    /// Waiting for the player; continue with [`ExecutionContext::resume`]
    Suspended,
    /// Entry function returned
    Completed,
    /// Entry function raised an error
    Failed,
}

impl TaskState {
    /// Whether the task can make no further progress
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// A coroutine running one script entry function
struct ResumableTask {
    thread: Thread,
    state: TaskState,
    suspensions: u32,
}

impl ResumableTask {
    fn new(thread: Thread) -> Self {
        Self {
            thread,
            state: TaskState::Created,
            suspensions: 0,
        }
    }

    /// Drive the coroutine until it yields, returns or errors
    fn step(&mut self, context: ContextId) -> TaskState {
        self.state = TaskState::Running;

        self.state = match self.thread.resume::<MultiValue>(()) {
            Ok(_) if matches!(self.thread.status(), ThreadStatus::Resumable) => {
                self.suspensions += 1;
                TaskState::Suspended
            }
            Ok(_) => TaskState::Completed,
            Err(e) => {
                warn!(target: "scripting", "Script task in context {:?} failed: {}", context, e);
                TaskState::Failed
            }
        };

        debug!(target: "scripting", "Context {:?} task is now {:?}", context, self.state);
        self.state
    }
}

/// An isolated Lua state serving exactly one interaction
///
/// Every context owns its own state, so the ambient globals of one
/// interaction can never be seen by another. Dropping the context releases
/// the state together with any suspended task.
pub struct ExecutionContext {
    id: ContextId,
    session: SessionId,
    entity: EntityId,
    task: Option<ResumableTask>,
    lua: Lua,
}

impl ExecutionContext {
    /// Create a context for `session` talking to `entity`
    pub fn new(
        session: SessionId,
        entity: EntityId,
        sink: Arc<dyn DialogSink>,
    ) -> Result<Self, ExecutionError> {
        Self::with_config(session, entity, sink, &ScriptingConfig::default())
    }

    pub fn with_config(
        session: SessionId,
        entity: EntityId,
        sink: Arc<dyn DialogSink>,
        config: &ScriptingConfig,
    ) -> Result<Self, ExecutionError> {
        // SAFETY: the only binary chunks this state loads come from `run`, which
        // takes `Bytecode` values. Those can only be built by the compiler from
        // functions it dumped itself, never from external input. Scripts only
        // get the text-only loaders.
        let lua = unsafe { Lua::unsafe_new_with(StdLib::ALL_SAFE, LuaOptions::default()) };
        restrict_loaders(&lua)?;
        config.apply(&lua)?;
        register_callbacks(&lua, sink)?;

        let id = ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed));
        bind_interaction(&lua, id, session, entity)?;

        debug!(target: "scripting", "Created context {:?} for {} and {}", id, session, entity);

        Ok(Self {
            id,
            session,
            entity,
            task: None,
            lua,
        })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// State of the current task, `None` before anything was run
    pub fn state(&self) -> Option<TaskState> {
        self.task.as_ref().map(|task| task.state)
    }

    /// Whether the task has finished (or there was never one)
    pub fn is_finished(&self) -> bool {
        self.state().is_none_or(TaskState::is_terminal)
    }

    /// Number of times the current task has suspended
    pub fn suspensions(&self) -> u32 {
        self.task.as_ref().map_or(0, |task| task.suspensions)
    }

    /// Load `bytecode` and start running it
    ///
    /// Returns whether the bytecode could be loaded and a task started. How
    /// far the script got is reported by [`state`](Self::state). A context
    /// runs one task at a time; starting another while one is suspended is
    /// refused.
    pub fn run(&mut self, bytecode: &Bytecode) -> bool {
        if let Some(state) = self.state() {
            if !state.is_terminal() {
                warn!(
                    target: "scripting",
                    "Context {:?} already has a {:?} task, refusing to start another",
                    self.id,
                    state
                );
                return false;
            }
        }

        let entry = match self
            .lua
            .load(bytecode.as_bytes())
            .set_name("=script")
            .set_mode(ChunkMode::Binary)
            .into_function()
        {
            Ok(entry) => entry,
            Err(e) => {
                warn!(target: "scripting", "Context {:?} failed to load bytecode: {}", self.id, e);
                return false;
            }
        };

        let thread = match self.lua.create_thread(entry) {
            Ok(thread) => thread,
            Err(e) => {
                warn!(target: "scripting", "Context {:?} failed to create task: {}", self.id, e);
                return false;
            }
        };

        let task = self.task.insert(ResumableTask::new(thread));
        task.step(self.id);
        true
    }

    /// Continue a suspended task from where it left off
    ///
    /// Anything other than a suspended task is left untouched: resuming a
    /// completed or failed task does nothing.
    pub fn resume(&mut self) -> Option<TaskState> {
        let id = self.id;
        let task = self.task.as_mut()?;

        if task.state != TaskState::Suspended {
            warn!(target: "scripting", "Ignoring resume of {:?} task in context {:?}", task.state, id);
            return Some(task.state);
        }

        Some(task.step(id))
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if let Some(TaskState::Suspended) = self.state() {
            debug!(target: "scripting", "Abandoning suspended task in context {:?}", self.id);
        }
    }
}
