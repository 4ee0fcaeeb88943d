/// Host runtime for Lua NPC scripts
///
/// Scripts are compiled once with [`ScriptCompiler`], which yields the
/// entity's placement metadata and the bytecode of its `script` function.
/// Each time a player talks to the entity an [`ExecutionContext`] runs that
/// bytecode as a coroutine that suspends whenever the script waits for the
/// player and is resumed when they answer.
pub mod ambient;
pub mod bridge;
pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod executor;
pub mod interactions;

pub use ambient::{CONTEXT_GLOBAL, ContextId, ENTITY_GLOBAL, SESSION_GLOBAL};
pub use bridge::{CALLBACKS, Callback};
pub use bytecode::{Bytecode, ScriptMetadata};
pub use compiler::{CompileError, ENTRY_FUNCTION, ScriptCompiler, extract};
pub use config::{ConfigLoadError, ScriptingConfig};
pub use executor::{ExecutionContext, ExecutionError, TaskState};
pub use interactions::InteractionManager;

// Re-export the event types scripts produce
pub use npcscript_events::{
    ChannelSink, DialogEvent, DialogReceiver, DialogSink, EntityId, SessionId, dialog_channel,
};
