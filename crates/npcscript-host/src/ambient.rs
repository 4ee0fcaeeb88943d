//! Data exchange between the host and a Lua state
//!
//! Interaction context reaches native callbacks through reserved globals
//! holding opaque userdata handles. Scripts can see the globals but cannot
//! forge a handle, so a callback either recovers a genuine context or none.

use mlua::{Lua, Table, UserData, Value};
use npcscript_events::{EntityId, SessionId};

/// Global holding the handle of the execution context that owns the state
pub const CONTEXT_GLOBAL: &str = "__interaction__";
/// Global holding the acting session
pub const SESSION_GLOBAL: &str = "__session__";
/// Global holding the scripted entity
pub const ENTITY_GLOBAL: &str = "__entity__";

/// Per-context identifier, mostly useful for correlating log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u64);

#[derive(Debug, Clone, Copy)]
struct ContextHandle(ContextId);

#[derive(Debug, Clone, Copy)]
struct SessionHandle(SessionId);

#[derive(Debug, Clone, Copy)]
struct EntityHandle(EntityId);

impl UserData for ContextHandle {}
impl UserData for SessionHandle {}
impl UserData for EntityHandle {}

/// The interaction a callback is acting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InteractionScope {
    pub context: Option<ContextId>,
    pub session: SessionId,
    pub entity: EntityId,
}

impl InteractionScope {
    /// Recover the scope from the ambient globals
    ///
    /// Returns `None` if either the session or the entity handle is missing,
    /// which happens when a script overwrites the reserved globals.
    pub(crate) fn recover(lua: &Lua) -> Option<Self> {
        let session = ambient_handle::<SessionHandle>(lua, SESSION_GLOBAL)?;
        let entity = ambient_handle::<EntityHandle>(lua, ENTITY_GLOBAL)?;
        let context = ambient_handle::<ContextHandle>(lua, CONTEXT_GLOBAL);

        Some(Self {
            context: context.map(|h| h.0),
            session: session.0,
            entity: entity.0,
        })
    }
}

/// Install the ambient globals for an interaction
pub(crate) fn bind_interaction(
    lua: &Lua,
    context: ContextId,
    session: SessionId,
    entity: EntityId,
) -> mlua::Result<()> {
    let globals = lua.globals();
    globals.set(CONTEXT_GLOBAL, lua.create_userdata(ContextHandle(context))?)?;
    globals.set(SESSION_GLOBAL, lua.create_userdata(SessionHandle(session))?)?;
    globals.set(ENTITY_GLOBAL, lua.create_userdata(EntityHandle(entity))?)?;
    Ok(())
}

fn ambient_handle<T: UserData + Copy + 'static>(lua: &Lua, name: &str) -> Option<T> {
    match lua.globals().raw_get::<Value>(name) {
        Ok(Value::UserData(ud)) => ud.borrow::<T>().ok().map(|handle| *handle),
        _ => None,
    }
}

/// Convert a value to text using Lua's own string coercion (numbers count)
pub(crate) fn coerce_text(lua: &Lua, value: Value) -> Option<String> {
    lua.coerce_string(value)
        .ok()
        .flatten()
        .map(|s| s.to_string_lossy().to_string())
}

/// Read an integer field, falling back to 0 when absent or not an `i32`
pub(crate) fn integer_field(lua: &Lua, table: &Table, name: &str) -> i32 {
    let value = table.get::<Value>(name).unwrap_or(Value::Nil);
    lua.coerce_integer(value)
        .ok()
        .flatten()
        .and_then(|n| i32::try_from(n).ok())
        .unwrap_or(0)
}

/// Read a string field, falling back to an empty string
pub(crate) fn string_field(lua: &Lua, table: &Table, name: &str) -> String {
    let value = table.get::<Value>(name).unwrap_or(Value::Nil);
    coerce_text(lua, value).unwrap_or_default()
}
