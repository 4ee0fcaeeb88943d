//! Native functions exposed to running scripts
//!
//! Each callback is registered once per execution context from the static
//! [`CALLBACKS`] list. The notification sink is captured when the function is
//! created; the session and entity are recovered from the ambient globals on
//! every call.

use mlua::{Function, Lua, Value, Variadic};
use npcscript_events::DialogSink;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::ambient::{InteractionScope, coerce_text};

/// Wraps a native callback so the calling coroutine yields after it returns
/// `true`. Native Rust functions cannot yield on their own.
const SUSPEND_SHIM: &str = r#"
local notify = ...
local yield = coroutine.yield
return function(...)
    if notify(...) then
        return yield()
    end
end
"#;

/// Operations a script can invoke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callback {
    /// `mes(text)`: show a message
    Message,
    /// `next()`: let the player advance, suspending until resumed
    Advance,
    /// `close()`: close the dialog
    Close,
}

/// Every callback installed into an execution context
pub const CALLBACKS: [Callback; 3] = [Callback::Message, Callback::Advance, Callback::Close];

impl Callback {
    /// Global name the callback is registered under
    pub fn name(self) -> &'static str {
        match self {
            Callback::Message => "mes",
            Callback::Advance => "next",
            Callback::Close => "close",
        }
    }

    /// Whether a successful call suspends the running task
    pub fn suspends(self) -> bool {
        matches!(self, Callback::Advance)
    }

    /// Run the callback. Returns whether the task should now suspend.
    fn invoke(self, lua: &Lua, sink: &dyn DialogSink, args: Variadic<Value>) -> bool {
        let Some(scope) = InteractionScope::recover(lua) else {
            warn!(
                target: "scripting",
                "[{}]: Trying to call with no proper context",
                self.name()
            );
            return false;
        };

        debug!(
            target: "scripting",
            "[{}] {} -> {} (context {:?})",
            self.name(),
            scope.entity,
            scope.session,
            scope.context
        );

        match self {
            Callback::Message => {
                let Some(first) = args.first().cloned() else {
                    warn!(target: "scripting", "[{}]: Trying to call with no parameters", self.name());
                    return false;
                };

                let Some(text) = coerce_text(lua, first) else {
                    warn!(target: "scripting", "[{}]: First parameter must be a string", self.name());
                    return false;
                };

                sink.notify_message(scope.session, scope.entity, &text);
                false
            }
            Callback::Advance => {
                sink.notify_advance(scope.session, scope.entity);
                true
            }
            Callback::Close => {
                sink.notify_close(scope.session, scope.entity);
                false
            }
        }
    }
}

/// Register every callback into the state's global namespace
pub(crate) fn register_callbacks(lua: &Lua, sink: Arc<dyn DialogSink>) -> mlua::Result<()> {
    let globals = lua.globals();

    for callback in CALLBACKS {
        let sink = Arc::clone(&sink);
        let native = lua.create_function(move |lua, args: Variadic<Value>| {
            Ok(callback.invoke(lua, sink.as_ref(), args))
        })?;

        let function = if callback.suspends() {
            lua.load(SUSPEND_SHIM)
                .set_name(format!("={}", callback.name()))
                .call::<Function>(native)?
        } else {
            native
        };

        globals.set(callback.name(), function)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambient::{ContextId, bind_interaction};
    use npcscript_events::{DialogEvent, DialogReceiver, EntityId, SessionId, dialog_channel};

    fn state_with_callbacks() -> (Lua, DialogReceiver) {
        let lua = Lua::new();
        let (sink, rx) = dialog_channel();
        register_callbacks(&lua, Arc::new(sink)).unwrap();
        bind_interaction(&lua, ContextId(1), SessionId(10), EntityId(20)).unwrap();
        (lua, rx)
    }

    #[test]
    fn test_callback_names_are_unique() {
        let mut names: Vec<_> = CALLBACKS.iter().map(|c| c.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), CALLBACKS.len());
    }

    #[test]
    fn test_only_advance_suspends() {
        assert!(Callback::Advance.suspends());
        assert!(!Callback::Message.suspends());
        assert!(!Callback::Close.suspends());
    }

    #[test]
    fn test_message_forwards_text() {
        let (lua, mut rx) = state_with_callbacks();
        lua.load("mes('Hello there')").exec().unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            DialogEvent::Message {
                session: SessionId(10),
                entity: EntityId(20),
                text: "Hello there".to_string()
            }
        );
    }

    #[test]
    fn test_message_coerces_numbers() {
        let (lua, mut rx) = state_with_callbacks();
        lua.load("mes(42)").exec().unwrap();

        match rx.try_recv().unwrap() {
            DialogEvent::Message { text, .. } => assert_eq!(text, "42"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_malformed_message_is_a_noop() {
        let (lua, mut rx) = state_with_callbacks();
        lua.load("mes() mes(nil) mes({}) reached = true").exec().unwrap();

        assert!(rx.try_recv().is_err());
        assert!(lua.globals().get::<bool>("reached").unwrap());
    }

    #[test]
    fn test_missing_context_is_a_noop() {
        let (lua, mut rx) = state_with_callbacks();
        lua.load("__session__ = nil mes('lost') close() reached = true")
            .exec()
            .unwrap();

        assert!(rx.try_recv().is_err());
        assert!(lua.globals().get::<bool>("reached").unwrap());
    }

    #[test]
    fn test_close_notifies() {
        let (lua, mut rx) = state_with_callbacks();
        lua.load("close()").exec().unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            DialogEvent::Close {
                session: SessionId(10),
                entity: EntityId(20)
            }
        );
    }

    #[test]
    fn test_advance_yields_inside_coroutine() {
        let (lua, mut rx) = state_with_callbacks();
        let body: Function = lua
            .load("return function() next() mes('after') end")
            .eval()
            .unwrap();
        let thread = lua.create_thread(body).unwrap();

        thread.resume::<()>(()).unwrap();
        assert!(matches!(thread.status(), mlua::ThreadStatus::Resumable));
        assert!(matches!(rx.try_recv().unwrap(), DialogEvent::Advance { .. }));
        assert!(rx.try_recv().is_err());

        thread.resume::<()>(()).unwrap();
        assert!(!matches!(thread.status(), mlua::ThreadStatus::Resumable));
        assert!(matches!(rx.try_recv().unwrap(), DialogEvent::Message { .. }));
    }

    #[test]
    fn test_advance_without_context_does_not_yield() {
        let (lua, mut rx) = state_with_callbacks();
        let body: Function = lua
            .load("return function() __entity__ = nil next() done = true end")
            .eval()
            .unwrap();
        let thread = lua.create_thread(body).unwrap();

        thread.resume::<()>(()).unwrap();
        assert!(!matches!(thread.status(), mlua::ThreadStatus::Resumable));
        assert!(rx.try_recv().is_err());
        assert!(lua.globals().get::<bool>("done").unwrap());
    }

    #[test]
    fn test_shim_captures_yield() {
        let (lua, _rx) = state_with_callbacks();
        let body: Function = lua
            .load("return function() coroutine = nil next() end")
            .eval()
            .unwrap();
        let thread = lua.create_thread(body).unwrap();

        // Replacing the coroutine library after registration does not break next()
        thread.resume::<()>(()).unwrap();
        assert!(matches!(thread.status(), mlua::ThreadStatus::Resumable));
    }
}
