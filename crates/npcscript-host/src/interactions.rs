use npcscript_events::{DialogSink, EntityId, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bytecode::ScriptMetadata;
use crate::config::ScriptingConfig;
use crate::executor::{ExecutionContext, ExecutionError, TaskState};

/// Tracks the interaction each session is currently in
///
/// One context per session: the manager creates it when the player talks to
/// an entity, resumes it when the player answers, and drops it as soon as
/// the task reaches a terminal state. Access is expected to be serialized by
/// the caller, typically one manager per server loop.
pub struct InteractionManager {
    sink: Arc<dyn DialogSink>,
    config: ScriptingConfig,
    active: HashMap<SessionId, ExecutionContext>,
}

impl InteractionManager {
    pub fn new(sink: Arc<dyn DialogSink>) -> Self {
        Self::with_config(sink, ScriptingConfig::default())
    }

    pub fn with_config(sink: Arc<dyn DialogSink>, config: ScriptingConfig) -> Self {
        Self {
            sink,
            config,
            active: HashMap::new(),
        }
    }

    /// Start the interaction between `session` and the entity described by
    /// `metadata`
    ///
    /// Returns `Ok(None)` when the entity has no code to run, otherwise the
    /// state the task reached after its first resume. Bytecode that cannot be
    /// loaded is reported as [`ExecutionError::Load`].
    pub fn start(
        &mut self,
        session: SessionId,
        entity: EntityId,
        metadata: &ScriptMetadata,
    ) -> Result<Option<TaskState>, ExecutionError> {
        if self.active.contains_key(&session) {
            return Err(ExecutionError::Busy(session));
        }

        let Some(code) = metadata.code.as_ref() else {
            debug!(target: "scripting", "{} ({}) has no code to run", metadata.name, entity);
            return Ok(None);
        };

        let mut context =
            ExecutionContext::with_config(session, entity, Arc::clone(&self.sink), &self.config)?;

        if !context.run(code) {
            warn!(target: "scripting", "Could not start {} ({}) for {}", metadata.name, entity, session);
            return Err(ExecutionError::Load(entity));
        }

        let state = context.state();
        if context.is_finished() {
            debug!(target: "scripting", "Interaction of {} with {} finished immediately", session, entity);
        } else {
            info!(target: "scripting", "{} started talking to {} ({})", session, metadata.name, entity);
            self.active.insert(session, context);
        }

        Ok(state)
    }

    /// Continue the session's suspended interaction
    ///
    /// Returns `None` when the session has no interaction in progress.
    pub fn resume(&mut self, session: SessionId) -> Option<TaskState> {
        let context = self.active.get_mut(&session)?;
        let state = context.resume();

        if context.is_finished() {
            debug!(target: "scripting", "Interaction of {} ended as {:?}", session, state);
            self.active.remove(&session);
        }

        state
    }

    /// Drop the session's interaction without letting it progress
    pub fn abandon(&mut self, session: SessionId) -> bool {
        let removed = self.active.remove(&session).is_some();
        if removed {
            debug!(target: "scripting", "Abandoned interaction of {}", session);
        }
        removed
    }

    pub fn is_active(&self, session: SessionId) -> bool {
        self.active.contains_key(&session)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Entity the session is currently talking to
    pub fn entity_of(&self, session: SessionId) -> Option<EntityId> {
        self.active.get(&session).map(ExecutionContext::entity)
    }
}
