use std::collections::BTreeMap;
use std::fmt::{self, Debug};

use dockhand_model::ModelTool;

use super::error::SchemaError;
use super::handler::{BoundHandler, Handler};
use super::schema::MessageSchema;

/// Maps request names to the schema and handler of enabled messages.
///
/// Each agent owns its registry. Entries are kept sorted by request name so
/// that prompts and tool definitions are rendered in a stable order.
pub struct MessageRegistry<S> {
    entries: BTreeMap<String, BoundHandler<S>>,
}

impl<S> Default for MessageRegistry<S> {
    #[inline]
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<S> Clone for MessageRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<S> Debug for MessageRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

impl<S: Send + Sync + 'static> MessageRegistry<S> {
    /// Creates an empty registry.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables the message type of `handler`, replacing any handler
    /// previously bound to the same request name.
    pub fn enable<H: Handler<S>>(
        &mut self,
        handler: H,
    ) -> Result<(), SchemaError> {
        let bound = BoundHandler::new(handler)?;
        let request = bound.request().to_owned();
        if self.entries.insert(request.clone(), bound).is_some() {
            debug!("replaced the handler of `{request}`");
        } else {
            debug!("enabled `{request}`");
        }
        Ok(())
    }

    /// Disables a message type. Returns `false` if it was not enabled.
    ///
    /// Outputs carrying this request name are no longer recognized.
    pub fn disable(&mut self, request: &str) -> bool {
        let removed = self.entries.remove(request).is_some();
        if removed {
            debug!("disabled `{request}`");
        }
        removed
    }
}

impl<S> MessageRegistry<S> {
    /// Returns the handler bound to `request`, if enabled.
    #[inline]
    pub fn resolve(&self, request: &str) -> Option<&BoundHandler<S>> {
        self.entries.get(request)
    }

    /// Returns the schema of an enabled message type.
    #[inline]
    pub fn schema(&self, request: &str) -> Option<&MessageSchema> {
        self.entries.get(request).map(BoundHandler::schema)
    }

    /// Returns the schemas of all enabled message types, sorted by name.
    pub fn schemas(&self) -> impl Iterator<Item = &MessageSchema> {
        self.entries.values().map(BoundHandler::schema)
    }

    /// Returns tool definitions for models with native tool calls.
    pub fn definitions(&self) -> Vec<ModelTool> {
        self.schemas().map(MessageSchema::definition).collect()
    }

    /// Returns the number of enabled message types.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no message type is enabled.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
