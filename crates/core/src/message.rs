//! Structured messages exchanged with the model.
//!
//! A message type is a plain Rust struct implementing [`ToolMessage`]. Its
//! JSON schema, generated by `schemars`, doubles as the wire format: it is
//! either sent as a native tool definition or rendered into the system
//! prompt. Field order and descriptions are kept exactly as declared.
//!
//! Agents enable message types by registering a [`Handler`] in their
//! [`MessageRegistry`]. Each turn, the [`ResponseParser`] extracts at most one
//! message from the model output, which is then dispatched to its handler.

mod error;
mod handler;
mod parser;
mod registry;
mod schema;

use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use error::{
    HandlerError, HandlerErrorKind, MalformedMessage, SchemaError,
    SchemaErrorKind,
};
pub(crate) use handler::ApprovalFn;
pub use handler::{BoundHandler, Context, Handler, HandlerResult, Reply};
pub use parser::{ParsedMessage, RawOutput, ResponseParser};
pub use registry::MessageRegistry;
pub use schema::{FieldSpec, FieldType, MessageSchema};

/// The key carrying the request name in JSON-encoded messages.
pub const REQUEST_KEY: &str = "request";

/// A structured message the model can emit to invoke a handler.
///
/// # Example
///
/// ```
/// use dockhand_core::ToolMessage;
/// use schemars::JsonSchema;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize, JsonSchema)]
/// struct FileExists {
///     /// Name of the file to look for.
///     filename: String,
/// }
///
/// impl ToolMessage for FileExists {
///     const REQUEST: &'static str = "file_exists";
///
///     fn purpose() -> &'static str {
///         "To check if a file <filename> exists in the repo."
///     }
///
///     fn examples() -> Vec<Self> {
///         vec![FileExists { filename: "blah.md".to_owned() }]
///     }
/// }
/// ```
pub trait ToolMessage:
    Serialize + DeserializeOwned + JsonSchema + Send + 'static
{
    /// The request name, unique within a registry and never reused for a
    /// different shape.
    const REQUEST: &'static str;

    /// A human-readable description of when to use this message.
    fn purpose() -> &'static str;

    /// Example instances, used for prompting and testing only.
    ///
    /// Must not be empty. Use [`MessageSchema::check_examples`] in tests to
    /// verify this.
    fn examples() -> Vec<Self>;
}
