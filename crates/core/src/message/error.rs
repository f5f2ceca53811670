use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt::{self, Display};

/// The kind of a [`SchemaError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SchemaErrorKind {
    /// The request name is empty or blank.
    InvalidName,
    /// The generated schema does not describe a JSON object.
    NotAnObject,
    /// A field type cannot be expressed to the model.
    UnsupportedType,
    /// A field uses a name reserved by the message encoding.
    ReservedField,
    /// The message type provides no examples.
    MissingExamples,
    /// An example does not conform to its own schema.
    InvalidExample,
}

impl Display for SchemaErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaErrorKind::InvalidName => write!(f, "Invalid request name"),
            SchemaErrorKind::NotAnObject => write!(f, "Not an object schema"),
            SchemaErrorKind::UnsupportedType => write!(f, "Unsupported type"),
            SchemaErrorKind::ReservedField => write!(f, "Reserved field"),
            SchemaErrorKind::MissingExamples => write!(f, "Missing examples"),
            SchemaErrorKind::InvalidExample => write!(f, "Invalid example"),
        }
    }
}

/// A message type cannot be turned into a [`MessageSchema`].
///
/// This is a programming error and is fatal to agent construction.
///
/// [`MessageSchema`]: super::MessageSchema
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SchemaError {
    request: String,
    kind: SchemaErrorKind,
    reason: Option<String>,
}

impl SchemaError {
    #[inline]
    pub(crate) fn new<S: Into<String>>(
        request: S,
        kind: SchemaErrorKind,
    ) -> Self {
        Self {
            request: request.into(),
            kind,
            reason: None,
        }
    }

    /// Attaches a reason to the error.
    #[inline]
    pub(crate) fn with_reason<S: Into<String>>(self, reason: S) -> Self {
        Self {
            reason: Some(reason.into()),
            ..self
        }
    }

    /// Returns the request name of the offending message type.
    #[inline]
    pub fn request(&self) -> &str {
        &self.request
    }

    /// Returns the kind of this error.
    #[inline]
    pub fn kind(&self) -> SchemaErrorKind {
        self.kind
    }
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in message `{}`", self.kind, self.request)?;
        if let Some(reason) = &self.reason {
            write!(f, ": {reason}")?;
        }
        Ok(())
    }
}

impl StdError for SchemaError {}

/// A message was recognized but its fields do not match the schema.
///
/// Fields are never coerced. The agent turns this error into a corrective
/// message so the model can try again.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MalformedMessage {
    /// The request name of the message.
    pub request: String,
    /// The missing or wrong-typed fields, as dotted paths.
    pub fields: Vec<String>,
}

impl Display for MalformedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "message `{}` has missing or invalid fields: {}",
            self.request,
            self.fields.join(", ")
        )
    }
}

impl StdError for MalformedMessage {}

/// The kind of a [`HandlerError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandlerErrorKind {
    /// The message could not be decoded or its values are not acceptable.
    InvalidInput,
    /// Error occurred while handling the message.
    ExecutionError,
    /// The user rejected the action.
    Rejected,
}

impl Display for HandlerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerErrorKind::InvalidInput => write!(f, "Invalid input"),
            HandlerErrorKind::ExecutionError => write!(f, "Execution error"),
            HandlerErrorKind::Rejected => write!(f, "Rejected by the user"),
        }
    }
}

/// Describes a failure inside a handler.
///
/// Handler errors never stop the task loop. They are rendered into text and
/// fed back to the model as the next input.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HandlerError {
    kind: HandlerErrorKind,
    reason: Option<String>,
}

impl HandlerError {
    /// Creates a new error with the `InvalidInput` kind.
    #[inline]
    pub fn invalid_input() -> Self {
        Self {
            kind: HandlerErrorKind::InvalidInput,
            reason: None,
        }
    }

    /// Creates a new error with the `ExecutionError` kind.
    #[inline]
    pub fn execution_error() -> Self {
        Self {
            kind: HandlerErrorKind::ExecutionError,
            reason: None,
        }
    }

    /// Creates a new error with the `Rejected` kind.
    #[inline]
    pub fn rejected() -> Self {
        Self {
            kind: HandlerErrorKind::Rejected,
            reason: None,
        }
    }

    /// Attaches a reason to the error.
    #[inline]
    pub fn with_reason<S: Into<String>>(self, reason: S) -> Self {
        Self {
            kind: self.kind,
            reason: Some(reason.into()),
        }
    }

    /// Returns the kind of this error.
    #[inline]
    pub fn kind(&self) -> HandlerErrorKind {
        self.kind
    }

    /// Returns the reason for the error.
    #[inline]
    pub fn reason(&self) -> Cow<'_, str> {
        match self.reason.as_deref() {
            Some(reason) => Cow::Borrowed(reason),
            None => Cow::Owned(format!("{}", self.kind)),
        }
    }
}

impl Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{}: {reason}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl StdError for HandlerError {}
