use dockhand_model::ToolCallRequest;
use serde_json::{Deserializer, Map, Value};

use super::error::MalformedMessage;
use super::registry::MessageRegistry;
use super::REQUEST_KEY;

/// Everything the model produced in one response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawOutput {
    /// The generated text, possibly empty.
    pub text: String,
    /// Calls received over the native tool call channel, in order.
    pub native_calls: Vec<ToolCallRequest>,
}

impl RawOutput {
    /// Creates a text-only output.
    #[inline]
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            native_calls: vec![],
        }
    }
}

/// A message recognized in the model output and validated against its
/// schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedMessage {
    /// The request name.
    pub request: String,
    /// The fields, without the `request` key.
    pub arguments: Map<String, Value>,
    /// The native call id, if the message came from the native channel.
    pub call_id: Option<String>,
}

/// Extracts at most one message from the model output.
///
/// A native call takes precedence over the text. Otherwise the text is
/// scanned for top-level JSON objects, and the last one carrying a string
/// `"request"` key is taken. Models often think out loud or echo the
/// examples from their instructions before emitting the call they mean.
///
/// Parsing is pure: the same output and registry always give the same
/// result.
pub struct ResponseParser;

impl ResponseParser {
    /// Parses `output` against the messages enabled in `registry`.
    ///
    /// Returns `Ok(None)` when nothing is recognized, including messages
    /// whose request name is unknown or disabled.
    pub fn parse<S>(
        output: &RawOutput,
        registry: &MessageRegistry<S>,
    ) -> Result<Option<ParsedMessage>, MalformedMessage> {
        if let Some((call, earlier)) = output.native_calls.split_last() {
            for ignored in earlier {
                debug!("ignoring earlier native call `{}`", ignored.name);
            }
            let arguments = match &call.arguments {
                Value::Object(map) => map.clone(),
                Value::String(raw) => match serde_json::from_str(raw) {
                    Ok(Value::Object(map)) => map,
                    _ => Map::new(),
                },
                _ => Map::new(),
            };
            return Self::validate(
                &call.name,
                arguments,
                Some(call.id.clone()),
                registry,
            );
        }

        let Some(mut object) = Self::scan(&output.text) else {
            return Ok(None);
        };
        let Some(Value::String(request)) = object.shift_remove(REQUEST_KEY)
        else {
            return Ok(None);
        };
        Self::validate(&request, object, None, registry)
    }

    fn validate<S>(
        request: &str,
        mut arguments: Map<String, Value>,
        call_id: Option<String>,
        registry: &MessageRegistry<S>,
    ) -> Result<Option<ParsedMessage>, MalformedMessage> {
        let Some(schema) = registry.schema(request) else {
            debug!("`{request}` is not enabled");
            return Ok(None);
        };
        arguments.shift_remove(REQUEST_KEY);
        let fields = schema.validate(&arguments);
        if !fields.is_empty() {
            return Err(MalformedMessage {
                request: request.to_owned(),
                fields,
            });
        }
        Ok(Some(ParsedMessage {
            request: request.to_owned(),
            arguments,
            call_id,
        }))
    }

    fn scan(text: &str) -> Option<Map<String, Value>> {
        let mut found: Option<Map<String, Value>> = None;
        let mut pos = 0;
        while let Some(offset) = text[pos..].find('{') {
            let start = pos + offset;
            let mut stream =
                Deserializer::from_str(&text[start..]).into_iter::<Value>();
            match stream.next() {
                Some(Ok(Value::Object(object))) => {
                    // Skip the whole object, nested objects are not
                    // candidates.
                    pos = start + stream.byte_offset();
                    if !matches!(object.get(REQUEST_KEY), Some(Value::String(_)))
                    {
                        continue;
                    }
                    if let Some(previous) = found.replace(object) {
                        debug!(
                            "discarding earlier message {:?}, only the last one is handled",
                            previous.get(REQUEST_KEY)
                        );
                    }
                }
                // Not JSON. Skip the whole brace span, so that objects
                // nested in the fragment are not taken as candidates.
                _ => pos = start + brace_span(&text[start..]),
            }
        }
        found
    }
}

/// Returns the length of the balanced brace span at the start of `text`,
/// ignoring braces inside strings. An unclosed span extends to the end.
fn brace_span(text: &str) -> usize {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return idx + 1;
                }
            }
            _ => {}
        }
    }
    text.len()
}
