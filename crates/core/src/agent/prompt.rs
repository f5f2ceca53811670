use std::fmt::Write;

use super::AgentConfig;
use crate::message::{
    FieldSpec, FieldType, HandlerError, MalformedMessage, MessageRegistry,
    MessageSchema, REQUEST_KEY,
};

/// Renders the system prompt for the next request.
pub(crate) fn system_prompt<S>(
    config: &AgentConfig,
    registry: &MessageRegistry<S>,
) -> String {
    let mut prompt = config.system_prompt.trim().to_owned();
    if !config.use_tools_api && !registry.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&message_instructions(registry));
    }
    if !config.done_token.is_empty() {
        let _ = write!(
            prompt,
            "\n\nWhen the task is complete, reply with `{}` followed by \
             your final answer.",
            config.done_token
        );
    }
    prompt
}

fn message_instructions<S>(registry: &MessageRegistry<S>) -> String {
    let mut text = String::from(
        "You have access to the following TOOLS. To use one, reply with a \
         JSON object whose `request` field names the tool, exactly like the \
         examples. Use at most one tool per reply and wait for its result.",
    );
    for schema in registry.schemas() {
        let _ = write!(
            text,
            "\n\nTOOL: {}\nPURPOSE: {}\n",
            schema.request(),
            schema.purpose()
        );
        describe_fields(&mut text, schema);
        for example in schema.examples() {
            let _ = write!(text, "\nEXAMPLE: {example}");
        }
    }
    text
}

fn describe_fields(text: &mut String, schema: &MessageSchema) {
    let _ = write!(
        text,
        "FIELDS:\n- `{REQUEST_KEY}` (string, required): must be \"{}\"",
        schema.request()
    );
    for field in schema.fields() {
        describe_field(text, field, 0);
    }
}

fn describe_field(text: &mut String, field: &FieldSpec, depth: usize) {
    let indent = "  ".repeat(depth);
    let required = if field.required { "required" } else { "optional" };
    let _ = write!(
        text,
        "\n{indent}- `{}` ({}, {required})",
        field.name, field.ty
    );
    if let Some(description) = &field.description {
        let _ = write!(text, ": {description}");
    }
    if let Some(default) = &field.default {
        let _ = write!(text, " (default: {default})");
    }
    if let FieldType::Object(fields) = &field.ty {
        for nested in fields {
            describe_field(text, nested, depth + 1);
        }
    }
}

/// Content telling the model how to fix a malformed message.
pub(crate) fn malformed_message(
    malformed: &MalformedMessage,
    schema: Option<&MessageSchema>,
) -> String {
    let mut text = format!(
        "Your `{}` message is missing fields or has fields of the wrong \
         type: {}.",
        malformed.request,
        malformed.fields.join(", ")
    );
    if let Some(schema) = schema {
        text.push_str("\nThe message must be a JSON object with these ");
        describe_fields(&mut text, schema);
        if let Some(example) = schema.examples().first() {
            let _ = write!(text, "\nFor example: {example}");
        }
    }
    text.push_str("\nPlease send the corrected message.");
    text
}

/// Content reporting a failed handler to the model.
pub(crate) fn handler_error(request: &str, err: &HandlerError) -> String {
    format!("Error while handling `{request}`: {err}")
}
