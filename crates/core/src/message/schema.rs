use std::fmt::{self, Display};

use dockhand_model::ModelTool;
use schemars::schema_for;
use serde_json::{Map, Value};

use super::error::{SchemaError, SchemaErrorKind};
use super::{REQUEST_KEY, ToolMessage};

/// The type of a message field, as far as the model is concerned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldType {
    /// A JSON string.
    String,
    /// A JSON number without fractional part.
    Integer,
    /// Any JSON number.
    Number,
    /// `true` or `false`.
    Boolean,
    /// `null`, usually as a union variant of optional fields.
    Null,
    /// One of the listed strings.
    Enum(Vec<String>),
    /// A sequence of values of the same type.
    Array(Box<FieldType>),
    /// A nested object with its own fields.
    Object(Vec<FieldSpec>),
    /// Any of the listed types.
    OneOf(Vec<FieldType>),
}

impl FieldType {
    fn check(&self, value: &Value, path: &str, offending: &mut Vec<String>) {
        let valid = match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Null => value.is_null(),
            FieldType::Enum(variants) => value
                .as_str()
                .is_some_and(|s| variants.iter().any(|v| v == s)),
            FieldType::Array(item_type) => match value.as_array() {
                Some(items) => {
                    for (idx, item) in items.iter().enumerate() {
                        let item_path = format!("{path}[{idx}]");
                        item_type.check(item, &item_path, offending);
                    }
                    true
                }
                None => false,
            },
            FieldType::Object(fields) => match value.as_object() {
                Some(map) => {
                    check_fields(fields, map, path, offending);
                    true
                }
                None => false,
            },
            FieldType::OneOf(variants) => variants.iter().any(|variant| {
                let mut scratch = vec![];
                variant.check(value, path, &mut scratch);
                scratch.is_empty()
            }),
        };
        if !valid {
            offending.push(path.to_owned());
        }
    }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::Integer => write!(f, "integer"),
            FieldType::Number => write!(f, "number"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Null => write!(f, "null"),
            FieldType::Enum(variants) => {
                write!(f, "one of ")?;
                for (idx, variant) in variants.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{variant}\"")?;
                }
                Ok(())
            }
            FieldType::Array(item_type) => write!(f, "array of {item_type}"),
            FieldType::Object(_) => write!(f, "object"),
            FieldType::OneOf(variants) => {
                for (idx, variant) in variants.iter().enumerate() {
                    if idx > 0 {
                        write!(f, " or ")?;
                    }
                    write!(f, "{variant}")?;
                }
                Ok(())
            }
        }
    }
}

/// One field of a message, in declaration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name.
    pub name: String,
    /// Field type.
    pub ty: FieldType,
    /// Whether the field must be present.
    pub required: bool,
    /// The value used when the field is absent, if declared.
    pub default: Option<Value>,
    /// Description from the doc comment or `schemars` attribute.
    pub description: Option<String>,
}

/// An immutable description of one message shape.
///
/// Built from a [`ToolMessage`] type with [`MessageSchema::of`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageSchema {
    request: String,
    purpose: String,
    fields: Vec<FieldSpec>,
    parameters: Value,
    examples: Vec<Value>,
}

impl MessageSchema {
    /// Builds the schema of message type `M`.
    ///
    /// Fails if the request name is empty or not a plain identifier, if the
    /// generated JSON schema is not an object, or if any field type is not
    /// representable: free-form values, maps and recursive types are
    /// rejected.
    pub fn of<M: ToolMessage>() -> Result<Self, SchemaError> {
        let request = M::REQUEST;
        if request.trim().is_empty() {
            return Err(SchemaError::new(request, SchemaErrorKind::InvalidName)
                .with_reason("request name is empty"));
        }
        if !request
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(SchemaError::new(request, SchemaErrorKind::InvalidName)
                .with_reason("only letters, digits, `_` and `-` are allowed"));
        }

        let mut parameters = schema_for!(M).to_value();
        let fields = {
            let Some(root) = parameters.as_object() else {
                return Err(SchemaError::new(
                    request,
                    SchemaErrorKind::NotAnObject,
                ));
            };
            if root.get("type").and_then(Value::as_str) != Some("object") {
                return Err(SchemaError::new(
                    request,
                    SchemaErrorKind::NotAnObject,
                ));
            }
            let defs = root
                .get("$defs")
                .or_else(|| root.get("definitions"))
                .and_then(Value::as_object);
            let mut walker = SchemaWalker {
                request,
                defs,
                visiting: vec![],
            };
            walker.object_fields(root, "")?
        };
        if fields.iter().any(|field| field.name == REQUEST_KEY) {
            return Err(SchemaError::new(
                request,
                SchemaErrorKind::ReservedField,
            )
            .with_reason(format!("`{REQUEST_KEY}` is used for the name")));
        }

        let examples = M::examples()
            .iter()
            .map(|example| {
                serde_json::to_value(example)
                    .ok()
                    .and_then(|value| render_example(request, value))
                    .ok_or_else(|| {
                        SchemaError::new(
                            request,
                            SchemaErrorKind::InvalidExample,
                        )
                        .with_reason("example is not a JSON object")
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Metadata for standalone documents only.
        if let Some(root) = parameters.as_object_mut() {
            root.shift_remove("$schema");
            root.shift_remove("title");
        }

        Ok(Self {
            request: request.to_owned(),
            purpose: M::purpose().trim().to_owned(),
            fields,
            parameters,
            examples,
        })
    }

    /// Returns the request name.
    #[inline]
    pub fn request(&self) -> &str {
        &self.request
    }

    /// Returns the purpose text.
    #[inline]
    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    /// Returns the fields in declaration order.
    #[inline]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Returns the JSON schema of the fields.
    #[inline]
    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    /// Returns the examples, each rendered as a JSON object whose first key
    /// is `"request"`.
    #[inline]
    pub fn examples(&self) -> &[Value] {
        &self.examples
    }

    /// Returns the definition for models with a native tool call channel.
    pub fn definition(&self) -> ModelTool {
        ModelTool {
            name: self.request.clone(),
            description: self.purpose.clone(),
            parameters: self.parameters.clone(),
        }
    }

    /// Checks `arguments` against the fields and returns the paths of every
    /// missing or wrong-typed field. An empty list means the arguments are
    /// valid.
    ///
    /// Unknown keys are ignored.
    pub fn validate(&self, arguments: &Map<String, Value>) -> Vec<String> {
        let mut offending = vec![];
        check_fields(&self.fields, arguments, "", &mut offending);
        offending
    }

    /// Verifies that at least one example exists and every example conforms
    /// to the schema.
    pub fn check_examples(&self) -> Result<(), SchemaError> {
        if self.examples.is_empty() {
            return Err(SchemaError::new(
                &self.request,
                SchemaErrorKind::MissingExamples,
            ));
        }
        for example in &self.examples {
            let mut arguments =
                example.as_object().cloned().unwrap_or_default();
            arguments.shift_remove(REQUEST_KEY);
            let offending = self.validate(&arguments);
            if !offending.is_empty() {
                return Err(SchemaError::new(
                    &self.request,
                    SchemaErrorKind::InvalidExample,
                )
                .with_reason(offending.join(", ")));
            }
        }
        Ok(())
    }
}

fn render_example(request: &str, example: Value) -> Option<Value> {
    let Value::Object(fields) = example else {
        return None;
    };
    let mut rendered = Map::with_capacity(fields.len() + 1);
    rendered.insert(REQUEST_KEY.to_owned(), Value::String(request.to_owned()));
    rendered.extend(fields);
    Some(Value::Object(rendered))
}

fn check_fields(
    fields: &[FieldSpec],
    map: &Map<String, Value>,
    path: &str,
    offending: &mut Vec<String>,
) {
    for field in fields {
        let field_path = join_path(path, &field.name);
        match map.get(&field.name) {
            Some(value) => field.ty.check(value, &field_path, offending),
            None if field.required => offending.push(field_path),
            None => {}
        }
    }
}

#[inline]
fn join_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_owned()
    } else {
        format!("{path}.{name}")
    }
}

struct SchemaWalker<'a> {
    request: &'a str,
    defs: Option<&'a Map<String, Value>>,
    visiting: Vec<&'a str>,
}

impl<'a> SchemaWalker<'a> {
    fn unsupported(&self, path: &str, what: &str) -> SchemaError {
        let path = if path.is_empty() { "<root>" } else { path };
        SchemaError::new(self.request, SchemaErrorKind::UnsupportedType)
            .with_reason(format!("{what} at `{path}`"))
    }

    fn lookup(&self, reference: &str) -> Option<(&'a str, &'a Value)> {
        let name = reference
            .strip_prefix("#/$defs/")
            .or_else(|| reference.strip_prefix("#/definitions/"))?;
        self.defs?.get_key_value(name).map(|(k, v)| (k.as_str(), v))
    }

    fn object_fields(
        &mut self,
        map: &'a Map<String, Value>,
        path: &str,
    ) -> Result<Vec<FieldSpec>, SchemaError> {
        let Some(properties) = map.get("properties") else {
            return match map.get("additionalProperties") {
                None | Some(Value::Bool(false)) => Ok(vec![]),
                Some(_) => Err(self.unsupported(path, "free-form map")),
            };
        };
        let Some(properties) = properties.as_object() else {
            return Err(self.unsupported(path, "malformed properties"));
        };
        let required = map
            .get("required")
            .and_then(Value::as_array)
            .map(|names| {
                names.iter().filter_map(Value::as_str).collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let mut fields = Vec::with_capacity(properties.len());
        for (name, property) in properties {
            let field_path = join_path(path, name);
            let ty = self.resolve(property, &field_path)?;
            fields.push(FieldSpec {
                name: name.clone(),
                ty,
                required: required.contains(&name.as_str()),
                default: property.get("default").cloned(),
                description: self.describe(property),
            });
        }
        Ok(fields)
    }

    fn describe(&self, property: &Value) -> Option<String> {
        if let Some(description) =
            property.get("description").and_then(Value::as_str)
        {
            return Some(description.to_owned());
        }
        let reference = property.get("$ref").and_then(Value::as_str)?;
        let (_, def) = self.lookup(reference)?;
        def.get("description")
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    fn resolve(
        &mut self,
        schema: &'a Value,
        path: &str,
    ) -> Result<FieldType, SchemaError> {
        let Value::Object(map) = schema else {
            return Err(self.unsupported(path, "free-form value"));
        };

        if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
            let Some((name, def)) = self.lookup(reference) else {
                return Err(self.unsupported(path, "dangling reference"));
            };
            if self.visiting.contains(&name) {
                return Err(self.unsupported(path, "recursive type"));
            }
            self.visiting.push(name);
            let ty = self.resolve(def, path);
            self.visiting.pop();
            return ty;
        }

        for key in ["anyOf", "oneOf"] {
            if let Some(variants) = map.get(key).and_then(Value::as_array) {
                let variants = variants
                    .iter()
                    .map(|variant| self.resolve(variant, path))
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(FieldType::OneOf(variants));
            }
        }
        if let Some(all_of) = map.get("allOf").and_then(Value::as_array) {
            return match all_of.as_slice() {
                [single] => self.resolve(single, path),
                _ => Err(self.unsupported(path, "intersection type")),
            };
        }

        if let Some(value) = map.get("const") {
            return match value {
                Value::String(s) => Ok(FieldType::Enum(vec![s.clone()])),
                _ => Err(self.unsupported(path, "non-string constant")),
            };
        }
        if let Some(values) = map.get("enum").and_then(Value::as_array) {
            let mut variants = vec![];
            let mut nullable = false;
            for value in values {
                match value {
                    Value::String(s) => variants.push(s.clone()),
                    Value::Null => nullable = true,
                    _ => {
                        return Err(
                            self.unsupported(path, "non-string enum value")
                        );
                    }
                }
            }
            let ty = FieldType::Enum(variants);
            return Ok(if nullable {
                FieldType::OneOf(vec![ty, FieldType::Null])
            } else {
                ty
            });
        }

        match map.get("type") {
            Some(Value::String(name)) => self.resolve_typed(name, map, path),
            Some(Value::Array(names)) => {
                let variants = names
                    .iter()
                    .map(|name| match name.as_str() {
                        Some(name) => self.resolve_typed(name, map, path),
                        None => Err(self.unsupported(path, "malformed type")),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(FieldType::OneOf(variants))
            }
            _ => Err(self.unsupported(path, "free-form value")),
        }
    }

    fn resolve_typed(
        &mut self,
        name: &str,
        map: &'a Map<String, Value>,
        path: &str,
    ) -> Result<FieldType, SchemaError> {
        match name {
            "string" => Ok(FieldType::String),
            "integer" => Ok(FieldType::Integer),
            "number" => Ok(FieldType::Number),
            "boolean" => Ok(FieldType::Boolean),
            "null" => Ok(FieldType::Null),
            "array" => match map.get("items") {
                Some(items) if items.is_object() => {
                    let item_type =
                        self.resolve(items, &format!("{path}[]"))?;
                    Ok(FieldType::Array(Box::new(item_type)))
                }
                _ => Err(self.unsupported(path, "untyped array")),
            },
            "object" => Ok(FieldType::Object(self.object_fields(map, path)?)),
            other => Err(self.unsupported(path, &format!("type `{other}`"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;

    #[derive(Serialize, Deserialize, JsonSchema)]
    struct FileExists {
        /// Name of the file to look for.
        filename: String,
    }

    impl ToolMessage for FileExists {
        const REQUEST: &'static str = "file_exists";

        fn purpose() -> &'static str {
            "To check if a file <filename> exists in the repo."
        }

        fn examples() -> Vec<Self> {
            vec![FileExists {
                filename: "blah.md".to_owned(),
            }]
        }
    }

    /// Info about a country.
    #[derive(Serialize, Deserialize, JsonSchema)]
    struct Country {
        /// Name of the country.
        name: String,
        /// Capital of the country.
        capital: String,
    }

    #[derive(Serialize, Deserialize, JsonSchema)]
    struct President {
        /// Country of the president.
        country: Country,
        /// Name of the president.
        name: String,
        /// Year of election of the president.
        election_year: u32,
    }

    #[derive(Serialize, Deserialize, JsonSchema)]
    struct ShowPresident {
        /// An example of a president.
        president: President,
    }

    impl ToolMessage for ShowPresident {
        const REQUEST: &'static str = "show_president";

        fn purpose() -> &'static str {
            "To generate an example of a president"
        }

        fn examples() -> Vec<Self> {
            vec![ShowPresident {
                president: President {
                    country: Country {
                        name: "USA".to_owned(),
                        capital: "Washington DC".to_owned(),
                    },
                    name: "Joe Biden".to_owned(),
                    election_year: 2020,
                },
            }]
        }
    }

    #[derive(Serialize, Deserialize, JsonSchema)]
    #[serde(untagged)]
    enum Content {
        Text(String),
        Lines(Vec<String>),
    }

    #[derive(Serialize, Deserialize, JsonSchema)]
    #[serde(rename_all = "lowercase")]
    enum Location {
        Inside,
        Outside,
    }

    fn default_run() -> String {
        "docker run".to_owned()
    }

    #[derive(Serialize, Deserialize, JsonSchema)]
    struct RunContainer {
        /// Command and test case.
        content: Content,
        location: Location,
        #[serde(default = "default_run")]
        run: String,
        note: Option<String>,
    }

    impl ToolMessage for RunContainer {
        const REQUEST: &'static str = "run_container";

        fn purpose() -> &'static str {
            "  To verify the container.  "
        }

        fn examples() -> Vec<Self> {
            vec![
                RunContainer {
                    content: Content::Text("python tests/t1.py".to_owned()),
                    location: Location::Inside,
                    run: default_run(),
                    note: None,
                },
                RunContainer {
                    content: Content::Lines(vec!["curl localhost".to_owned()]),
                    location: Location::Outside,
                    run: default_run(),
                    note: Some("from the host".to_owned()),
                },
            ]
        }
    }

    #[test]
    fn test_flat_schema() {
        let schema = MessageSchema::of::<FileExists>().unwrap();
        assert_eq!(schema.request(), "file_exists");
        assert_eq!(
            schema.fields(),
            &[FieldSpec {
                name: "filename".to_owned(),
                ty: FieldType::String,
                required: true,
                default: None,
                description: Some("Name of the file to look for.".to_owned()),
            }]
        );
        assert_eq!(
            schema.examples(),
            &[json!({ "request": "file_exists", "filename": "blah.md" })]
        );
        let keys = schema.examples()[0]
            .as_object()
            .unwrap()
            .keys()
            .collect::<Vec<_>>();
        assert_eq!(keys, ["request", "filename"]);
        assert!(schema.parameters().get("$schema").is_none());
        schema.check_examples().unwrap();

        let definition = schema.definition();
        assert_eq!(definition.name, "file_exists");
        assert_eq!(
            definition.description,
            "To check if a file <filename> exists in the repo."
        );
    }

    #[test]
    fn test_nested_schema() {
        let schema = MessageSchema::of::<ShowPresident>().unwrap();
        let [president] = schema.fields() else {
            panic!("expected one field");
        };
        assert_eq!(
            president.description.as_deref(),
            Some("An example of a president.")
        );
        let FieldType::Object(fields) = &president.ty else {
            panic!("expected an object");
        };
        let names = fields.iter().map(|f| f.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["country", "name", "election_year"]);
        assert_eq!(fields[2].ty, FieldType::Integer);
        schema.check_examples().unwrap();

        let arguments = json!({
            "president": {
                "country": { "name": "France" },
                "name": "Emmanuel Macron",
                "election_year": "2017"
            }
        });
        assert_eq!(
            schema.validate(arguments.as_object().unwrap()),
            ["president.country.capital", "president.election_year"]
        );
    }

    #[test]
    fn test_unions_enums_and_defaults() {
        let schema = MessageSchema::of::<RunContainer>().unwrap();
        assert_eq!(schema.purpose(), "To verify the container.");
        let fields = schema.fields();
        assert_eq!(
            fields[0].ty,
            FieldType::OneOf(vec![
                FieldType::String,
                FieldType::Array(Box::new(FieldType::String)),
            ])
        );
        assert_eq!(
            fields[1].ty,
            FieldType::Enum(vec!["inside".to_owned(), "outside".to_owned()])
        );
        assert!(!fields[2].required);
        assert_eq!(fields[2].default, Some(json!("docker run")));
        assert!(!fields[3].required);
        schema.check_examples().unwrap();

        let valid = json!({
            "content": ["ls", "pwd"],
            "location": "outside",
            "note": null
        });
        assert!(schema.validate(valid.as_object().unwrap()).is_empty());

        let invalid = json!({
            "content": ["ls", 42],
            "location": "nowhere"
        });
        assert_eq!(
            schema.validate(invalid.as_object().unwrap()),
            ["content", "location"]
        );
    }

    #[derive(Serialize, Deserialize, JsonSchema)]
    struct FreeForm {
        payload: Value,
    }

    impl ToolMessage for FreeForm {
        const REQUEST: &'static str = "free_form";

        fn purpose() -> &'static str {
            "Anything goes."
        }

        fn examples() -> Vec<Self> {
            vec![]
        }
    }

    #[derive(Serialize, Deserialize, JsonSchema)]
    struct Tree {
        children: Vec<Tree>,
    }

    impl ToolMessage for Tree {
        const REQUEST: &'static str = "tree";

        fn purpose() -> &'static str {
            "A recursive shape."
        }

        fn examples() -> Vec<Self> {
            vec![]
        }
    }

    #[derive(Serialize, Deserialize, JsonSchema)]
    struct Unnamed {}

    impl ToolMessage for Unnamed {
        const REQUEST: &'static str = "  ";

        fn purpose() -> &'static str {
            ""
        }

        fn examples() -> Vec<Self> {
            vec![Unnamed {}]
        }
    }

    #[derive(Serialize, Deserialize, JsonSchema)]
    struct Shadowing {
        request: String,
    }

    impl ToolMessage for Shadowing {
        const REQUEST: &'static str = "shadowing";

        fn purpose() -> &'static str {
            ""
        }

        fn examples() -> Vec<Self> {
            vec![]
        }
    }

    #[derive(Serialize, Deserialize, JsonSchema)]
    struct Bare(String);

    impl ToolMessage for Bare {
        const REQUEST: &'static str = "bare";

        fn purpose() -> &'static str {
            ""
        }

        fn examples() -> Vec<Self> {
            vec![]
        }
    }

    #[derive(Serialize, Deserialize, JsonSchema)]
    struct PythonVersion {}

    impl ToolMessage for PythonVersion {
        const REQUEST: &'static str = "python_version";

        fn purpose() -> &'static str {
            "To check which version of Python is needed."
        }

        fn examples() -> Vec<Self> {
            vec![]
        }
    }

    #[test]
    fn test_schema_errors() {
        let kind_of = |err: SchemaError| err.kind();
        assert_eq!(
            MessageSchema::of::<FreeForm>().map_err(kind_of),
            Err(SchemaErrorKind::UnsupportedType)
        );
        assert_eq!(
            MessageSchema::of::<Tree>().map_err(kind_of),
            Err(SchemaErrorKind::UnsupportedType)
        );
        assert_eq!(
            MessageSchema::of::<Unnamed>().map_err(kind_of),
            Err(SchemaErrorKind::InvalidName)
        );
        assert_eq!(
            MessageSchema::of::<Shadowing>().map_err(kind_of),
            Err(SchemaErrorKind::ReservedField)
        );
        assert_eq!(
            MessageSchema::of::<Bare>().map_err(kind_of),
            Err(SchemaErrorKind::NotAnObject)
        );
    }

    #[test]
    fn test_empty_message() {
        let schema = MessageSchema::of::<PythonVersion>().unwrap();
        assert!(schema.fields().is_empty());
        assert!(schema.validate(&Map::new()).is_empty());
        assert_eq!(
            schema.check_examples().map_err(|err| err.kind()),
            Err(SchemaErrorKind::MissingExamples)
        );
    }
}
