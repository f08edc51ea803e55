//! Tool argument schemas: a closed description type instead of arbitrary
//! JSON Schema. Field kinds are deliberately restricted so every provider
//! dialect (including Gemini's strict one) can represent them; unions
//! other than optional simply cannot be expressed.

use serde_json::{json, Map, Value};
use tracing::warn;

/// Scalar kinds allowed as array items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimpleKind {
    String,
    Integer,
    Number,
    Boolean,
}

impl SimpleKind {
    fn json_type(&self) -> &'static str {
        match self {
            SimpleKind::String => "string",
            SimpleKind::Integer => "integer",
            SimpleKind::Number => "number",
            SimpleKind::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    /// Array of one declared scalar kind.
    Array(SimpleKind),
    /// String-keyed object with free-form values.
    Object,
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub kind: FieldKind,
    pub required: bool,
    pub description: String,
    pub default: Option<Value>,
}

/// Ordered field map for one tool. Order is preserved for prompt docs.
#[derive(Debug, Clone, Default)]
pub struct ToolSchema {
    fields: Vec<(String, FieldSpec)>,
}

/// Target wire dialect for rendered descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAi,
    Claude,
    /// Strict: no `default` keyword, arrays always carry item types.
    Gemini,
}

impl ToolSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &str, kind: FieldKind, description: &str) -> Self {
        self.fields.push((
            name.to_string(),
            FieldSpec {
                kind,
                required: true,
                description: description.to_string(),
                default: None,
            },
        ));
        self
    }

    pub fn optional(mut self, name: &str, kind: FieldKind, description: &str) -> Self {
        self.fields.push((
            name.to_string(),
            FieldSpec {
                kind,
                required: false,
                description: description.to_string(),
                default: None,
            },
        ));
        self
    }

    pub fn optional_with_default(
        mut self,
        name: &str,
        kind: FieldKind,
        description: &str,
        default: Value,
    ) -> Self {
        self.fields.push((
            name.to_string(),
            FieldSpec {
                kind,
                required: false,
                description: description.to_string(),
                default: Some(default),
            },
        ));
        self
    }

    pub fn fields(&self) -> &[(String, FieldSpec)] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    /// Registration-time validation. Errors are structural problems;
    /// optional fields without defaults are only warned about.
    pub fn validate(&self, tool_name: &str) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();
        for (name, spec) in &self.fields {
            if spec.description.trim().is_empty() {
                return Err(format!(
                    "tool '{tool_name}': field '{name}' has no description"
                ));
            }
            if spec.required && spec.default.is_some() {
                return Err(format!(
                    "tool '{tool_name}': required field '{name}' must not carry a default"
                ));
            }
            if !spec.required && spec.default.is_none() {
                let msg = format!(
                    "tool '{tool_name}': optional field '{name}' has no default"
                );
                warn!("{msg}");
                warnings.push(msg);
            }
            if let Some(default) = &spec.default {
                if coerce(default.clone(), spec.kind).is_none() {
                    return Err(format!(
                        "tool '{tool_name}': default for '{name}' does not match its kind"
                    ));
                }
            }
        }
        Ok(warnings)
    }

    /// Validate and coerce inbound arguments. Unknown keys are dropped,
    /// missing optionals pick up their defaults, and scalar strings are
    /// coerced where unambiguous ("3" as integer, "true" as boolean).
    pub fn validate_args(&self, args: &Map<String, Value>) -> Result<Map<String, Value>, String> {
        let mut out = Map::new();

        for (name, spec) in &self.fields {
            match args.get(name) {
                Some(Value::Null) | None => {
                    if let Some(default) = &spec.default {
                        out.insert(name.clone(), default.clone());
                    } else if spec.required {
                        return Err(format!("missing required argument '{name}'"));
                    }
                }
                Some(value) => match coerce(value.clone(), spec.kind) {
                    Some(coerced) => {
                        out.insert(name.clone(), coerced);
                    }
                    None => {
                        return Err(format!(
                            "argument '{name}' has the wrong type (expected {})",
                            kind_name(spec.kind)
                        ));
                    }
                },
            }
        }

        Ok(out)
    }

    /// Render to a JSON Schema descriptor for the given dialect.
    pub fn to_json_schema(&self, dialect: Dialect) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for (name, spec) in &self.fields {
            let mut prop = Map::new();
            match spec.kind {
                FieldKind::String => {
                    prop.insert("type".into(), json!("string"));
                }
                FieldKind::Integer => {
                    prop.insert("type".into(), json!("integer"));
                }
                FieldKind::Number => {
                    prop.insert("type".into(), json!("number"));
                }
                FieldKind::Boolean => {
                    prop.insert("type".into(), json!("boolean"));
                }
                FieldKind::Array(item) => {
                    prop.insert("type".into(), json!("array"));
                    // Every dialect gets item types; Gemini rejects arrays
                    // without them.
                    prop.insert("items".into(), json!({ "type": item.json_type() }));
                }
                FieldKind::Object => {
                    prop.insert("type".into(), json!("object"));
                }
            }
            prop.insert("description".into(), json!(spec.description));

            if dialect != Dialect::Gemini {
                if let Some(default) = &spec.default {
                    prop.insert("default".into(), default.clone());
                }
            }

            properties.insert(name.clone(), Value::Object(prop));
            if spec.required {
                required.push(json!(name));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

fn kind_name(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::String => "string",
        FieldKind::Integer => "integer",
        FieldKind::Number => "number",
        FieldKind::Boolean => "boolean",
        FieldKind::Array(_) => "array",
        FieldKind::Object => "object",
    }
}

/// Best-effort coercion of a JSON value into the declared kind.
/// Returns None when the value can't represent the kind.
fn coerce(value: Value, kind: FieldKind) -> Option<Value> {
    match kind {
        FieldKind::String => match value {
            Value::String(s) => Some(Value::String(s)),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        FieldKind::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Value::Number(n)),
            Value::Number(n) => {
                let f = n.as_f64()?;
                if f.fract() == 0.0 {
                    Some(json!(f as i64))
                } else {
                    None
                }
            }
            Value::String(s) => s.trim().parse::<i64>().ok().map(|i| json!(i)),
            _ => None,
        },
        FieldKind::Number => match value {
            Value::Number(n) => Some(Value::Number(n)),
            Value::String(s) => s.trim().parse::<f64>().ok().map(|f| json!(f)),
            _ => None,
        },
        FieldKind::Boolean => match value {
            Value::Bool(b) => Some(Value::Bool(b)),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(json!(true)),
                "false" | "no" | "0" => Some(json!(false)),
                _ => None,
            },
            _ => None,
        },
        FieldKind::Array(item) => match value {
            Value::Array(items) => {
                let kind = match item {
                    SimpleKind::String => FieldKind::String,
                    SimpleKind::Integer => FieldKind::Integer,
                    SimpleKind::Number => FieldKind::Number,
                    SimpleKind::Boolean => FieldKind::Boolean,
                };
                let coerced: Option<Vec<Value>> =
                    items.into_iter().map(|v| coerce(v, kind)).collect();
                coerced.map(Value::Array)
            }
            // A lone scalar wraps into a one-element array.
            other => {
                let kind = match item {
                    SimpleKind::String => FieldKind::String,
                    SimpleKind::Integer => FieldKind::Integer,
                    SimpleKind::Number => FieldKind::Number,
                    SimpleKind::Boolean => FieldKind::Boolean,
                };
                coerce(other, kind).map(|v| Value::Array(vec![v]))
            }
        },
        FieldKind::Object => match value {
            Value::Object(map) => Some(Value::Object(map)),
            _ => None,
        },
    }
}
