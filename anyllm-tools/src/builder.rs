use anyllm_client::Tool;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const TYPE_STRING: &str = "string";
pub const TYPE_NUMBER: &str = "number";
pub const TYPE_INTEGER: &str = "integer";
pub const TYPE_BOOLEAN: &str = "boolean";
pub const TYPE_ARRAY: &str = "array";
pub const TYPE_OBJECT: &str = "object";

/// One JSON Schema property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertyDefinition>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl PropertyDefinition {
    pub fn new(kind: &str, description: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            description: description.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct FunctionSchema {
    #[serde(rename = "type")]
    kind: &'static str,
    properties: BTreeMap<String, PropertyDefinition>,
    required: Vec<String>,
}

/// Fluent construction of a function tool and its parameter schema.
///
/// ```
/// use anyllm_tools::ToolBuilder;
///
/// let tool = ToolBuilder::new("get_weather", "Current weather for a city")
///     .string_param("location", "City name", true, &[])
///     .string_param("unit", "Temperature unit", false, &["celsius", "fahrenheit"])
///     .build();
/// assert_eq!(tool.function.parameters["required"][0], "location");
/// ```
#[derive(Debug, Clone)]
pub struct ToolBuilder {
    name: String,
    description: String,
    schema: FunctionSchema,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema: FunctionSchema {
                kind: TYPE_OBJECT,
                properties: BTreeMap::new(),
                required: Vec::new(),
            },
        }
    }

    /// Adds (or replaces) a property; `required` names it in the schema's
    /// required list once.
    pub fn param(mut self, name: &str, prop: PropertyDefinition, required: bool) -> Self {
        self.schema.properties.insert(name.to_string(), prop);
        if required && !self.schema.required.iter().any(|r| r == name) {
            self.schema.required.push(name.to_string());
        }
        self
    }

    pub fn string_param(
        self,
        name: &str,
        description: &str,
        required: bool,
        enum_values: &[&str],
    ) -> Self {
        let mut prop = PropertyDefinition::new(TYPE_STRING, description);
        prop.enum_values = enum_values.iter().map(|v| (*v).into()).collect();
        self.param(name, prop, required)
    }

    pub fn number_param(self, name: &str, description: &str, required: bool) -> Self {
        self.param(name, PropertyDefinition::new(TYPE_NUMBER, description), required)
    }

    pub fn integer_param(self, name: &str, description: &str, required: bool) -> Self {
        self.param(name, PropertyDefinition::new(TYPE_INTEGER, description), required)
    }

    pub fn boolean_param(self, name: &str, description: &str, required: bool) -> Self {
        self.param(name, PropertyDefinition::new(TYPE_BOOLEAN, description), required)
    }

    pub fn array_param(self, name: &str, description: &str, item_type: &str, required: bool) -> Self {
        let mut prop = PropertyDefinition::new(TYPE_ARRAY, description);
        prop.items = Some(Box::new(PropertyDefinition::new(item_type, "")));
        self.param(name, prop, required)
    }

    pub fn object_param(
        self,
        name: &str,
        description: &str,
        properties: BTreeMap<String, PropertyDefinition>,
        required_fields: Vec<String>,
        required: bool,
    ) -> Self {
        let mut prop = PropertyDefinition::new(TYPE_OBJECT, description);
        prop.properties = properties;
        prop.required = required_fields;
        self.param(name, prop, required)
    }

    pub fn build(self) -> Tool {
        let parameters = match serde_json::to_value(&self.schema) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(tool = %self.name, error = %e, "tool schema did not serialize");
                serde_json::json!({"type": TYPE_OBJECT, "properties": {}, "required": []})
            }
        };
        Tool::function(self.name, self.description, parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_flat_schema() {
        let tool = ToolBuilder::new("search", "Search the web")
            .string_param("query", "terms", true, &[])
            .integer_param("max_results", "limit", false)
            .boolean_param("safe", "", false)
            .number_param("min_score", "threshold", false)
            .array_param("sites", "restrict to", TYPE_STRING, false)
            .build();

        assert_eq!(tool.kind, "function");
        assert_eq!(tool.function.name, "search");
        assert_eq!(
            tool.function.parameters,
            json!({
                "type": "object",
                "properties": {
                    "max_results": {"type": "integer", "description": "limit"},
                    "min_score": {"type": "number", "description": "threshold"},
                    "query": {"type": "string", "description": "terms"},
                    "safe": {"type": "boolean"},
                    "sites": {"type": "array", "description": "restrict to", "items": {"type": "string"}}
                },
                "required": ["query"]
            })
        );
    }

    #[test]
    fn enums_nested_objects_and_required_dedup() {
        let mut filters = BTreeMap::new();
        let mut status = PropertyDefinition::new(TYPE_STRING, "status filter");
        status.enum_values = vec![json!("active"), json!("inactive")];
        filters.insert("status".to_string(), status);

        let tool = ToolBuilder::new("query_user_profile", "")
            .string_param("user_id", "id", true, &[])
            .string_param("query_type", "kind", true, &["basic", "full"])
            .string_param("user_id", "id again", true, &[])
            .object_param("filters", "advanced", filters, vec!["status".into()], false)
            .build();

        let params = &tool.function.parameters;
        assert_eq!(params["required"], json!(["user_id", "query_type"]));
        assert_eq!(params["properties"]["user_id"]["description"], "id again");
        assert_eq!(params["properties"]["query_type"]["enum"], json!(["basic", "full"]));
        assert_eq!(
            params["properties"]["filters"]["properties"]["status"]["enum"],
            json!(["active", "inactive"])
        );
        assert_eq!(params["properties"]["filters"]["required"], json!(["status"]));
    }

    #[test]
    fn empty_builder_still_has_required_array() {
        let tool = ToolBuilder::new("ping", "noop").build();
        assert_eq!(
            tool.function.parameters,
            json!({"type": "object", "properties": {}, "required": []})
        );
    }
}
