//! Tool catalog: merged view of every connected server's tools.
//!
//! Tools are keyed by qualified name `server.tool` (e.g. `demoFacade.greet`),
//! which is also the function name shown to the oracle. Server ids may not
//! contain a dot (`check_server_id`), so the first dot splits a qualified name.

use std::collections::BTreeMap;

use crate::protocol::types::ToolDescriptor;
use crate::protocol::McpError;

// ─── ToolCatalog ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct CatalogEntry {
    server: String,
    descriptor: ToolDescriptor,
}

/// Merged tool catalog across all live servers.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: BTreeMap<String, CatalogEntry>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the qualified name for a server's tool.
    pub fn qualify(server: &str, tool: &str) -> String {
        format!("{server}.{tool}")
    }

    /// Split `server.tool` at the first dot.
    pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
        name.split_once('.')
            .filter(|(server, tool)| !server.is_empty() && !tool.is_empty())
    }

    /// Reject ids that would make qualified names ambiguous.
    pub fn check_server_id(server: &str) -> Result<(), McpError> {
        if server.trim().is_empty() {
            return Err(McpError::ConfigError {
                reason: "server id must not be empty".into(),
            });
        }
        if server.contains('.') {
            return Err(McpError::ConfigError {
                reason: format!("server id '{server}' must not contain '.'"),
            });
        }
        Ok(())
    }

    /// Register (or replace) all tools of one server.
    pub fn register_server_tools(&mut self, server: &str, tools: &[ToolDescriptor]) {
        self.unregister_server(server);
        for descriptor in tools {
            self.tools.insert(
                Self::qualify(server, &descriptor.name),
                CatalogEntry {
                    server: server.to_string(),
                    descriptor: descriptor.clone(),
                },
            );
        }
        tracing::debug!(server = %server, count = tools.len(), "registered server tools");
    }

    /// Remove every tool belonging to a server.
    pub fn unregister_server(&mut self, server: &str) {
        self.tools.retain(|_, entry| entry.server != server);
    }

    /// Look up a tool by qualified name.
    pub fn get(&self, qualified: &str) -> Option<&ToolDescriptor> {
        self.tools.get(qualified).map(|e| &e.descriptor)
    }

    /// Look up a tool by its server and bare name.
    pub fn lookup(&self, server: &str, tool: &str) -> Option<&ToolDescriptor> {
        self.get(&Self::qualify(server, tool))
    }

    /// Owning server and bare tool name of a catalog entry.
    pub fn owner(&self, qualified: &str) -> Option<(&str, &str)> {
        self.tools
            .get(qualified)
            .map(|e| (e.server.as_str(), e.descriptor.name.as_str()))
    }

    pub fn has_server(&self, server: &str) -> bool {
        self.tools.values().any(|e| e.server == server)
    }

    /// Distinct server ids with at least one tool, sorted.
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.values().map(|e| e.server.clone()).collect();
        names.dedup();
        names.sort();
        names.dedup();
        names
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    // ─── Resolution ──────────────────────────────────────────────────────

    /// Resolve a name the oracle produced to a qualified catalog entry.
    pub fn resolve(&self, name: &str) -> ToolResolution {
        if self.tools.contains_key(name) {
            return ToolResolution::Exact(name.to_string());
        }

        // Qualified but not in the catalog: nothing to guess.
        if name.contains('.') {
            return ToolResolution::NotFound {
                original: name.to_string(),
            };
        }

        let mut candidates: Vec<String> = self
            .tools
            .iter()
            .filter(|(_, entry)| entry.descriptor.name == name)
            .map(|(fq, _)| fq.clone())
            .collect();

        match candidates.len() {
            0 => ToolResolution::NotFound {
                original: name.to_string(),
            },
            1 => ToolResolution::Unprefixed {
                resolved: candidates.remove(0),
                original: name.to_string(),
            },
            _ => ToolResolution::Ambiguous {
                original: name.to_string(),
                candidates,
            },
        }
    }

    // ─── Validation ──────────────────────────────────────────────────────

    /// Check arguments against a tool's input schema.
    ///
    /// Covers object shape, required fields, and the primitive `type` of
    /// each declared property. Undeclared properties are allowed.
    pub fn validate_arguments(
        &self,
        qualified: &str,
        arguments: &serde_json::Value,
    ) -> Result<(), McpError> {
        let descriptor = self.get(qualified).ok_or(McpError::UnknownTool {
            name: qualified.to_string(),
        })?;
        let invalid = |reason: String| McpError::InvalidArguments {
            tool: qualified.to_string(),
            reason,
        };

        let Some(args) = arguments.as_object() else {
            return Err(invalid(format!(
                "arguments must be an object, got {}",
                json_type_name(arguments)
            )));
        };

        let schema = &descriptor.input_schema;
        if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
            for field in required.iter().filter_map(|f| f.as_str()) {
                if !args.contains_key(field) {
                    return Err(invalid(format!("missing required field: '{field}'")));
                }
            }
        }

        if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
            for (field, value) in args {
                let Some(expected) = properties.get(field).and_then(|p| p.get("type")) else {
                    continue;
                };
                if !type_matches(expected, value) {
                    return Err(invalid(format!(
                        "field '{field}' should be {expected}, got {}",
                        json_type_name(value)
                    )));
                }
            }
        }

        Ok(())
    }

    // ─── Oracle view ─────────────────────────────────────────────────────

    /// Function-calling tool definitions (OpenAI format).
    pub fn to_openai_tools(&self) -> Vec<serde_json::Value> {
        self.tools
            .iter()
            .map(|(fq_name, entry)| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": fq_name,
                        "description": entry.descriptor.description,
                        "parameters": entry.descriptor.input_schema,
                    }
                })
            })
            .collect()
    }
}

fn type_matches(expected: &serde_json::Value, value: &serde_json::Value) -> bool {
    match expected {
        serde_json::Value::String(t) => primitive_matches(t, value),
        serde_json::Value::Array(types) => types
            .iter()
            .filter_map(|t| t.as_str())
            .any(|t| primitive_matches(t, value)),
        // Unusual schema: do not second-guess the server.
        _ => true,
    }
}

fn primitive_matches(expected: &str, value: &serde_json::Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// ─── ToolResolution ──────────────────────────────────────────────────────────

/// Outcome of resolving an oracle-produced tool name.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResolution {
    /// Exact qualified match.
    Exact(String),
    /// Bare tool name owned by exactly one server.
    Unprefixed { resolved: String, original: String },
    /// Bare tool name owned by several servers.
    Ambiguous {
        original: String,
        candidates: Vec<String>,
    },
    NotFound { original: String },
}

impl ToolResolution {
    /// The qualified name, if resolution succeeded.
    pub fn resolved_name(&self) -> Option<&str> {
        match self {
            Self::Exact(name) => Some(name),
            Self::Unprefixed { resolved, .. } => Some(resolved),
            Self::Ambiguous { .. } | Self::NotFound { .. } => None,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, schema: serde_json::Value) -> ToolDescriptor {
        ToolDescriptor {
            name: name.into(),
            description: format!("{name} tool"),
            input_schema: schema,
        }
    }

    fn catalog() -> ToolCatalog {
        let mut catalog = ToolCatalog::new();
        catalog.register_server_tools(
            "demoFacade",
            &[tool(
                "greet",
                json!({"type": "object", "properties": {"message": {"type": "string"}}, "required": ["message"]}),
            )],
        );
        catalog.register_server_tools(
            "emailFacade",
            &[
                tool(
                    "send_email",
                    json!({
                        "type": "object",
                        "properties": {"to": {"type": "string"}, "subject": {"type": "string"}, "body": {"type": "string"}},
                        "required": ["to", "subject", "body"]
                    }),
                ),
                tool("get_latest_email", json!({"type": "object", "properties": {}})),
                tool("search", json!({"type": "object", "properties": {"limit": {"type": ["integer", "null"]}}})),
            ],
        );
        catalog.register_server_tools(
            "githubFacade",
            &[tool("search", json!({"type": "object", "properties": {}}))],
        );
        catalog
    }

    #[test]
    fn test_qualified_names() {
        let catalog = catalog();
        assert_eq!(catalog.len(), 5);
        assert!(catalog.get("demoFacade.greet").is_some());
        assert!(catalog.lookup("emailFacade", "send_email").is_some());
        assert_eq!(
            ToolCatalog::split_qualified("githubFacade.list.repos"),
            Some(("githubFacade", "list.repos"))
        );
        assert_eq!(ToolCatalog::split_qualified("greet"), None);
        assert_eq!(ToolCatalog::split_qualified(".greet"), None);
    }

    #[test]
    fn test_server_id_rules() {
        assert!(ToolCatalog::check_server_id("demoFacade").is_ok());
        assert!(ToolCatalog::check_server_id("demo.facade").is_err());
        assert!(ToolCatalog::check_server_id(" ").is_err());
    }

    #[test]
    fn test_owner_uses_registered_server() {
        let mut catalog = catalog();
        catalog.register_server_tools("demo.facade", &[tool("greet", json!({"type": "object"}))]);
        assert_eq!(catalog.owner("demo.facade.greet"), Some(("demo.facade", "greet")));
        assert_eq!(catalog.owner("emailFacade.search"), Some(("emailFacade", "search")));
        assert_eq!(catalog.owner("demo.greet"), None);
    }

    #[test]
    fn test_resolve() {
        let catalog = catalog();
        assert_eq!(
            catalog.resolve("demoFacade.greet"),
            ToolResolution::Exact("demoFacade.greet".into())
        );
        assert_eq!(
            catalog.resolve("greet").resolved_name(),
            Some("demoFacade.greet")
        );
        assert!(matches!(
            catalog.resolve("search"),
            ToolResolution::Ambiguous { ref candidates, .. } if candidates.len() == 2
        ));
        assert!(matches!(catalog.resolve("fly"), ToolResolution::NotFound { .. }));
        assert!(matches!(catalog.resolve("demoFacade.fly"), ToolResolution::NotFound { .. }));
    }

    #[test]
    fn test_unregister_server_removes_its_tools() {
        let mut catalog = catalog();
        catalog.unregister_server("emailFacade");
        assert_eq!(catalog.len(), 2);
        assert!(!catalog.has_server("emailFacade"));
        assert_eq!(catalog.resolve("search").resolved_name(), Some("githubFacade.search"));
        assert_eq!(catalog.server_names(), vec!["demoFacade", "githubFacade"]);
    }

    #[test]
    fn test_validate_required_fields() {
        let catalog = catalog();
        assert!(catalog
            .validate_arguments("emailFacade.send_email", &json!({"to": "a", "subject": "b", "body": "c"}))
            .is_ok());
        let err = catalog
            .validate_arguments("emailFacade.send_email", &json!({"to": "a"}))
            .unwrap_err();
        assert!(err.to_string().contains("missing required field: 'subject'"));
    }

    #[test]
    fn test_validate_types() {
        let catalog = catalog();
        let err = catalog
            .validate_arguments("demoFacade.greet", &json!({"message": 42}))
            .unwrap_err();
        assert!(err.to_string().contains("got number"));
        assert!(catalog
            .validate_arguments("emailFacade.search", &json!({"limit": null}))
            .is_ok());
        assert!(catalog
            .validate_arguments("emailFacade.search", &json!({"limit": 1.5}))
            .is_err());
        assert!(catalog
            .validate_arguments("demoFacade.greet", &json!({"message": "hi", "extra": true}))
            .is_ok());
    }

    #[test]
    fn test_validate_rejects_non_object_and_unknown() {
        let catalog = catalog();
        assert!(catalog
            .validate_arguments("emailFacade.get_latest_email", &json!(["x"]))
            .unwrap_err()
            .to_string()
            .contains("must be an object"));
        assert!(matches!(
            catalog.validate_arguments("nope.tool", &json!({})),
            Err(McpError::UnknownTool { .. })
        ));
    }

    #[test]
    fn test_to_openai_tools() {
        let tools = catalog().to_openai_tools();
        assert_eq!(tools.len(), 5);
        let greet = tools
            .iter()
            .find(|t| t["function"]["name"] == "demoFacade.greet")
            .unwrap();
        assert_eq!(greet["type"], "function");
        assert_eq!(greet["function"]["parameters"]["required"], json!(["message"]));
    }
}
