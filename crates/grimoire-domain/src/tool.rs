use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_input_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// A tool exposed by a downstream spell server, or by the gateway façade
/// itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_input_schema", rename = "inputSchema")]
    pub input_schema: Value,
}

impl ToolDescriptor {
    /// Returns a copy of this descriptor with `EXPERT GUIDANCE` appended
    /// to the description. A blank steering string leaves the
    /// description untouched; the original is never mutated.
    pub fn with_steering(&self, steering: Option<&str>) -> ToolDescriptor {
        match steering.map(str::trim).filter(|s| !s.is_empty()) {
            Some(guidance) => ToolDescriptor {
                name: self.name.clone(),
                description: format!("{}\n--- EXPERT GUIDANCE ---\n{}", self.description, guidance),
                input_schema: self.input_schema.clone(),
            },
            None => self.clone(),
        }
    }
}
